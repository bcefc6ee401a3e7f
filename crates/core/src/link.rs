//! Foreign-key linking: post-hoc resolution of parent/child relationships
//! between independently synced collections.
//!
//! Parent and child collections arrive on independent network calls whose
//! completion order is unspecified, so linking is idempotent, retryable,
//! and never blocks either sync. Unresolved parent ids are returned to the
//! caller, which retries them after the next parent sync.

use std::collections::BTreeSet;

use log::debug;

use crate::errors::Result;
use crate::model::MirrorWrite;
use crate::store::MirrorStore;

/// Names the two collections and the child payload field carrying the
/// parent id. Explicit field names replace field-path reflection.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    pub child_collection: String,
    pub parent_collection: String,
    pub field: String,
    pub child_scope: Option<String>,
    pub parent_scope: Option<String>,
}

impl LinkSpec {
    pub fn new(
        child_collection: impl Into<String>,
        parent_collection: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            child_collection: child_collection.into(),
            parent_collection: parent_collection.into(),
            field: field.into(),
            child_scope: None,
            parent_scope: None,
        }
    }
}

/// Resolves parent references for children whose foreign-key values were
/// touched by a reconcile pass.
///
/// Callers must hold both collection locks in the fixed global order (see
/// `LockRegistry::lock_pair`) for the duration of link + save.
pub struct Linker<'a, S: MirrorStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: MirrorStore + ?Sized> Linker<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Attach parent references for every pending parent id that now has
    /// a stored parent. Returns `pending − matched`: the ids still
    /// waiting for their parent collection to sync.
    pub async fn link(&self, spec: &LinkSpec, pending: &BTreeSet<i64>) -> Result<BTreeSet<i64>> {
        if pending.is_empty() {
            return Ok(BTreeSet::new());
        }

        let parent_ids: Vec<i64> = pending.iter().copied().collect();
        let children = self
            .store
            .fetch_children_by_field(
                &spec.child_collection,
                &spec.field,
                &parent_ids,
                spec.child_scope.as_deref(),
            )
            .await?;
        let parents = self
            .store
            .fetch_in_scope(
                &spec.parent_collection,
                spec.parent_scope.as_deref(),
                &parent_ids,
            )
            .await?;

        let mut matched: BTreeSet<i64> = BTreeSet::new();
        let mut batch: Vec<MirrorWrite> = Vec::new();
        let mut parent_cursor = 0usize;
        for child in &children {
            let Some(parent_id) = child.link_value(&spec.field) else {
                continue;
            };
            // Forward seek only: both sides are sorted ascending, and the
            // cursor stays put on repeats so several children can share a
            // parent.
            while parent_cursor < parents.len() && parents[parent_cursor].id < parent_id {
                parent_cursor += 1;
            }
            if parent_cursor < parents.len() && parents[parent_cursor].id == parent_id {
                batch.push(MirrorWrite::Link {
                    child_collection: spec.child_collection.clone(),
                    child_id: child.id,
                    field: spec.field.clone(),
                    parent_collection: spec.parent_collection.clone(),
                    parent_id,
                });
                matched.insert(parent_id);
            }
        }

        if !batch.is_empty() {
            self.store.apply(batch).await?;
        }

        let missing: BTreeSet<i64> = pending.difference(&matched).copied().collect();
        debug!(
            "Linked '{}' -> '{}' on '{}': {} matched, {} still missing",
            spec.child_collection,
            spec.parent_collection,
            spec.field,
            matched.len(),
            missing.len()
        );
        Ok(missing)
    }
}
