//! Reconciliation: merging a remote authoritative collection into the
//! local mirror via create/update/delete-by-absence.

use std::collections::BTreeSet;

use log::{debug, error};

use crate::errors::{Error, Result};
use crate::model::{MirrorWrite, PendingLinks, RemoteRecord};
use crate::store::MirrorStore;

/// Outcome of one reconcile pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Foreign-key values discovered while applying records, keyed by
    /// field name. Callers hand these to the linker once the parent
    /// collection has synced.
    pub pending_links: PendingLinks,
}

/// Merges remote collection snapshots into a `MirrorStore`.
///
/// Callers must hold the exclusive per-collection lock around a full
/// reconcile (see `LockRegistry`); two interleaved passes over the same
/// collection would race their create/delete sets.
pub struct Reconciler<'a, S: MirrorStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: MirrorStore + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Reconcile `remote` against the entities of `collection` within
    /// `scope`. After this returns Ok, the mirrored ids in scope equal
    /// exactly the remote ids.
    ///
    /// `link_fields` names the payload fields whose integer values are
    /// collected into the returned pending-link set.
    pub async fn reconcile(
        &self,
        collection: &str,
        scope: Option<&str>,
        mut remote: Vec<RemoteRecord>,
        link_fields: &[&str],
    ) -> Result<ReconcileSummary> {
        remote.sort_by_key(|record| record.id);
        if let Some(duplicate) = first_duplicate_id(&remote) {
            return Err(Error::DuplicateRemoteId {
                collection: collection.to_string(),
                id: duplicate,
            });
        }

        let remote_ids: Vec<i64> = remote.iter().map(|record| record.id).collect();
        // Pre-filtered to ids present in `remote`, so the cursor below
        // never sees an entity absent from the remote snapshot.
        let existing = self
            .store
            .fetch_in_scope(collection, scope, &remote_ids)
            .await?;

        let mut summary = ReconcileSummary::default();
        let mut batch: Vec<MirrorWrite> = Vec::with_capacity(remote.len());
        let mut cursor = 0usize;
        for record in &remote {
            if cursor < existing.len() && existing[cursor].id == record.id {
                summary.updated += 1;
                cursor += 1;
            } else {
                summary.created += 1;
            }
            batch.push(MirrorWrite::Upsert {
                collection: collection.to_string(),
                id: record.id,
                scope: scope.map(str::to_string),
                payload: record.fields.clone(),
            });

            for field in link_fields {
                if let Some(value) = record.link_value(field) {
                    summary
                        .pending_links
                        .entry((*field).to_string())
                        .or_insert_with(BTreeSet::new)
                        .insert(value);
                }
            }
        }

        // Delete-by-absence: anything in scope the snapshot no longer names.
        let stale = self
            .store
            .fetch_stale_in_scope(collection, scope, &remote_ids)
            .await?;
        summary.deleted = stale.len();
        for entity in stale {
            batch.push(MirrorWrite::Delete {
                collection: entity.collection,
                id: entity.id,
            });
        }

        if let Err(err) = self.store.apply(batch).await {
            if err.is_store_corruption() {
                error!(
                    "Store corruption detected while applying '{}': {}",
                    collection, err
                );
            } else {
                error!("Reconcile apply failed for collection '{}': {}", collection, err);
            }
            return Err(err);
        }

        debug!(
            "Reconciled '{}': {} created, {} updated, {} deleted",
            collection, summary.created, summary.updated, summary.deleted
        );
        Ok(summary)
    }
}

fn first_duplicate_id(sorted: &[RemoteRecord]) -> Option<i64> {
    sorted
        .windows(2)
        .find(|pair| pair[0].id == pair[1].id)
        .map(|pair| pair[0].id)
}
