//! Collection sync orchestration: fetch → reconcile → link, serialized by
//! per-collection locks.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;
use tokio::sync::OwnedMutexGuard;

use crate::errors::Result;
use crate::link::{LinkSpec, Linker};
use crate::model::RemoteRecord;
use crate::reconcile::{ReconcileSummary, Reconciler};
use crate::store::MirrorStore;

/// Fetches a fully decoded remote collection. Implemented by the HTTP
/// layer; pagination and per-element decode drops happen behind this seam.
#[async_trait]
pub trait CollectionSource: Send + Sync {
    async fn fetch_collection(
        &self,
        collection: &str,
        scope: Option<&str>,
    ) -> Result<Vec<RemoteRecord>>;
}

/// Named exclusive locks, one per collection.
///
/// A full reconcile+save cycle holds its collection's lock; linking holds
/// both collection locks, always acquired in lexicographic order so two
/// managers linking the same pair can never deadlock.
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        self.handle(name).lock_owned().await
    }

    /// Acquire both collection locks in the fixed global order. A
    /// self-referential pair locks once.
    pub async fn lock_pair(&self, first: &str, second: &str) -> Vec<OwnedMutexGuard<()>> {
        let mut names = vec![first, second];
        names.sort_unstable();
        names.dedup();

        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            guards.push(self.lock(name).await);
        }
        guards
    }
}

/// Drives full sync cycles for a domain manager: fetch the remote
/// collection, reconcile it into the store, and resolve links afterwards.
pub struct CollectionSyncService<F, S>
where
    F: CollectionSource,
    S: MirrorStore,
{
    source: Arc<F>,
    store: Arc<S>,
    locks: LockRegistry,
}

impl<F, S> CollectionSyncService<F, S>
where
    F: CollectionSource,
    S: MirrorStore,
{
    pub fn new(source: Arc<F>, store: Arc<S>) -> Self {
        Self {
            source,
            store,
            locks: LockRegistry::new(),
        }
    }

    pub fn store(&self) -> &S {
        self.store.as_ref()
    }

    /// Fetch and reconcile one collection under its exclusive lock.
    ///
    /// Returns the touched foreign-key sets; the caller retains them and
    /// calls `link_collections` once the parent collection has synced.
    pub async fn sync_collection(
        &self,
        collection: &str,
        scope: Option<&str>,
        link_fields: &[&str],
    ) -> Result<ReconcileSummary> {
        let _guard = self.locks.lock(collection).await;
        let remote = self.source.fetch_collection(collection, scope).await?;
        debug!(
            "Fetched {} remote record(s) for collection '{}'",
            remote.len(),
            collection
        );
        Reconciler::new(self.store.as_ref())
            .reconcile(collection, scope, remote, link_fields)
            .await
    }

    /// Resolve parent references under both collection locks. Returns the
    /// parent ids still missing locally.
    pub async fn link_collections(
        &self,
        spec: &LinkSpec,
        pending: &BTreeSet<i64>,
    ) -> Result<BTreeSet<i64>> {
        let _guards = self
            .locks
            .lock_pair(&spec.child_collection, &spec.parent_collection)
            .await;
        Linker::new(self.store.as_ref()).link(spec, pending).await
    }
}
