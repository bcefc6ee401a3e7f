//! Core synchronization layer: reconciliation, foreign-key linking,
//! shared change-log merging, and the store/secret contracts the other
//! crates implement.

pub mod errors;
pub mod history;
pub mod link;
pub mod model;
pub mod reconcile;
pub mod secrets;
pub mod store;
pub mod sync_service;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{DatabaseError, Error, Result};
pub use history::{HistoryMerger, MergeOutcome};
pub use link::{LinkSpec, Linker};
pub use model::{
    decode_collection, ChangeLogEntry, LinkTarget, MirrorEntity, MirrorWrite, PendingLinks,
    RemoteRecord,
};
pub use reconcile::{ReconcileSummary, Reconciler};
pub use secrets::SecretStore;
pub use store::{ChangeLogStore, MirrorStore};
pub use sync_service::{CollectionSource, CollectionSyncService, LockRegistry};
