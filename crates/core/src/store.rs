//! Store contracts implemented by the storage backends.
//!
//! The transactional object store itself is an external collaborator; the
//! core only assumes predicate-limited queries, unique-key lookups, and
//! atomic multi-object writes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::model::{ChangeLogEntry, MirrorEntity, MirrorWrite};

/// Query and write surface over the local mirror.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Entities of `collection` limited to `id ∈ ids AND scope`, sorted
    /// ascending by id.
    async fn fetch_in_scope(
        &self,
        collection: &str,
        scope: Option<&str>,
        ids: &[i64],
    ) -> Result<Vec<MirrorEntity>>;

    /// Entities of `collection` matching `scope` whose id is NOT in
    /// `keep_ids`, sorted ascending by id.
    async fn fetch_stale_in_scope(
        &self,
        collection: &str,
        scope: Option<&str>,
        keep_ids: &[i64],
    ) -> Result<Vec<MirrorEntity>>;

    /// Entities of `collection` whose payload `field` is an integer in
    /// `parent_ids`, sorted ascending by that field's value.
    async fn fetch_children_by_field(
        &self,
        collection: &str,
        field: &str,
        parent_ids: &[i64],
        scope: Option<&str>,
    ) -> Result<Vec<MirrorEntity>>;

    /// Apply a batch of mutations atomically. Implementations record one
    /// change-log entry per non-empty batch.
    async fn apply(&self, batch: Vec<MirrorWrite>) -> Result<()>;
}

/// Persistence surface for the shared change log and the per-consumer
/// merge-progress table.
#[async_trait]
pub trait ChangeLogStore: Send + Sync {
    /// All registered consumer names with their last merged timestamp.
    async fn consumer_timestamps(&self) -> Result<BTreeMap<String, DateTime<Utc>>>;

    /// Entries with `timestamp > mark`, ascending by timestamp. `None`
    /// means the unbounded past (no consumer registered yet).
    async fn entries_after(&self, mark: Option<DateTime<Utc>>) -> Result<Vec<ChangeLogEntry>>;

    /// Record `consumer`'s merge progress. Implementations keep the value
    /// monotonically non-decreasing.
    async fn record_consumer_timestamp(
        &self,
        consumer: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete every entry with `timestamp <= mark`; returns the count.
    async fn prune_through(&self, mark: DateTime<Utc>) -> Result<usize>;
}
