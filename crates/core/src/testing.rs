//! In-memory store implementations for core tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::errors::{DatabaseError, Result};
use crate::model::{ChangeLogEntry, LinkTarget, MirrorEntity, MirrorWrite};
use crate::store::{ChangeLogStore, MirrorStore};

/// Map-backed `MirrorStore` recording every applied batch.
pub struct MemoryStore {
    entities: Mutex<BTreeMap<(String, i64), MirrorEntity>>,
    batches: Mutex<Vec<Vec<MirrorWrite>>>,
    fail_apply: Mutex<Option<DatabaseError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entities: Mutex::new(BTreeMap::new()),
            batches: Mutex::new(Vec::new()),
            fail_apply: Mutex::new(None),
        }
    }

    pub async fn seed(
        &self,
        collection: &str,
        scope: Option<&str>,
        id: i64,
        payload: serde_json::Value,
    ) {
        self.entities.lock().await.insert(
            (collection.to_string(), id),
            MirrorEntity {
                collection: collection.to_string(),
                id,
                scope: scope.map(str::to_string),
                payload,
                links: BTreeMap::new(),
            },
        );
    }

    pub async fn get(&self, collection: &str, id: i64) -> Option<MirrorEntity> {
        self.entities
            .lock()
            .await
            .get(&(collection.to_string(), id))
            .cloned()
    }

    pub async fn ids(&self, collection: &str) -> Vec<i64> {
        self.entities
            .lock()
            .await
            .values()
            .filter(|entity| entity.collection == collection)
            .map(|entity| entity.id)
            .collect()
    }

    pub async fn dump(&self, collection: &str) -> Vec<MirrorEntity> {
        self.entities
            .lock()
            .await
            .values()
            .filter(|entity| entity.collection == collection)
            .cloned()
            .collect()
    }

    pub async fn applied_batches(&self) -> Vec<Vec<MirrorWrite>> {
        self.batches.lock().await.clone()
    }

    /// Make the next `apply` fail with `error`.
    pub async fn set_apply_error(&self, error: DatabaseError) {
        *self.fail_apply.lock().await = Some(error);
    }
}

fn scope_matches(entity: &MirrorEntity, scope: Option<&str>) -> bool {
    match scope {
        Some(value) => entity.scope.as_deref() == Some(value),
        None => true,
    }
}

#[async_trait]
impl MirrorStore for MemoryStore {
    async fn fetch_in_scope(
        &self,
        collection: &str,
        scope: Option<&str>,
        ids: &[i64],
    ) -> Result<Vec<MirrorEntity>> {
        let entities = self.entities.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| entities.get(&(collection.to_string(), *id)))
            .filter(|entity| scope_matches(entity, scope))
            .cloned()
            .collect())
    }

    async fn fetch_stale_in_scope(
        &self,
        collection: &str,
        scope: Option<&str>,
        keep_ids: &[i64],
    ) -> Result<Vec<MirrorEntity>> {
        let entities = self.entities.lock().await;
        Ok(entities
            .values()
            .filter(|entity| {
                entity.collection == collection
                    && scope_matches(entity, scope)
                    && !keep_ids.contains(&entity.id)
            })
            .cloned()
            .collect())
    }

    async fn fetch_children_by_field(
        &self,
        collection: &str,
        field: &str,
        parent_ids: &[i64],
        scope: Option<&str>,
    ) -> Result<Vec<MirrorEntity>> {
        let entities = self.entities.lock().await;
        let mut children: Vec<MirrorEntity> = entities
            .values()
            .filter(|entity| {
                entity.collection == collection
                    && scope_matches(entity, scope)
                    && entity
                        .link_value(field)
                        .map(|value| parent_ids.contains(&value))
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        children.sort_by_key(|entity| entity.link_value(field));
        Ok(children)
    }

    async fn apply(&self, batch: Vec<MirrorWrite>) -> Result<()> {
        if let Some(error) = self.fail_apply.lock().await.take() {
            return Err(error.into());
        }

        let mut entities = self.entities.lock().await;
        for write in &batch {
            match write {
                MirrorWrite::Upsert {
                    collection,
                    id,
                    scope,
                    payload,
                } => {
                    let key = (collection.clone(), *id);
                    match entities.get_mut(&key) {
                        Some(existing) => {
                            existing.scope = scope.clone();
                            existing.payload = payload.clone();
                        }
                        None => {
                            entities.insert(
                                key,
                                MirrorEntity {
                                    collection: collection.clone(),
                                    id: *id,
                                    scope: scope.clone(),
                                    payload: payload.clone(),
                                    links: BTreeMap::new(),
                                },
                            );
                        }
                    }
                }
                MirrorWrite::Delete { collection, id } => {
                    entities.remove(&(collection.clone(), *id));
                }
                MirrorWrite::Link {
                    child_collection,
                    child_id,
                    field,
                    parent_collection,
                    parent_id,
                } => {
                    if let Some(child) =
                        entities.get_mut(&(child_collection.clone(), *child_id))
                    {
                        child.links.insert(
                            field.clone(),
                            LinkTarget {
                                collection: parent_collection.clone(),
                                id: *parent_id,
                            },
                        );
                    }
                }
            }
        }
        self.batches.lock().await.push(batch);
        Ok(())
    }
}

/// Map-backed `ChangeLogStore`.
pub struct MemoryChangeLog {
    entries: Mutex<Vec<ChangeLogEntry>>,
    consumers: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl MemoryChangeLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            consumers: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn push_entry(&self, seq: i64, timestamp: DateTime<Utc>) {
        self.entries.lock().await.push(ChangeLogEntry {
            entry_id: format!("entry-{}", seq),
            seq,
            timestamp,
            mutations: Vec::new(),
        });
    }

    pub async fn set_consumer(&self, consumer: &str, timestamp: DateTime<Utc>) {
        self.consumers
            .lock()
            .await
            .insert(consumer.to_string(), timestamp);
    }

    pub async fn remaining_seqs(&self) -> Vec<i64> {
        self.entries.lock().await.iter().map(|e| e.seq).collect()
    }

    pub async fn consumer(&self, name: &str) -> Option<DateTime<Utc>> {
        self.consumers.lock().await.get(name).copied()
    }
}

#[async_trait]
impl ChangeLogStore for MemoryChangeLog {
    async fn consumer_timestamps(&self) -> Result<BTreeMap<String, DateTime<Utc>>> {
        Ok(self.consumers.lock().await.clone())
    }

    async fn entries_after(&self, mark: Option<DateTime<Utc>>) -> Result<Vec<ChangeLogEntry>> {
        let mut matching: Vec<ChangeLogEntry> = self
            .entries
            .lock()
            .await
            .iter()
            .filter(|entry| mark.map(|m| entry.timestamp > m).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by_key(|entry| entry.timestamp);
        Ok(matching)
    }

    async fn record_consumer_timestamp(
        &self,
        consumer: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let mut consumers = self.consumers.lock().await;
        let entry = consumers
            .entry(consumer.to_string())
            .or_insert(timestamp);
        if timestamp > *entry {
            *entry = timestamp;
        }
        Ok(())
    }

    async fn prune_through(&self, mark: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|entry| entry.timestamp > mark);
        Ok(before - entries.len())
    }
}
