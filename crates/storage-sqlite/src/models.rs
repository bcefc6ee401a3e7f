//! Diesel row types and conversions to the core model.

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::prelude::*;
use std::collections::BTreeMap;

use mirrorkit_core::{ChangeLogEntry, LinkTarget, MirrorEntity};

use crate::errors::StorageError;
use crate::schema::{change_log, consumer_timestamps, entity_links, mirror_entities};

/// Fixed-width UTC encoding so lexicographic column comparison matches
/// chronological order.
pub(crate) fn ts_to_db(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_from_db(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidRow(format!("Bad timestamp '{}': {}", raw, e)))
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = mirror_entities)]
pub struct MirrorEntityDB {
    pub collection: String,
    pub id: i64,
    pub scope: Option<String>,
    pub payload: String,
    pub created_at: String,
    pub updated_at: String,
}

impl MirrorEntityDB {
    pub fn into_domain(
        self,
        links: BTreeMap<String, LinkTarget>,
    ) -> Result<MirrorEntity, StorageError> {
        let payload = serde_json::from_str(&self.payload)?;
        Ok(MirrorEntity {
            collection: self.collection,
            id: self.id,
            scope: self.scope,
            payload,
            links,
        })
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = entity_links)]
pub struct EntityLinkDB {
    pub child_collection: String,
    pub child_id: i64,
    pub field: String,
    pub parent_collection: String,
    pub parent_id: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = change_log)]
pub struct ChangeLogEntryDB {
    pub entry_id: String,
    pub seq: i64,
    pub timestamp: String,
    pub mutations: String,
}

impl ChangeLogEntryDB {
    pub fn into_domain(self) -> Result<ChangeLogEntry, StorageError> {
        let timestamp = ts_from_db(&self.timestamp)?;
        let mutations = serde_json::from_str(&self.mutations)?;
        Ok(ChangeLogEntry {
            entry_id: self.entry_id,
            seq: self.seq,
            timestamp,
            mutations,
        })
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = consumer_timestamps)]
pub struct ConsumerTimestampDB {
    pub consumer: String,
    pub merged_through: String,
    pub updated_at: String,
}
