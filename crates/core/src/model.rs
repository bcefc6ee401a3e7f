//! Domain models for the local mirror and its shared change log.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// A decoded element from a remote collection response.
///
/// Every record exposes a stable unique integer id; the remaining fields
/// stay as decoded JSON and are interpreted by the owning domain manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: i64,
    pub fields: serde_json::Value,
}

impl RemoteRecord {
    /// Integer value of a foreign-key field, if present and integral.
    pub fn link_value(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(|value| value.as_i64())
    }
}

/// Decode a collection body into records.
///
/// Elements that are not objects or lack an integer `id_field` are dropped
/// individually; only a non-array envelope fails the batch.
pub fn decode_collection(body: &serde_json::Value, id_field: &str) -> Result<Vec<RemoteRecord>> {
    let items = body
        .as_array()
        .ok_or_else(|| Error::invalid_data("Collection envelope is not a JSON array"))?;

    let mut records = Vec::with_capacity(items.len());
    let mut dropped = 0usize;
    for item in items {
        let id = match item.get(id_field).and_then(|value| value.as_i64()) {
            Some(id) if item.is_object() => id,
            _ => {
                dropped += 1;
                continue;
            }
        };
        records.push(RemoteRecord {
            id,
            fields: item.clone(),
        });
    }
    if dropped > 0 {
        debug!("Dropped {} undecodable collection element(s)", dropped);
    }
    Ok(records)
}

/// A resolved parent reference stored on a child entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkTarget {
    pub collection: String,
    pub id: i64,
}

/// The stored mirror of a remote record, unique per (collection, id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorEntity {
    pub collection: String,
    pub id: i64,
    pub scope: Option<String>,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub links: BTreeMap<String, LinkTarget>,
}

impl MirrorEntity {
    /// Integer value of a foreign-key field on the stored payload.
    pub fn link_value(&self, field: &str) -> Option<i64> {
        self.payload.get(field).and_then(|value| value.as_i64())
    }
}

/// One object-level mutation inside an atomic store write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum MirrorWrite {
    Upsert {
        collection: String,
        id: i64,
        scope: Option<String>,
        payload: serde_json::Value,
    },
    Delete {
        collection: String,
        id: i64,
    },
    Link {
        child_collection: String,
        child_id: i64,
        field: String,
        parent_collection: String,
        parent_id: i64,
    },
}

/// An ordered, timestamped transaction recorded by the store and consumed
/// only by the history merger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    pub entry_id: String,
    pub seq: i64,
    pub timestamp: DateTime<Utc>,
    pub mutations: Vec<MirrorWrite>,
}

/// Foreign-key values touched during a reconcile pass that still need
/// their parent relationship resolved, keyed by field name. Transient:
/// owned by the calling domain manager between a sync and a link call.
pub type PendingLinks = BTreeMap<String, BTreeSet<i64>>;
