//! SQLite-backed mirror of remote collections.
//!
//! Reads run on pooled connections; every `apply` batch goes through the
//! write actor as one immediate transaction that also appends a change-log
//! entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use uuid::Uuid;

use mirrorkit_core::{LinkTarget, MirrorEntity, MirrorStore, MirrorWrite, Result};

use crate::db::{get_connection, write_actor::WriteHandle, DbPool};
use crate::errors::StorageError;
use crate::models::{ts_to_db, ChangeLogEntryDB, EntityLinkDB, MirrorEntityDB};
use crate::schema::{change_log, entity_links, mirror_entities};

pub struct MirrorRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl MirrorRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Resolved parent references for the given children, keyed by child id.
    fn load_links(
        conn: &mut SqliteConnection,
        collection: &str,
        ids: &[i64],
    ) -> std::result::Result<HashMap<i64, BTreeMap<String, LinkTarget>>, StorageError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = entity_links::table
            .filter(entity_links::child_collection.eq(collection))
            .filter(entity_links::child_id.eq_any(ids.to_vec()))
            .load::<EntityLinkDB>(conn)?;

        let mut links: HashMap<i64, BTreeMap<String, LinkTarget>> = HashMap::new();
        for row in rows {
            links.entry(row.child_id).or_default().insert(
                row.field,
                LinkTarget {
                    collection: row.parent_collection,
                    id: row.parent_id,
                },
            );
        }
        Ok(links)
    }

    fn hydrate(
        conn: &mut SqliteConnection,
        collection: &str,
        rows: Vec<MirrorEntityDB>,
    ) -> std::result::Result<Vec<MirrorEntity>, StorageError> {
        let ids = rows.iter().map(|row| row.id).collect::<Vec<_>>();
        let mut links = Self::load_links(conn, collection, &ids)?;
        rows.into_iter()
            .map(|row| {
                let entity_links = links.remove(&row.id).unwrap_or_default();
                row.into_domain(entity_links)
            })
            .collect()
    }

    fn apply_write(
        conn: &mut SqliteConnection,
        write: &MirrorWrite,
        now: &str,
    ) -> std::result::Result<(), StorageError> {
        match write {
            MirrorWrite::Upsert {
                collection,
                id,
                scope,
                payload,
            } => {
                let row = MirrorEntityDB {
                    collection: collection.clone(),
                    id: *id,
                    scope: scope.clone(),
                    payload: serde_json::to_string(payload)?,
                    created_at: now.to_string(),
                    updated_at: now.to_string(),
                };
                diesel::insert_into(mirror_entities::table)
                    .values(&row)
                    .on_conflict((mirror_entities::collection, mirror_entities::id))
                    .do_update()
                    .set((
                        mirror_entities::scope.eq(&row.scope),
                        mirror_entities::payload.eq(&row.payload),
                        mirror_entities::updated_at.eq(&row.updated_at),
                    ))
                    .execute(conn)?;
            }
            MirrorWrite::Delete { collection, id } => {
                diesel::delete(
                    mirror_entities::table
                        .filter(mirror_entities::collection.eq(collection))
                        .filter(mirror_entities::id.eq(id)),
                )
                .execute(conn)?;
                diesel::delete(
                    entity_links::table
                        .filter(entity_links::child_collection.eq(collection))
                        .filter(entity_links::child_id.eq(id)),
                )
                .execute(conn)?;
            }
            MirrorWrite::Link {
                child_collection,
                child_id,
                field,
                parent_collection,
                parent_id,
            } => {
                let row = EntityLinkDB {
                    child_collection: child_collection.clone(),
                    child_id: *child_id,
                    field: field.clone(),
                    parent_collection: parent_collection.clone(),
                    parent_id: *parent_id,
                    created_at: now.to_string(),
                };
                diesel::insert_into(entity_links::table)
                    .values(&row)
                    .on_conflict((
                        entity_links::child_collection,
                        entity_links::child_id,
                        entity_links::field,
                    ))
                    .do_update()
                    .set((
                        entity_links::parent_collection.eq(&row.parent_collection),
                        entity_links::parent_id.eq(row.parent_id),
                    ))
                    .execute(conn)?;
            }
        }
        Ok(())
    }

    fn append_change_log(
        conn: &mut SqliteConnection,
        batch: &[MirrorWrite],
        now: &str,
    ) -> std::result::Result<(), StorageError> {
        let next_seq = change_log::table
            .select(max(change_log::seq))
            .first::<Option<i64>>(conn)?
            .unwrap_or(0)
            + 1;
        let row = ChangeLogEntryDB {
            entry_id: Uuid::now_v7().to_string(),
            seq: next_seq,
            timestamp: now.to_string(),
            mutations: serde_json::to_string(batch)?,
        };
        diesel::insert_into(change_log::table)
            .values(&row)
            .execute(conn)?;
        Ok(())
    }
}

#[async_trait]
impl MirrorStore for MirrorRepository {
    async fn fetch_in_scope(
        &self,
        collection: &str,
        scope: Option<&str>,
        ids: &[i64],
    ) -> Result<Vec<MirrorEntity>> {
        let mut conn = get_connection(&self.pool)?;
        let mut query = mirror_entities::table
            .filter(mirror_entities::collection.eq(collection))
            .filter(mirror_entities::id.eq_any(ids.to_vec()))
            .into_boxed();
        if let Some(scope) = scope {
            query = query.filter(mirror_entities::scope.eq(scope.to_string()));
        }
        let rows = query
            .order(mirror_entities::id.asc())
            .load::<MirrorEntityDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(Self::hydrate(&mut conn, collection, rows)?)
    }

    async fn fetch_stale_in_scope(
        &self,
        collection: &str,
        scope: Option<&str>,
        keep_ids: &[i64],
    ) -> Result<Vec<MirrorEntity>> {
        let mut conn = get_connection(&self.pool)?;
        let mut query = mirror_entities::table
            .filter(mirror_entities::collection.eq(collection))
            .filter(mirror_entities::id.ne_all(keep_ids.to_vec()))
            .into_boxed();
        if let Some(scope) = scope {
            query = query.filter(mirror_entities::scope.eq(scope.to_string()));
        }
        let rows = query
            .order(mirror_entities::id.asc())
            .load::<MirrorEntityDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(Self::hydrate(&mut conn, collection, rows)?)
    }

    async fn fetch_children_by_field(
        &self,
        collection: &str,
        field: &str,
        parent_ids: &[i64],
        scope: Option<&str>,
    ) -> Result<Vec<MirrorEntity>> {
        let mut conn = get_connection(&self.pool)?;
        let mut query = mirror_entities::table
            .filter(mirror_entities::collection.eq(collection))
            .into_boxed();
        if let Some(scope) = scope {
            query = query.filter(mirror_entities::scope.eq(scope.to_string()));
        }
        let rows = query
            .order(mirror_entities::id.asc())
            .load::<MirrorEntityDB>(&mut conn)
            .map_err(StorageError::from)?;
        // Foreign-key values live inside the JSON payload, so the candidate
        // filter runs after hydration; the stable sort keeps ties in id
        // order.
        let mut children = Self::hydrate(&mut conn, collection, rows)?
            .into_iter()
            .filter(|entity| {
                entity
                    .link_value(field)
                    .map(|value| parent_ids.contains(&value))
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>();
        let field = field.to_string();
        children.sort_by_key(|entity| entity.link_value(&field));
        Ok(children)
    }

    async fn apply(&self, batch: Vec<MirrorWrite>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.writer
            .exec(move |conn| {
                let now = ts_to_db(Utc::now());
                for write in &batch {
                    Self::apply_write(conn, write, &now)?;
                }
                Self::append_change_log(conn, &batch, &now)
            })
            .await
    }
}
