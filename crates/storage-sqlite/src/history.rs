//! Persistence for the shared change log and per-consumer merge progress.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::debug;

use mirrorkit_core::{ChangeLogEntry, ChangeLogStore, Result};

use crate::db::{get_connection, write_actor::WriteHandle, DbPool};
use crate::errors::StorageError;
use crate::models::{ts_from_db, ts_to_db, ChangeLogEntryDB, ConsumerTimestampDB};
use crate::schema::{change_log, consumer_timestamps};

pub struct HistoryRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl HistoryRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl ChangeLogStore for HistoryRepository {
    async fn consumer_timestamps(&self) -> Result<BTreeMap<String, DateTime<Utc>>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = consumer_timestamps::table
            .load::<ConsumerTimestampDB>(&mut conn)
            .map_err(StorageError::from)?;

        let mut timestamps = BTreeMap::new();
        for row in rows {
            timestamps.insert(row.consumer, ts_from_db(&row.merged_through)?);
        }
        Ok(timestamps)
    }

    async fn entries_after(&self, mark: Option<DateTime<Utc>>) -> Result<Vec<ChangeLogEntry>> {
        let mut conn = get_connection(&self.pool)?;
        let mut query = change_log::table.into_boxed();
        if let Some(mark) = mark {
            query = query.filter(change_log::timestamp.gt(ts_to_db(mark)));
        }
        let rows = query
            .order((change_log::timestamp.asc(), change_log::seq.asc()))
            .load::<ChangeLogEntryDB>(&mut conn)
            .map_err(StorageError::from)?;

        rows.into_iter()
            .map(|row| Ok(row.into_domain()?))
            .collect()
    }

    async fn record_consumer_timestamp(
        &self,
        consumer: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let consumer = consumer.to_string();
        self.writer
            .exec(move |conn| {
                let existing = consumer_timestamps::table
                    .find(&consumer)
                    .first::<ConsumerTimestampDB>(conn)
                    .optional()?;

                // Progress never moves backwards.
                if let Some(row) = &existing {
                    if ts_from_db(&row.merged_through)? >= timestamp {
                        return Ok(());
                    }
                }

                let now = ts_to_db(Utc::now());
                let row = ConsumerTimestampDB {
                    consumer: consumer.clone(),
                    merged_through: ts_to_db(timestamp),
                    updated_at: now.clone(),
                };
                diesel::insert_into(consumer_timestamps::table)
                    .values(&row)
                    .on_conflict(consumer_timestamps::consumer)
                    .do_update()
                    .set((
                        consumer_timestamps::merged_through.eq(&row.merged_through),
                        consumer_timestamps::updated_at.eq(&row.updated_at),
                    ))
                    .execute(conn)?;
                Ok(())
            })
            .await
    }

    async fn prune_through(&self, mark: DateTime<Utc>) -> Result<usize> {
        let pruned = self
            .writer
            .exec(move |conn| {
                let deleted = diesel::delete(
                    change_log::table.filter(change_log::timestamp.le(ts_to_db(mark))),
                )
                .execute(conn)?;
                Ok(deleted)
            })
            .await?;
        if pruned > 0 {
            debug!("Pruned {} merged change-log entr(ies)", pruned);
        }
        Ok(pruned)
    }
}
