//! Shared change-log merging for stores read by multiple named consumers
//! (e.g. a main application and an extension process on one on-disk store).
//!
//! Each consumer independently records how far it has merged; the log is
//! pruned at the low-water-mark — the minimum recorded timestamp across
//! all registered consumers — so no consumer ever loses unseen history.

use chrono::{DateTime, Utc};
use log::debug;

use crate::errors::Result;
use crate::model::ChangeLogEntry;
use crate::store::ChangeLogStore;

/// Outcome of one `merge_history` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub applied: usize,
    pub pruned: usize,
    pub merged_through: Option<DateTime<Utc>>,
}

/// Merges and prunes the persisted change log on behalf of one named
/// consumer. Runs once per process resume; deployments with no consumer
/// name configured skip the mechanism entirely.
pub struct HistoryMerger<'a, S: ChangeLogStore + ?Sized> {
    store: &'a S,
    consumer_name: Option<String>,
}

impl<'a, S: ChangeLogStore + ?Sized> HistoryMerger<'a, S> {
    pub fn new(store: &'a S, consumer_name: Option<String>) -> Self {
        Self {
            store,
            consumer_name,
        }
    }

    /// Apply every change-log entry newer than the low-water-mark to the
    /// caller's live view via `apply`, advance this consumer's recorded
    /// timestamp, and prune entries every consumer has merged.
    pub async fn merge_history<F>(&self, mut apply: F) -> Result<MergeOutcome>
    where
        F: FnMut(&ChangeLogEntry) -> Result<()>,
    {
        let Some(consumer) = self.consumer_name.as_deref() else {
            return Ok(MergeOutcome::default());
        };

        let timestamps = self.store.consumer_timestamps().await?;
        // No registered consumer yet: the mark is the unbounded past and
        // every entry replays.
        let low_water_mark = timestamps.values().min().copied();

        let entries = self.store.entries_after(low_water_mark).await?;
        let mut outcome = MergeOutcome::default();
        for entry in &entries {
            apply(entry)?;
            outcome.applied += 1;
            outcome.merged_through = Some(entry.timestamp);
        }

        // A caught-up consumer still registers: merging an empty (or fully
        // merged) log means it has seen everything up to the mark, and it
        // must hold back later prunes from that point on.
        let merged_through = outcome
            .merged_through
            .or(low_water_mark)
            .unwrap_or_else(Utc::now);
        outcome.merged_through = Some(merged_through);
        self.store
            .record_consumer_timestamp(consumer, merged_through)
            .await?;

        // Recompute across all consumers; this call may or may not have
        // moved the mark depending on who is furthest behind.
        let timestamps = self.store.consumer_timestamps().await?;
        if let Some(mark) = timestamps.values().min().copied() {
            outcome.pruned = self.store.prune_through(mark).await?;
        }

        debug!(
            "Merged change log for consumer '{}': {} applied, {} pruned",
            consumer, outcome.applied, outcome.pruned
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryChangeLog;
    use chrono::TimeZone;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("timestamp")
    }

    #[tokio::test]
    async fn prune_respects_the_low_water_mark() {
        let log = MemoryChangeLog::new();
        log.push_entry(1, ts(50)).await;
        log.push_entry(2, ts(80)).await;
        log.push_entry(3, ts(120)).await;
        log.set_consumer("app", ts(100)).await;
        log.set_consumer("extension", ts(60)).await;

        let merger = HistoryMerger::new(&log, Some("extension".to_string()));
        let outcome = merger.merge_history(|_| Ok(())).await.expect("merge");

        // Entries newer than min(100, 60) = 60 replay for the extension.
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.merged_through, Some(ts(120)));
        // New mark is min(100, 120) = 100: 50 and 80 go, 120 survives.
        assert_eq!(log.remaining_seqs().await, vec![3]);
        assert_eq!(log.consumer("extension").await, Some(ts(120)));
    }

    #[tokio::test]
    async fn entry_above_mark_survives_while_older_is_pruned() {
        let log = MemoryChangeLog::new();
        log.push_entry(1, ts(50)).await;
        log.push_entry(2, ts(80)).await;
        log.set_consumer("app", ts(100)).await;
        log.set_consumer("extension", ts(60)).await;

        // The app is already at 100; it applies the entry at 80 (above the
        // shared mark of 60) and its own timestamp stays at 100.
        let merger = HistoryMerger::new(&log, Some("app".to_string()));
        let outcome = merger.merge_history(|_| Ok(())).await.expect("merge");

        assert_eq!(outcome.applied, 1);
        // Mark stays min(100, 60) = 60: 80 survives for the extension.
        assert_eq!(log.remaining_seqs().await, vec![2]);
    }

    #[tokio::test]
    async fn merge_without_consumer_name_is_skipped() {
        let log = MemoryChangeLog::new();
        log.push_entry(1, ts(10)).await;

        let merger = HistoryMerger::new(&log, None);
        let outcome = merger.merge_history(|_| Ok(())).await.expect("merge");

        assert_eq!(outcome, MergeOutcome::default());
        assert_eq!(log.remaining_seqs().await, vec![1]);
    }

    #[tokio::test]
    async fn first_merge_registers_the_consumer() {
        let log = MemoryChangeLog::new();
        log.push_entry(1, ts(10)).await;
        log.push_entry(2, ts(20)).await;

        let merger = HistoryMerger::new(&log, Some("app".to_string()));
        let outcome = merger.merge_history(|_| Ok(())).await.expect("merge");

        assert_eq!(outcome.applied, 2);
        assert_eq!(log.consumer("app").await, Some(ts(20)));
        // Sole registered consumer has merged everything, so all entries
        // prune away.
        assert!(log.remaining_seqs().await.is_empty());
    }

    #[tokio::test]
    async fn empty_first_merge_still_registers_the_consumer() {
        let log = MemoryChangeLog::new();

        // The extension resumes before any entry exists. It must still
        // register so later prunes account for it.
        let extension = HistoryMerger::new(&log, Some("extension".to_string()));
        let outcome = extension.merge_history(|_| Ok(())).await.expect("merge");
        assert_eq!(outcome.applied, 0);
        let registered = log.consumer("extension").await.expect("registered");

        // An entry lands after registration and the app merges it away.
        log.push_entry(1, registered + chrono::Duration::seconds(10))
            .await;
        let app = HistoryMerger::new(&log, Some("app".to_string()));
        app.merge_history(|_| Ok(())).await.expect("app merge");

        // The mark is held at the extension's registration point, so the
        // entry it has not seen survives the app's prune and replays on
        // its next merge.
        assert_eq!(log.remaining_seqs().await, vec![1]);
        let outcome = extension
            .merge_history(|_| Ok(()))
            .await
            .expect("second merge");
        assert_eq!(outcome.applied, 1);
        assert!(log.remaining_seqs().await.is_empty());
    }

    #[tokio::test]
    async fn consumer_timestamp_never_moves_backward() {
        let log = MemoryChangeLog::new();
        log.set_consumer("app", ts(200)).await;
        log.set_consumer("extension", ts(10)).await;
        log.push_entry(1, ts(100)).await;

        // The app replays the entry at 100 (above the shared mark of 10)
        // but its recorded progress must not regress from 200.
        let merger = HistoryMerger::new(&log, Some("app".to_string()));
        merger.merge_history(|_| Ok(())).await.expect("merge");

        assert_eq!(log.consumer("app").await, Some(ts(200)));
    }

    #[tokio::test]
    async fn apply_failure_leaves_progress_unrecorded() {
        let log = MemoryChangeLog::new();
        log.push_entry(1, ts(10)).await;

        let merger = HistoryMerger::new(&log, Some("app".to_string()));
        let result = merger
            .merge_history(|_| {
                Err(crate::errors::Error::invalid_data("bad mutation payload"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(log.consumer("app").await, None);
        assert_eq!(log.remaining_seqs().await, vec![1]);
    }
}
