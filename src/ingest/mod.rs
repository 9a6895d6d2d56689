// src/ingest/mod.rs
//! Poll stage: fetch a feed document, split it into entries and queue them.
//! No dedup happens here; a redelivering source simply queues the same
//! entries again and the processing stage skips them.

pub mod providers;
pub mod queue;
pub mod scheduler;
pub mod types;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use thiserror::Error;

use crate::ingest::queue::{FeedQueue, QueueError};
use crate::ingest::types::FeedSource;
use crate::stats::PipelineStats;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_polls_total", "Poll attempts per feed.");
        describe_counter!("feed_poll_errors_total", "Poll attempts abandoned on fetch/parse errors.");
        describe_counter!("feed_entries_queued_total", "Entries handed to the internal queue.");
        describe_counter!("feed_queue_rejected_total", "Poll batches refused by a full or closed queue.");
        describe_counter!("feed_entries_dispatched_total", "Records delivered to the sink.");
        describe_counter!("feed_entries_skipped_total", "Entries skipped as already processed.");
        describe_counter!("feed_entries_rejected_total", "Entries dropped for data-quality errors.");
        describe_counter!("feed_entries_failed_total", "Entries failed on repository or sink errors.");
        describe_counter!("feed_entries_redelivered_total", "Failed entries pushed back onto the queue.");
        describe_histogram!("feed_poll_parse_ms", "Feed document parse time in milliseconds.");
        describe_gauge!("feed_last_poll_ts", "Unix ts of the last successful poll.");
    });
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("fetch failed: {0:#}")]
    Fetch(#[from] anyhow::Error),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Run one poll cycle. The whole document is fetched and split before the first
/// push, and the batch push is all-or-nothing, so a failed or cancelled cycle
/// leaves nothing partially queued. Returns the number of entries queued.
pub async fn poll_once(
    source: &dyn FeedSource,
    queue: &FeedQueue,
    stats: &PipelineStats,
) -> Result<usize, PollError> {
    ensure_metrics_described();
    let feed = queue.name().to_string();
    counter!("feed_polls_total", "source" => feed.clone()).increment(1);

    let entries = match source.fetch().await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                target: "ingest",
                source = %feed,
                event = "poll",
                outcome = "fetch_failed",
                error = ?e,
                "poll abandoned"
            );
            counter!("feed_poll_errors_total", "source" => feed).increment(1);
            stats.record_poll_error();
            return Err(e.into());
        }
    };

    let n = match queue.push_batch(entries).await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(
                target: "ingest",
                source = %feed,
                event = "poll",
                outcome = "queue_rejected",
                error = %e,
                "poll batch not queued"
            );
            counter!("feed_queue_rejected_total", "source" => feed).increment(1);
            stats.record_poll_error();
            return Err(e.into());
        }
    };

    stats.record_poll(n);
    counter!("feed_entries_queued_total", "source" => feed.clone()).increment(n as u64);
    gauge!("feed_last_poll_ts", "source" => feed.clone())
        .set(chrono::Utc::now().timestamp().max(0) as f64);
    tracing::info!(
        target: "ingest",
        source = %feed,
        event = "poll",
        outcome = "queued",
        entries = n,
        "consuming from {feed}"
    );
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::queue::{feed_queue, OnFull, QueuePolicy};
    use crate::ingest::types::{RawEntry, StaticSource};

    fn two() -> Vec<RawEntry> {
        vec![
            RawEntry::new("Aries Today", None, ""),
            RawEntry::new("Taurus Today", None, ""),
        ]
    }

    #[tokio::test]
    async fn queues_every_entry_in_order() {
        let src = StaticSource::new(two());
        let (q, rx) = feed_queue("daily", QueuePolicy::Unbounded);
        let stats = PipelineStats::default();

        assert_eq!(poll_once(&src, &q, &stats).await.unwrap(), 2);
        assert_eq!(rx.pop().await.unwrap().entry.title, "Aries Today");
        assert_eq!(rx.pop().await.unwrap().entry.title, "Taurus Today");
        assert_eq!(stats.snapshot().queued, 2);
    }

    #[tokio::test]
    async fn failed_fetch_queues_nothing() {
        let src = StaticSource::new(two());
        src.set_failing(true);
        let (q, rx) = feed_queue("daily", QueuePolicy::Unbounded);
        let stats = PipelineStats::default();

        assert!(matches!(
            poll_once(&src, &q, &stats).await,
            Err(PollError::Fetch(_))
        ));
        drop(q);
        assert!(rx.pop().await.is_none());
        assert_eq!(stats.snapshot().poll_errors, 1);
    }

    #[tokio::test]
    async fn full_queue_rejects_the_poll() {
        let src = StaticSource::new(two());
        let policy = QueuePolicy::Bounded {
            capacity: 3,
            on_full: OnFull::Reject,
        };
        let (q, _rx) = feed_queue("daily", policy);
        let stats = PipelineStats::default();

        poll_once(&src, &q, &stats).await.unwrap();
        assert!(matches!(
            poll_once(&src, &q, &stats).await,
            Err(PollError::Queue(QueueError::Full { .. }))
        ));
        assert_eq!(stats.snapshot().queued, 2);
    }
}
