// src/processor.rs
//! Processing stage: one entry at a time through
//! `Received -> Keyed -> DedupChecked -> {Skipped | Extracted -> Built -> Dispatched} -> Done`,
//! or `Failed`. Runs as a pool of workers sharing one queue receiver.
//!
//! For any dedup key a record is built and dispatched at most once, however
//! often the entry is delivered: the atomic check-and-mark lets exactly one
//! delivery through, and a failed dispatch unmarks the key so a later
//! delivery can try again. A transaction policy adds a dispatch timeout and
//! rolls the mark back when processing is cancelled mid-dispatch.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::dedup::{IdempotentRepository, MarkOutcome, RepositoryError};
use crate::extract::TextExtractor;
use crate::ingest::queue::{Delivery, QueueReceiver, WeakFeedQueue};
use crate::ingest::types::RawEntry;
use crate::key::{DedupKey, EntryKeyExtractor, KeyError};
use crate::record::RecordBuilder;
use crate::sink::{RecordSink, SinkError};
use crate::stats::PipelineStats;
use crate::transaction::{TransactionPolicy, TransactionScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Received,
    Keyed,
    DedupChecked,
    Skipped,
    Extracted,
    Built,
    Dispatched,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Dispatched(DedupKey),
    Skipped(DedupKey),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("dispatch timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    /// Cannot be keyed, so cannot be deduplicated; reported and dropped.
    #[error("data quality: {0}")]
    DataQuality(#[from] KeyError),
    /// Nothing was marked; safe to redeliver.
    #[error("dedup check for {key} failed: {source}")]
    Repository {
        key: DedupKey,
        #[source]
        source: RepositoryError,
    },
    #[error("dispatch of {key} failed (rolled back: {rolled_back}): {source}")]
    Dispatch {
        key: DedupKey,
        rolled_back: bool,
        #[source]
        source: DispatchError,
    },
}

impl ProcessError {
    /// State the entry was leaving when it failed.
    pub fn state(&self) -> EntryState {
        match self {
            ProcessError::DataQuality(_) => EntryState::Received,
            ProcessError::Repository { .. } => EntryState::Keyed,
            ProcessError::Dispatch { .. } => EntryState::Built,
        }
    }

    /// Whether another delivery of the same entry may still produce a record.
    pub fn is_redeliverable(&self) -> bool {
        match self {
            ProcessError::DataQuality(_) => false,
            ProcessError::Repository { .. } => true,
            ProcessError::Dispatch { rolled_back, .. } => *rolled_back,
        }
    }

    pub fn key(&self) -> Option<&DedupKey> {
        match self {
            ProcessError::DataQuality(_) => None,
            ProcessError::Repository { key, .. } | ProcessError::Dispatch { key, .. } => Some(key),
        }
    }
}

pub struct Processor {
    feed: String,
    repo: Arc<dyn IdempotentRepository>,
    keys: EntryKeyExtractor,
    text: TextExtractor,
    builder: RecordBuilder,
    sink: Arc<dyn RecordSink>,
    transaction: Option<TransactionPolicy>,
    stats: Arc<PipelineStats>,
    max_redeliveries: u32,
    redelivery_delay: Duration,
}

impl Processor {
    pub fn new(
        feed: &str,
        repo: Arc<dyn IdempotentRepository>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            feed: feed.to_string(),
            repo,
            keys: EntryKeyExtractor::default(),
            text: TextExtractor::default(),
            builder: RecordBuilder,
            sink,
            transaction: None,
            stats: Arc::new(PipelineStats::default()),
            max_redeliveries: 0,
            redelivery_delay: Duration::from_secs(1),
        }
    }

    pub fn with_transaction(mut self, policy: Option<TransactionPolicy>) -> Self {
        self.transaction = policy;
        self
    }

    pub fn with_keys(mut self, keys: EntryKeyExtractor) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_text_extractor(mut self, text: TextExtractor) -> Self {
        self.text = text;
        self
    }

    pub fn with_stats(mut self, stats: Arc<PipelineStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_redelivery(mut self, max: u32, delay: Duration) -> Self {
        self.max_redeliveries = max;
        self.redelivery_delay = delay;
        self
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    fn trace_state(&self, state: EntryState, key: Option<&DedupKey>) {
        tracing::trace!(target: "pipeline", source = %self.feed, state = ?state, key = ?key.map(|k| k.to_string()));
    }

    /// Run one entry through the state machine.
    pub async fn process(&self, entry: &RawEntry) -> Result<Outcome, ProcessError> {
        self.trace_state(EntryState::Received, None);

        let key = self.keys.extract(&entry.title, entry.published)?;
        self.trace_state(EntryState::Keyed, Some(&key));

        let marked = self
            .repo
            .check_and_mark(&self.feed, &key)
            .await
            .map_err(|source| ProcessError::Repository {
                key: key.clone(),
                source,
            })?;
        self.trace_state(EntryState::DedupChecked, Some(&key));
        if marked == MarkOutcome::AlreadyPresent {
            self.trace_state(EntryState::Skipped, Some(&key));
            return Ok(Outcome::Skipped(key));
        }

        let scope = self
            .transaction
            .map(|_| TransactionScope::begin(self.repo.clone(), &self.feed, key.clone()));

        let excerpt = self.text.excerpt(&entry.body_markup);
        self.trace_state(EntryState::Extracted, Some(&key));
        let record = self.builder.build(&self.feed, &entry.title, &key, excerpt);
        self.trace_state(EntryState::Built, Some(&key));

        let delivered = match self.transaction.and_then(|p| p.timeout()) {
            Some(limit) => match tokio::time::timeout(limit, self.sink.deliver(&record)).await {
                Ok(r) => r.map_err(DispatchError::from),
                Err(_) => Err(DispatchError::Timeout(limit)),
            },
            None => self.sink.deliver(&record).await.map_err(DispatchError::from),
        };

        match delivered {
            Ok(()) => {
                if let Some(scope) = scope {
                    scope.commit();
                }
                self.trace_state(EntryState::Dispatched, Some(&key));
                Ok(Outcome::Dispatched(key))
            }
            Err(source) => {
                let undone = match scope {
                    Some(scope) => scope.rollback().await,
                    None => self.repo.unmark(&self.feed, &key).await,
                };
                let rolled_back = match undone {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(target: "pipeline", source = %self.feed, key = %key, error = %e, "rollback failed, mark kept");
                        false
                    }
                };
                self.trace_state(EntryState::Failed, Some(&key));
                Err(ProcessError::Dispatch {
                    key,
                    rolled_back,
                    source,
                })
            }
        }
    }

    /// Process one delivery and report it: structured event, counters and stats.
    /// Redeliverable failures go back onto the queue after a delay, up to
    /// `max_redeliveries` times.
    pub async fn handle(&self, delivery: Delivery, requeue: &Arc<WeakFeedQueue>) {
        let feed = self.feed.clone();
        match self.process(&delivery.entry).await {
            Ok(Outcome::Dispatched(key)) => {
                self.stats.record_dispatched();
                counter!("feed_entries_dispatched_total", "source" => feed.clone()).increment(1);
                tracing::info!(target: "pipeline", source = %feed, event = "entry", key = %key, outcome = "dispatched");
            }
            Ok(Outcome::Skipped(key)) => {
                self.stats.record_skipped();
                counter!("feed_entries_skipped_total", "source" => feed.clone()).increment(1);
                tracing::info!(target: "pipeline", source = %feed, event = "entry", key = %key, outcome = "skipped");
            }
            Err(e @ ProcessError::DataQuality(_)) => {
                self.stats.record_rejected();
                counter!("feed_entries_rejected_total", "source" => feed.clone()).increment(1);
                tracing::warn!(
                    target: "pipeline",
                    source = %feed,
                    event = "entry",
                    title = %delivery.entry.title,
                    outcome = "rejected",
                    error = %e
                );
            }
            Err(e) => {
                self.stats.record_failed();
                counter!("feed_entries_failed_total", "source" => feed.clone()).increment(1);
                let key = e.key().map(|k| k.to_string()).unwrap_or_default();
                tracing::warn!(
                    target: "pipeline",
                    source = %feed,
                    event = "entry",
                    key = %key,
                    outcome = "failed",
                    state = ?e.state(),
                    attempt = delivery.attempt,
                    error = %e
                );
                if e.is_redeliverable() && delivery.attempt < self.max_redeliveries {
                    self.schedule_redelivery(delivery, requeue.clone());
                }
            }
        }
        self.trace_state(EntryState::Done, None);
    }

    fn schedule_redelivery(&self, delivery: Delivery, requeue: Arc<WeakFeedQueue>) {
        let stats = self.stats.clone();
        let feed = self.feed.clone();
        let delay = self.redelivery_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let attempt = delivery.attempt + 1;
            match requeue.redeliver(delivery.next_attempt()).await {
                Ok(()) => {
                    stats.record_redelivered();
                    counter!("feed_entries_redelivered_total", "source" => feed.clone()).increment(1);
                    tracing::info!(target: "pipeline", source = %feed, event = "entry", attempt, outcome = "redelivered");
                }
                Err(e) => {
                    tracing::warn!(target: "pipeline", source = %feed, attempt, error = %e, "redelivery dropped; source will redeliver on a later poll");
                }
            }
        });
    }
}

/// Spawn `workers` tasks draining `rx`. They exit once the queue is closed and empty.
pub fn spawn_workers(
    processor: Arc<Processor>,
    rx: Arc<QueueReceiver>,
    requeue: Arc<WeakFeedQueue>,
    workers: usize,
) -> Vec<JoinHandle<()>> {
    (0..workers.max(1))
        .map(|worker| {
            let processor = processor.clone();
            let rx = rx.clone();
            let requeue = requeue.clone();
            tokio::spawn(async move {
                while let Some(delivery) = rx.pop().await {
                    processor.handle(delivery, &requeue).await;
                }
                tracing::debug!(target: "pipeline", source = processor.feed(), worker, "worker stopped");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::MemoryRepository;
    use crate::ingest::queue::{feed_queue, QueuePolicy};
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    fn jan1() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn entry(title: &str, body: &str) -> RawEntry {
        RawEntry::new(title, Some(jan1()), body)
    }

    fn setup(tx: Option<TransactionPolicy>) -> (Processor, Arc<MemoryRepository>, Arc<MemorySink>) {
        let repo = Arc::new(MemoryRepository::default());
        let sink = Arc::new(MemorySink::new());
        let p = Processor::new("daily", repo.clone(), sink.clone()).with_transaction(tx);
        (p, repo, sink)
    }

    #[tokio::test]
    async fn same_entry_twice_dispatches_once() {
        let (p, _repo, sink) = setup(None);
        let e = entry("Aries Today", "<p>Go.</p>");
        assert!(matches!(p.process(&e).await.unwrap(), Outcome::Dispatched(_)));
        assert!(matches!(p.process(&e).await.unwrap(), Outcome::Skipped(_)));
        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(sink.delivered()[0].excerpt, "Go.");
    }

    #[tokio::test]
    async fn malformed_markup_still_dispatches() {
        let (p, _repo, sink) = setup(None);
        p.process(&entry("Leo Today", "<div><broken")).await.unwrap();
        assert_eq!(sink.delivered()[0].excerpt, "");
    }

    #[tokio::test]
    async fn failed_dispatch_rolls_back_with_transaction() {
        let (p, repo, sink) = setup(Some(TransactionPolicy::default()));
        sink.set_failing(true);
        let e = entry("Virgo Today", "<p>x</p>");

        let err = p.process(&e).await.unwrap_err();
        assert!(err.is_redeliverable());
        assert_eq!(err.state(), EntryState::Built);
        let key = err.key().cloned().unwrap();
        assert!(!repo.contains("daily", &key).await.unwrap());

        sink.set_failing(false);
        assert!(matches!(p.process(&e).await.unwrap(), Outcome::Dispatched(_)));
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn failed_dispatch_unmarks_without_transaction() {
        let (p, repo, sink) = setup(None);
        sink.set_failing(true);
        let e = entry("Virgo Today", "<p>x</p>");
        let err = p.process(&e).await.unwrap_err();
        assert!(err.is_redeliverable());
        assert!(!repo.contains("daily", err.key().unwrap()).await.unwrap());

        sink.set_failing(false);
        assert!(matches!(p.process(&e).await.unwrap(), Outcome::Dispatched(_)));
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn unkeyable_entry_is_data_quality_error() {
        let (p, _repo, sink) = setup(None);
        let no_date = RawEntry::new("Aries Today", None, "");
        assert!(matches!(
            p.process(&no_date).await,
            Err(ProcessError::DataQuality(KeyError::MissingDate { .. }))
        ));
        assert!(matches!(
            p.process(&entry("Market news", "")).await,
            Err(ProcessError::DataQuality(KeyError::UnknownSign { .. }))
        ));
        assert!(sink.delivered().is_empty());
    }

    struct DownRepo;

    #[async_trait]
    impl IdempotentRepository for DownRepo {
        async fn check_and_mark(&self, _: &str, _: &DedupKey) -> Result<MarkOutcome, RepositoryError> {
            Err(RepositoryError::Unavailable("down".into()))
        }
        async fn unmark(&self, _: &str, _: &DedupKey) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn contains(&self, _: &str, _: &DedupKey) -> Result<bool, RepositoryError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn repository_outage_is_transient() {
        let sink = Arc::new(MemorySink::new());
        let p = Processor::new("daily", Arc::new(DownRepo), sink.clone());
        let err = p.process(&entry("Leo Today", "")).await.unwrap_err();
        assert!(matches!(err, ProcessError::Repository { .. }));
        assert!(err.is_redeliverable());
        assert!(sink.delivered().is_empty());
    }

    struct SlowSink;

    #[async_trait]
    impl RecordSink for SlowSink {
        async fn deliver(&self, _: &crate::record::HoroscopeRecord) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_timeout_rolls_back() {
        let repo = Arc::new(MemoryRepository::default());
        let p = Processor::new("daily", repo.clone(), Arc::new(SlowSink))
            .with_transaction(Some(TransactionPolicy::with_timeout_secs(5)));
        let err = p.process(&entry("Libra Today", "")).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Dispatch {
                source: DispatchError::Timeout(_),
                rolled_back: true,
                ..
            }
        ));
        assert!(!repo.contains("daily", err.key().unwrap()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn workers_redeliver_until_sink_recovers() {
        let repo = Arc::new(MemoryRepository::default());
        let sink = Arc::new(MemorySink::new());
        sink.set_failing(true);
        let processor = Arc::new(
            Processor::new("daily", repo, sink.clone())
                .with_transaction(Some(TransactionPolicy::default()))
                .with_redelivery(3, Duration::from_secs(1)),
        );
        let (q, rx) = feed_queue("daily", QueuePolicy::Unbounded);
        let handles = spawn_workers(processor.clone(), Arc::new(rx), Arc::new(q.downgrade()), 2);

        q.push_batch(vec![entry("Gemini Today", "<p>Talk.</p>")]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        sink.set_failing(false);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(sink.delivered().len(), 1);
        let snap = processor.stats().snapshot();
        assert!(snap.failed >= 1);
        assert!(snap.redelivered >= 1);
        assert_eq!(snap.dispatched, 1);

        drop(q);
        for h in handles {
            h.await.unwrap();
        }
    }
}
