// src/stats.rs
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-feed runtime counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    polls: AtomicU64,
    poll_errors: AtomicU64,
    queued: AtomicU64,
    dispatched: AtomicU64,
    skipped: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    redelivered: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub polls: u64,
    pub poll_errors: u64,
    pub queued: u64,
    pub dispatched: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub failed: u64,
    pub redelivered: u64,
}

impl StatsSnapshot {
    /// Entries that reached a final state (anything popped and not redelivered).
    pub fn settled(&self) -> u64 {
        self.dispatched + self.skipped + self.rejected + self.failed
    }
}

impl PipelineStats {
    pub(crate) fn record_poll(&self, queued: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.queued.fetch_add(queued as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_poll_error(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redelivered(&self) {
        self.redelivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
        }
    }
}
