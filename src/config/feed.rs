// src/config/feed.rs
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::ingest::queue::QueuePolicy;
use crate::transaction::TransactionPolicy;

fn default_poll_interval_secs() -> u64 {
    300
}
fn default_workers() -> usize {
    1
}
fn default_max_redeliveries() -> u32 {
    3
}

/// One configured feed: where entries come from, where records go, and how
/// the stages between them behave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSourceConfig {
    /// Unique per router; also names the queue and the dedup namespace.
    pub name: String,
    pub source_uri: String,
    pub target_uri: String,
    /// When set, the dispatch runs inside a transaction scope: bounded by the
    /// policy timeout and rolled back if processing is cancelled.
    #[serde(default)]
    pub transaction: Option<TransactionPolicy>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How often a failed entry is pushed back onto the queue.
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
    #[serde(default)]
    pub queue: QueuePolicy,
    /// Longest excerpt kept, in characters; the extractor default when unset.
    #[serde(default)]
    pub excerpt_max_chars: Option<usize>,
}

impl FeedSourceConfig {
    pub fn new(
        name: impl Into<String>,
        source_uri: impl Into<String>,
        target_uri: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_uri: source_uri.into(),
            target_uri: target_uri.into(),
            transaction: None,
            poll_interval_secs: default_poll_interval_secs(),
            workers: default_workers(),
            max_redeliveries: default_max_redeliveries(),
            queue: QueuePolicy::default(),
            excerpt_max_chars: None,
        }
    }

    pub fn with_transaction(mut self, policy: TransactionPolicy) -> Self {
        self.transaction = Some(policy);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue(mut self, queue: QueuePolicy) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_max_redeliveries(mut self, n: u32) -> Self {
        self.max_redeliveries = n;
        self
    }

    pub fn with_excerpt_max_chars(mut self, n: usize) -> Self {
        self.excerpt_max_chars = Some(n);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = self.name.trim();
        let missing = |field| ConfigError::MissingField {
            source_name: name.to_string(),
            field,
        };
        if name.is_empty() {
            return Err(missing("name"));
        }
        if self.source_uri.trim().is_empty() {
            return Err(missing("source_uri"));
        }
        if self.target_uri.trim().is_empty() {
            return Err(missing("target_uri"));
        }

        let invalid = |reason: &str| ConfigError::Invalid {
            source_name: name.to_string(),
            reason: reason.to_string(),
        };
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs must be > 0"));
        }
        if self.workers == 0 {
            return Err(invalid("workers must be >= 1"));
        }
        if let QueuePolicy::Bounded { capacity: 0, .. } = self.queue {
            return Err(invalid("bounded queue capacity must be > 0"));
        }
        if let Some(TransactionPolicy {
            timeout_secs: Some(0),
        }) = self.transaction
        {
            return Err(invalid("transaction timeout_secs must be > 0"));
        }
        if self.excerpt_max_chars == Some(0) {
            return Err(invalid("excerpt_max_chars must be > 0"));
        }
        Ok(())
    }
}
