// src/transaction.rs
//! Per-entry transaction boundary pairing the dedup mark with the dispatch.
//!
//! The mark is written first and enlisted in a `TransactionScope`. A successful
//! dispatch (within the policy timeout, if any) commits the scope; a failed one
//! rolls it back by unmarking the key, which makes the entry eligible for
//! redelivery. A scope dropped while still open (the processing future was
//! cancelled) rolls back in the background.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dedup::{IdempotentRepository, RepositoryError};
use crate::key::DedupKey;

/// Presence of a policy on a feed turns the transaction boundary on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPolicy {
    /// Upper bound for the dispatch inside the transaction; exceeded means rollback.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TransactionPolicy {
    pub fn with_timeout_secs(secs: u64) -> Self {
        Self {
            timeout_secs: Some(secs),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

pub struct TransactionScope {
    repo: Arc<dyn IdempotentRepository>,
    source: String,
    key: DedupKey,
    open: bool,
}

impl TransactionScope {
    /// Enlist a freshly marked key.
    pub fn begin(repo: Arc<dyn IdempotentRepository>, source: &str, key: DedupKey) -> Self {
        Self {
            repo,
            source: source.to_string(),
            key,
            open: true,
        }
    }

    /// Keep the mark.
    pub fn commit(mut self) {
        self.open = false;
    }

    /// Remove the mark. If unmarking fails the mark stays and the entry will be
    /// skipped on redelivery.
    pub async fn rollback(mut self) -> Result<(), RepositoryError> {
        self.open = false;
        self.repo.unmark(&self.source, &self.key).await
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let repo = self.repo.clone();
        let source = std::mem::take(&mut self.source);
        let key = self.key.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                tracing::warn!(target: "pipeline", source = %source, key = %key, "transaction abandoned, rolling back");
                rt.spawn(async move {
                    if let Err(e) = repo.unmark(&source, &key).await {
                        tracing::error!(target: "pipeline", source = %source, key = %key, error = %e, "rollback of abandoned transaction failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!(target: "pipeline", source = %source, key = %key, "transaction abandoned outside a runtime, mark kept");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::{MarkOutcome, MemoryRepository};
    use chrono::{TimeZone, Utc};

    fn key() -> DedupKey {
        DedupKey::new("Aries", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    async fn marked() -> Arc<MemoryRepository> {
        let repo = Arc::new(MemoryRepository::default());
        assert_eq!(
            repo.check_and_mark("daily", &key()).await.unwrap(),
            MarkOutcome::NewlyMarked
        );
        repo
    }

    #[tokio::test]
    async fn commit_keeps_mark() {
        let repo = marked().await;
        TransactionScope::begin(repo.clone(), "daily", key()).commit();
        assert!(repo.contains("daily", &key()).await.unwrap());
    }

    #[tokio::test]
    async fn rollback_removes_mark() {
        let repo = marked().await;
        TransactionScope::begin(repo.clone(), "daily", key())
            .rollback()
            .await
            .unwrap();
        assert!(!repo.contains("daily", &key()).await.unwrap());
    }

    #[tokio::test]
    async fn abandoned_scope_rolls_back() {
        let repo = marked().await;
        drop(TransactionScope::begin(repo.clone(), "daily", key()));
        // let the spawned rollback run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!repo.contains("daily", &key()).await.unwrap());
    }

    #[test]
    fn policy_timeout() {
        assert_eq!(TransactionPolicy::default().timeout(), None);
        assert_eq!(
            TransactionPolicy::with_timeout_secs(3).timeout(),
            Some(Duration::from_secs(3))
        );
    }
}
