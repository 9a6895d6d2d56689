// src/dedup/mod.rs
//! Idempotent repository: answers "has this key already been processed?" with an
//! atomic check-and-mark, plus an `unmark` rollback hook.

pub mod journal;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::RepositoryConfig;
use crate::key::DedupKey;

pub use journal::JournalRepository;
pub use memory::MemoryRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    AlreadyPresent,
    NewlyMarked,
}

/// Backend failures. Always transient from the pipeline's point of view.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("repository io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt journal line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

/// Keyed by `(source, key)`. `check_and_mark` must be atomic for concurrent callers
/// on the same key: exactly one of them observes `NewlyMarked`.
#[async_trait]
pub trait IdempotentRepository: Send + Sync {
    async fn check_and_mark(
        &self,
        source: &str,
        key: &DedupKey,
    ) -> Result<MarkOutcome, RepositoryError>;

    async fn unmark(&self, source: &str, key: &DedupKey) -> Result<(), RepositoryError>;

    async fn contains(&self, source: &str, key: &DedupKey) -> Result<bool, RepositoryError>;
}

/// Open the backend named by the repository binding.
pub async fn open_repository(
    cfg: &RepositoryConfig,
) -> Result<Arc<dyn IdempotentRepository>, RepositoryError> {
    let repo: Arc<dyn IdempotentRepository> = match cfg {
        RepositoryConfig::Memory { capacity } => Arc::new(MemoryRepository::with_capacity(*capacity)),
        RepositoryConfig::Journal { path } => Arc::new(JournalRepository::open(path).await?),
    };
    Ok(repo)
}
