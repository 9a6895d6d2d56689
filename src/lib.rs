// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod dedup;
pub mod extract;
pub mod ingest;
pub mod key;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod record;
pub mod sink;
pub mod stats;
pub mod transaction;

// ---- Re-exports for stable public API ----
pub use crate::config::{AppConfig, ConfigError, FeedSourceConfig};
pub use crate::dedup::{IdempotentRepository, MarkOutcome, MemoryRepository};
pub use crate::ingest::types::{FeedSource, RawEntry};
pub use crate::key::DedupKey;
pub use crate::pipeline::{PipelineRouter, RunningPipelines};
pub use crate::record::HoroscopeRecord;
pub use crate::sink::RecordSink;
pub use crate::transaction::TransactionPolicy;
