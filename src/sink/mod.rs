// src/sink/mod.rs
//! Destination transports for built records.

pub mod jsonl;
pub mod log;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ConfigError;
use crate::record::HoroscopeRecord;

pub use jsonl::JsonlSink;
pub use log::LogSink;
pub use webhook::WebhookSink;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unreachable: {0}")]
    Unreachable(String),
    #[error("sink rejected record: {0}")]
    Rejected(String),
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Final delivery of a record; succeeds or fails as a whole.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn deliver(&self, record: &HoroscopeRecord) -> Result<(), SinkError>;
}

/// Resolve a feed's `target_uri`:
/// - `log:<category>` emits a structured tracing event
/// - `http://...` / `https://...` POSTs the record as JSON
/// - `jsonl:<path>` appends one JSON line per record
pub fn sink_from_uri(
    name: &str,
    uri: &str,
    client: &reqwest::Client,
) -> Result<Arc<dyn RecordSink>, ConfigError> {
    let uri = uri.trim();
    if let Some(category) = uri.strip_prefix("log:") {
        return Ok(Arc::new(LogSink::new(category)));
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(Arc::new(WebhookSink::new(uri, client.clone())));
    }
    if let Some(path) = uri.strip_prefix("jsonl:").filter(|p| !p.is_empty()) {
        return Ok(Arc::new(JsonlSink::new(path)));
    }
    Err(ConfigError::UnsupportedUri {
        source_name: name.to_string(),
        uri: uri.to_string(),
    })
}

// --- Test helper ---
/// Collects delivered records; can be told to fail.
#[derive(Default)]
pub struct MemorySink {
    pub records: parking_lot::Mutex<Vec<HoroscopeRecord>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<HoroscopeRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn deliver(&self, record: &HoroscopeRecord) -> Result<(), SinkError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SinkError::Unreachable("memory sink set to fail".into()));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}
