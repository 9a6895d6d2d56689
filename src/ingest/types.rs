// src/ingest/types.rs
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// One item split out of a polled feed document. Immutable once queued.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RawEntry {
    pub title: String,
    pub published: Option<DateTime<Utc>>, // None when the feed's date did not parse
    pub body_markup: String,              // raw, possibly malformed HTML
}

impl RawEntry {
    pub fn new(
        title: impl Into<String>,
        published: Option<DateTime<Utc>>,
        body_markup: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            published,
            body_markup: body_markup.into(),
        }
    }
}

/// Source transport. `fetch` yields one whole document's entries in document
/// order, or fails as a whole.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawEntry>>;
    fn name(&self) -> &str;
}

// --- Test helper ---
/// Returns the same entries on every fetch (a redelivering source), or fails while
/// `set_failing(true)`.
pub struct StaticSource {
    pub entries: parking_lot::Mutex<Vec<RawEntry>>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl StaticSource {
    pub fn new(entries: Vec<RawEntry>) -> Self {
        Self {
            entries: parking_lot::Mutex::new(entries),
            failing: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn replace(&self, entries: Vec<RawEntry>) {
        *self.entries.lock() = entries;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FeedSource for StaticSource {
    async fn fetch(&self) -> Result<Vec<RawEntry>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("static source set to fail"));
        }
        Ok(self.entries.lock().clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}
