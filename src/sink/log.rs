// src/sink/log.rs
use async_trait::async_trait;

use super::{RecordSink, SinkError};
use crate::record::HoroscopeRecord;

/// Emits each record as a structured tracing event under target `items`.
#[derive(Debug, Clone)]
pub struct LogSink {
    category: String,
}

impl LogSink {
    pub fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
        }
    }
}

#[async_trait]
impl RecordSink for LogSink {
    async fn deliver(&self, record: &HoroscopeRecord) -> Result<(), SinkError> {
        tracing::info!(
            target: "items",
            category = %self.category,
            feed = %record.feed_name,
            sign = %record.sign,
            date = %record.date,
            title = %record.title,
            excerpt = %record.excerpt,
            "horoscope record"
        );
        Ok(())
    }
}
