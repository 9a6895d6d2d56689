// src/sink/webhook.rs
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{RecordSink, SinkError};
use crate::record::HoroscopeRecord;

/// POSTs each record as JSON. Transport errors and 5xx are retried with
/// exponential backoff; 4xx is final.
#[derive(Clone)]
pub struct WebhookSink {
    url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
    backoff_base: Duration,
}

impl WebhookSink {
    pub fn new(url: &str, client: Client) -> Self {
        Self {
            url: url.to_string(),
            client,
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn backoff(&self, attempt: u8) -> Duration {
        self.backoff_base * (1u32 << (attempt - 1).min(16))
    }
}

#[async_trait]
impl RecordSink for WebhookSink {
    async fn deliver(&self, record: &HoroscopeRecord) -> Result<(), SinkError> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(record)
                .send()
                .await;

            let err = match res {
                Ok(rsp) if rsp.status().is_success() => return Ok(()),
                Ok(rsp) if rsp.status().is_client_error() => {
                    return Err(SinkError::Rejected(format!(
                        "webhook HTTP {}",
                        rsp.status()
                    )))
                }
                Ok(rsp) => format!("webhook HTTP {}", rsp.status()),
                Err(e) => format!("webhook request failed: {e}"),
            };

            if attempt >= self.max_retries {
                return Err(SinkError::Unreachable(err));
            }
            tracing::debug!(target: "pipeline", attempt, error = %err, "webhook retry");
            tokio::time::sleep(self.backoff(attempt)).await;
        }
    }
}
