// src/ingest/providers/mod.rs
pub mod rss;

use std::sync::Arc;

use crate::config::ConfigError;
use crate::ingest::types::FeedSource;

/// Resolve a feed's `source_uri`:
/// - `http://...` / `https://...` polls RSS over HTTP
/// - `file:<path>` re-reads an RSS file on every poll
pub fn source_from_uri(
    name: &str,
    uri: &str,
    client: &reqwest::Client,
) -> Result<Arc<dyn FeedSource>, ConfigError> {
    let uri = uri.trim();
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(Arc::new(rss::RssFeedSource::from_url(name, uri, client.clone())));
    }
    if let Some(path) = uri.strip_prefix("file:").filter(|p| !p.is_empty()) {
        return Ok(Arc::new(rss::RssFeedSource::from_file(name, path)));
    }
    Err(ConfigError::UnsupportedUri {
        source_name: name.to_string(),
        uri: uri.to_string(),
    })
}
