// src/ingest/providers/rss.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::path::PathBuf;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::types::{FeedSource, RawEntry};

// Only the item fields travel downstream; channel metadata is dropped here.
#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/// RFC 2822 (RSS) with an RFC 3339 fallback; `None` when neither parses.
pub fn parse_pub_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let dt = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()?;
    DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

/// Parse one RSS document into entries, in document order. Fails as a whole.
pub fn parse_document(source: &str, xml: &str) -> Result<Vec<RawEntry>> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).with_context(|| format!("parsing {source} rss xml"))?;

    let out: Vec<RawEntry> = rss
        .channel
        .item
        .into_iter()
        .map(|it| RawEntry {
            title: it.title.unwrap_or_default(),
            published: it.pub_date.as_deref().and_then(parse_pub_date),
            body_markup: it.description.unwrap_or_default(),
        })
        .collect();

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("feed_poll_parse_ms", "source" => source.to_string()).record(ms);
    Ok(out)
}

pub struct RssFeedSource {
    name: String,
    mode: Mode,
}

enum Mode {
    Document(String),
    File(PathBuf),
    Http { url: String, client: reqwest::Client },
}

impl RssFeedSource {
    /// A fixed document, re-parsed on every fetch.
    pub fn from_document(name: &str, xml: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::Document(xml.to_string()),
        }
    }

    /// Re-read from disk on every fetch.
    pub fn from_file(name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::File(path.into()),
        }
    }

    pub fn from_url(name: &str, url: &str, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::Http {
                url: url.to_string(),
                client,
            },
        }
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    async fn fetch(&self) -> Result<Vec<RawEntry>> {
        match &self.mode {
            Mode::Document(s) => parse_document(&self.name, s),
            Mode::File(p) => {
                let body = tokio::fs::read_to_string(p)
                    .await
                    .with_context(|| format!("reading feed file {}", p.display()))?;
                parse_document(&self.name, &body)
            }
            Mode::Http { url, client } => {
                let body = client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .with_context(|| format!("{} http get()", self.name))?
                    .text()
                    .await
                    .with_context(|| format!("{} http .text()", self.name))?;
                parse_document(&self.name, &body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// HTML named entities that are not defined in XML
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", "&#160;")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const DOC: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Daily Horoscopes</title>
  <link>https://example.test</link>
  <item>
    <title>Aries Today</title>
    <pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate>
    <description><![CDATA[<p>Bold&nbsp;moves pay off.</p>]]></description>
  </item>
  <item>
    <title>Taurus Today</title>
    <pubDate>not a date</pubDate>
    <description>&lt;p&gt;Patience.&lt;/p&gt;</description>
  </item>
</channel></rss>"#;

    #[test]
    fn splits_items_in_document_order() {
        let entries = parse_document("daily", DOC).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Aries Today");
        assert_eq!(
            entries[0].published,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert!(entries[0].body_markup.starts_with("<p>Bold"));
        assert_eq!(entries[1].published, None);
        assert_eq!(entries[1].body_markup, "<p>Patience.</p>");
    }

    #[test]
    fn empty_channel_is_ok() {
        let doc = "<rss><channel><title>x</title></channel></rss>";
        assert!(parse_document("daily", doc).unwrap().is_empty());
    }

    #[test]
    fn broken_document_fails_whole() {
        assert!(parse_document("daily", "<rss><channel><item><title>Leo").is_err());
    }

    #[test]
    fn pub_date_accepts_rfc3339() {
        assert_eq!(
            parse_pub_date("2024-01-01T00:00:00Z"),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }
}
