// src/pipeline.rs
//! Router wiring one poller, one queue and one worker pool per configured feed.
//! Configuration is validated in `build`; nothing starts unless it passes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{AppConfig, ConfigError, FeedSourceConfig};
use crate::dedup::{open_repository, IdempotentRepository};
use crate::extract::TextExtractor;
use crate::ingest::providers::source_from_uri;
use crate::ingest::queue::feed_queue;
use crate::ingest::scheduler::spawn_poller;
use crate::ingest::types::FeedSource;
use crate::key::{EntryKeyExtractor, SignTable};
use crate::processor::{spawn_workers, Processor};
use crate::sink::{sink_from_uri, RecordSink};
use crate::stats::{PipelineStats, StatsSnapshot};

pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_secs(1);

struct FeedBinding {
    config: FeedSourceConfig,
    source: Option<Arc<dyn FeedSource>>,
    sink: Option<Arc<dyn RecordSink>>,
}

struct FeedPipeline {
    config: FeedSourceConfig,
    source: Arc<dyn FeedSource>,
    sink: Arc<dyn RecordSink>,
    stats: Arc<PipelineStats>,
}

pub struct RouterBuilder {
    feeds: Vec<FeedBinding>,
    repository: Option<Arc<dyn IdempotentRepository>>,
    signs: SignTable,
    client: reqwest::Client,
    redelivery_delay: Duration,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            repository: None,
            signs: SignTable::default(),
            client: reqwest::Client::new(),
            redelivery_delay: DEFAULT_REDELIVERY_DELAY,
        }
    }
}

impl RouterBuilder {
    /// Feed whose transports are resolved from its URIs.
    pub fn feed(mut self, config: FeedSourceConfig) -> Self {
        self.feeds.push(FeedBinding {
            config,
            source: None,
            sink: None,
        });
        self
    }

    /// Feed with explicitly supplied transports; its URIs are still validated.
    pub fn feed_with(
        mut self,
        config: FeedSourceConfig,
        source: Arc<dyn FeedSource>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        self.feeds.push(FeedBinding {
            config,
            source: Some(source),
            sink: Some(sink),
        });
        self
    }

    pub fn repository(mut self, repo: Arc<dyn IdempotentRepository>) -> Self {
        self.repository = Some(repo);
        self
    }

    pub fn signs(mut self, signs: SignTable) -> Self {
        self.signs = signs;
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    pub fn build(self) -> Result<PipelineRouter, ConfigError> {
        let repo = self.repository.ok_or(ConfigError::MissingRepository)?;
        if self.feeds.is_empty() {
            return Err(ConfigError::NoSources);
        }

        let mut names = HashSet::new();
        let mut feeds = Vec::with_capacity(self.feeds.len());
        for FeedBinding {
            mut config,
            source,
            sink,
        } in self.feeds
        {
            config.validate()?;
            config.name = config.name.trim().to_string();
            if !names.insert(config.name.clone()) {
                return Err(ConfigError::DuplicateSource(config.name));
            }
            let source = match source {
                Some(s) => s,
                None => source_from_uri(&config.name, &config.source_uri, &self.client)?,
            };
            let sink = match sink {
                Some(s) => s,
                None => sink_from_uri(&config.name, &config.target_uri, &self.client)?,
            };
            feeds.push(FeedPipeline {
                config,
                source,
                sink,
                stats: Arc::new(PipelineStats::default()),
            });
        }

        Ok(PipelineRouter {
            feeds,
            repo,
            keys: EntryKeyExtractor::new(Arc::new(self.signs)),
            redelivery_delay: self.redelivery_delay,
        })
    }
}

pub struct PipelineRouter {
    feeds: Vec<FeedPipeline>,
    repo: Arc<dyn IdempotentRepository>,
    keys: EntryKeyExtractor,
    redelivery_delay: Duration,
}

impl PipelineRouter {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Validate `cfg`, open its repository binding and resolve every feed's transports.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let binding = cfg.repository.as_ref().ok_or(ConfigError::MissingRepository)?;
        let repo = open_repository(binding)
            .await
            .context("opening dedup repository")?;
        let mut builder = Self::builder().repository(repo).signs(cfg.signs.table()?);
        for f in &cfg.feeds {
            builder = builder.feed(f.clone());
        }
        Ok(builder.build()?)
    }

    pub fn feed_names(&self) -> Vec<&str> {
        self.feeds.iter().map(|f| f.config.name.as_str()).collect()
    }

    pub fn repository(&self) -> &Arc<dyn IdempotentRepository> {
        &self.repo
    }

    /// Start every feed's poller and workers.
    pub fn start(self) -> RunningPipelines {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut pollers = Vec::new();
        let mut workers = Vec::new();
        let mut stats = HashMap::new();

        for feed in self.feeds {
            let cfg = &feed.config;
            let (queue, rx) = feed_queue(&cfg.name, cfg.queue);

            let mut processor = Processor::new(&cfg.name, self.repo.clone(), feed.sink.clone())
                .with_transaction(cfg.transaction)
                .with_keys(self.keys.clone())
                .with_stats(feed.stats.clone())
                .with_redelivery(cfg.max_redeliveries, self.redelivery_delay);
            if let Some(n) = cfg.excerpt_max_chars {
                processor = processor.with_text_extractor(TextExtractor::with_max_chars(n));
            }

            workers.extend(spawn_workers(
                Arc::new(processor),
                Arc::new(rx),
                Arc::new(queue.downgrade()),
                cfg.workers,
            ));
            pollers.push(spawn_poller(
                feed.source.clone(),
                queue,
                Duration::from_secs(cfg.poll_interval_secs),
                feed.stats.clone(),
                shutdown_rx.clone(),
            ));

            info!(
                target: "pipeline",
                source = %cfg.name,
                source_uri = %cfg.source_uri,
                target_uri = %cfg.target_uri,
                workers = cfg.workers,
                transactional = cfg.transaction.is_some(),
                "feed pipeline started"
            );
            stats.insert(cfg.name.clone(), feed.stats);
        }

        RunningPipelines {
            shutdown: shutdown_tx,
            pollers,
            workers,
            stats,
        }
    }
}

pub struct RunningPipelines {
    shutdown: watch::Sender<bool>,
    pollers: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    stats: HashMap<String, Arc<PipelineStats>>,
}

impl RunningPipelines {
    pub fn stats(&self, feed: &str) -> Option<StatsSnapshot> {
        self.stats.get(feed).map(|s| s.snapshot())
    }

    /// Stop polling, then let the workers drain what is already queued.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for h in self.pollers {
            if let Err(e) = h.await {
                tracing::warn!(target: "pipeline", error = %e, "poller task failed");
            }
        }
        for h in self.workers {
            if let Err(e) = h.await {
                tracing::warn!(target: "pipeline", error = %e, "worker task failed");
            }
        }
        info!(target: "pipeline", "all feed pipelines stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::MemoryRepository;
    use crate::ingest::types::StaticSource;
    use crate::sink::MemorySink;

    fn cfg(name: &str) -> FeedSourceConfig {
        FeedSourceConfig::new(name, "file:feed.xml", "log:items")
    }

    #[test]
    fn build_requires_repository() {
        let err = PipelineRouter::builder().feed(cfg("daily")).build().err();
        assert_eq!(err, Some(ConfigError::MissingRepository));
    }

    #[test]
    fn build_requires_a_feed() {
        let err = PipelineRouter::builder()
            .repository(Arc::new(MemoryRepository::default()))
            .build()
            .err();
        assert_eq!(err, Some(ConfigError::NoSources));
    }

    #[test]
    fn build_rejects_duplicate_names() {
        let err = PipelineRouter::builder()
            .repository(Arc::new(MemoryRepository::default()))
            .feed(cfg("daily"))
            .feed(cfg(" daily "))
            .build()
            .err();
        assert_eq!(err, Some(ConfigError::DuplicateSource("daily".into())));
    }

    #[test]
    fn build_validates_injected_feeds_too() {
        let err = PipelineRouter::builder()
            .repository(Arc::new(MemoryRepository::default()))
            .feed_with(
                FeedSourceConfig::new("daily", "file:x", ""),
                Arc::new(StaticSource::new(vec![])),
                Arc::new(MemorySink::new()),
            )
            .build()
            .err();
        assert!(matches!(err, Some(ConfigError::MissingField { field: "target_uri", .. })));
    }

    #[test]
    fn build_rejects_unknown_uri_scheme() {
        let err = PipelineRouter::builder()
            .repository(Arc::new(MemoryRepository::default()))
            .feed(FeedSourceConfig::new("daily", "gopher://x", "log:items"))
            .build()
            .err();
        assert!(matches!(err, Some(ConfigError::UnsupportedUri { .. })));
    }

    #[tokio::test]
    async fn from_config_fails_without_repository() {
        let cfg = AppConfig {
            feeds: vec![cfg("daily")],
            ..Default::default()
        };
        assert!(PipelineRouter::from_config(&cfg).await.is_err());
    }
}
