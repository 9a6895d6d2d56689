// tests/pipeline_transaction.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use horo_feed_ingest::ingest::types::StaticSource;
use horo_feed_ingest::sink::MemorySink;
use horo_feed_ingest::{
    DedupKey, FeedSourceConfig, IdempotentRepository, MemoryRepository, PipelineRouter, RawEntry,
    TransactionPolicy,
};

fn leo() -> (RawEntry, DedupKey) {
    let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (
        RawEntry::new("Leo Today", Some(date), "<p>Shine.</p>"),
        DedupKey::new("Leo", date),
    )
}

#[tokio::test(start_paused = true)]
async fn failed_dispatch_is_rolled_back_and_redelivered() {
    let (entry, key) = leo();
    let repo = Arc::new(MemoryRepository::default());
    let sink = Arc::new(MemorySink::new());
    sink.set_failing(true);

    let running = PipelineRouter::builder()
        .repository(repo.clone())
        .redelivery_delay(Duration::from_secs(2))
        .feed_with(
            FeedSourceConfig::new("daily", "file:unused.xml", "log:items")
                .with_poll_interval_secs(3600)
                .with_max_redeliveries(5)
                .with_transaction(TransactionPolicy::default()),
            Arc::new(StaticSource::new(vec![entry])),
            sink.clone(),
        )
        .build()
        .unwrap()
        .start();

    tokio::time::sleep(Duration::from_secs(1)).await;
    // failed and rolled back: nothing delivered, nothing marked
    assert!(sink.delivered().is_empty());
    assert!(!repo.contains("daily", &key).await.unwrap());
    assert_eq!(running.stats("daily").unwrap().failed, 1);

    sink.set_failing(false);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(sink.delivered().len(), 1);
    assert!(repo.contains("daily", &key).await.unwrap());
    let stats = running.stats("daily").unwrap();
    assert_eq!(stats.redelivered, 1);
    assert_eq!(stats.dispatched, 1);

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn without_transaction_a_failed_dispatch_is_unmarked() {
    let (entry, key) = leo();
    let repo = Arc::new(MemoryRepository::default());
    let sink = Arc::new(MemorySink::new());
    sink.set_failing(true);

    let running = PipelineRouter::builder()
        .repository(repo.clone())
        .feed_with(
            FeedSourceConfig::new("daily", "file:unused.xml", "log:items")
                .with_poll_interval_secs(60)
                .with_max_redeliveries(0),
            Arc::new(StaticSource::new(vec![entry])),
            sink.clone(),
        )
        .build()
        .unwrap()
        .start();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(sink.delivered().is_empty());
    assert!(!repo.contains("daily", &key).await.unwrap());

    // the next poll brings the entry again and it goes through
    sink.set_failing(false);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(sink.delivered().len(), 1);
    assert!(repo.contains("daily", &key).await.unwrap());
    let stats = running.stats("daily").unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.redelivered, 0);

    running.shutdown().await;
}
