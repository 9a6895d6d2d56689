// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::ingest::queue::FeedQueue;
use crate::ingest::types::FeedSource;
use crate::stats::PipelineStats;

/// Spawn the poll loop for one feed: `poll_once` on every tick until shutdown.
/// A failed poll is logged inside `poll_once` and simply retried next tick.
/// The task owns the queue's producer handle, so the queue closes when it exits.
pub fn spawn_poller(
    source: Arc<dyn FeedSource>,
    queue: FeedQueue,
    interval: Duration,
    stats: Arc<PipelineStats>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            // Cancelling mid-poll is safe: nothing is queued until the whole batch fits.
            tokio::select! {
                _ = crate::ingest::poll_once(source.as_ref(), &queue, &stats) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::info!(target: "ingest", source = queue.name(), "poller stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::queue::{feed_queue, QueuePolicy};
    use crate::ingest::types::{RawEntry, StaticSource};

    #[tokio::test(start_paused = true)]
    async fn polls_on_every_tick_until_shutdown() {
        let src = Arc::new(StaticSource::new(vec![RawEntry::new("Leo", None, "")]));
        let (q, rx) = feed_queue("daily", QueuePolicy::Unbounded);
        let stats = Arc::new(PipelineStats::default());
        let (tx, shutdown) = watch::channel(false);

        let h = spawn_poller(src.clone(), q, Duration::from_secs(60), stats.clone(), shutdown);

        // first tick fires immediately, then every 60s
        tokio::time::sleep(Duration::from_secs(125)).await;
        tx.send(true).unwrap();
        h.await.unwrap();

        assert_eq!(src.fetch_count(), 3);
        assert_eq!(stats.snapshot().queued, 3);
        // poller exited and dropped the producer: queue drains then closes
        let mut n = 0;
        while rx.pop().await.is_some() {
            n += 1;
        }
        assert_eq!(n, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_source_keeps_polling() {
        let src = Arc::new(StaticSource::new(vec![]));
        src.set_failing(true);
        let (q, _rx) = feed_queue("daily", QueuePolicy::Unbounded);
        let stats = Arc::new(PipelineStats::default());
        let (tx, shutdown) = watch::channel(false);

        let h = spawn_poller(src.clone(), q, Duration::from_secs(10), stats.clone(), shutdown);
        tokio::time::sleep(Duration::from_secs(25)).await;
        tx.send(true).unwrap();
        h.await.unwrap();

        assert_eq!(stats.snapshot().poll_errors, 3);
    }
}
