// src/ingest/queue.rs
//! Per-feed FIFO handoff between the poll stage and the processing workers.
//!
//! The backpressure policy is explicit: unbounded (default), or bounded with
//! either waiting (`block`) or refusing (`reject`) when the batch does not fit.
//! A batch is always queued whole or not at all.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use super::types::RawEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFull {
    #[default]
    Block,
    Reject,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum QueuePolicy {
    #[default]
    Unbounded,
    Bounded {
        capacity: usize,
        #[serde(default)]
        on_full: OnFull,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue '{0}' is closed")]
    Closed(String),
    #[error("queue '{queue}' is full (capacity {capacity}), batch of {batch} rejected")]
    Full {
        queue: String,
        capacity: usize,
        batch: usize,
    },
    #[error("batch of {batch} exceeds queue '{queue}' capacity {capacity}")]
    BatchTooLarge {
        queue: String,
        capacity: usize,
        batch: usize,
    },
}

/// An entry in flight plus how many times it has been handed out before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub entry: RawEntry,
    pub attempt: u32,
}

impl Delivery {
    pub fn first(entry: RawEntry) -> Self {
        Self { entry, attempt: 0 }
    }

    pub fn next_attempt(self) -> Self {
        Self {
            entry: self.entry,
            attempt: self.attempt + 1,
        }
    }
}

#[derive(Clone)]
enum Tx {
    Unbounded(mpsc::UnboundedSender<Delivery>),
    Bounded {
        tx: mpsc::Sender<Delivery>,
        capacity: usize,
        on_full: OnFull,
    },
}

enum WeakTx {
    Unbounded(mpsc::WeakUnboundedSender<Delivery>),
    Bounded {
        tx: mpsc::WeakSender<Delivery>,
        capacity: usize,
        on_full: OnFull,
    },
}

enum Rx {
    Unbounded(mpsc::UnboundedReceiver<Delivery>),
    Bounded(mpsc::Receiver<Delivery>),
}

/// Producer side. The queue closes once every `FeedQueue` clone is dropped.
#[derive(Clone)]
pub struct FeedQueue {
    name: Arc<str>,
    tx: Tx,
}

/// Producer handle that does not keep the queue open (used by workers for redelivery).
pub struct WeakFeedQueue {
    name: Arc<str>,
    tx: WeakTx,
}

/// Consumer side, shared by all workers of one feed.
pub struct QueueReceiver {
    name: Arc<str>,
    rx: Mutex<Rx>,
}

pub fn feed_queue(name: &str, policy: QueuePolicy) -> (FeedQueue, QueueReceiver) {
    let name: Arc<str> = Arc::from(name);
    let (tx, rx) = match policy {
        QueuePolicy::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Tx::Unbounded(tx), Rx::Unbounded(rx))
        }
        QueuePolicy::Bounded { capacity, on_full } => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (
                Tx::Bounded {
                    tx,
                    capacity: capacity.max(1),
                    on_full,
                },
                Rx::Bounded(rx),
            )
        }
    };
    (
        FeedQueue {
            name: name.clone(),
            tx,
        },
        QueueReceiver {
            name,
            rx: Mutex::new(rx),
        },
    )
}

impl FeedQueue {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a whole poll batch in order. Either every entry is queued or none is.
    pub async fn push_batch(&self, entries: Vec<RawEntry>) -> Result<usize, QueueError> {
        let n = entries.len();
        if n == 0 {
            return Ok(0);
        }
        match &self.tx {
            Tx::Unbounded(tx) => {
                // no await points: a cancelled poll cannot leave half a batch
                for e in entries {
                    tx.send(Delivery::first(e))
                        .map_err(|_| QueueError::Closed(self.name.to_string()))?;
                }
            }
            Tx::Bounded {
                tx,
                capacity,
                on_full,
            } => {
                if n > *capacity {
                    return Err(QueueError::BatchTooLarge {
                        queue: self.name.to_string(),
                        capacity: *capacity,
                        batch: n,
                    });
                }
                let permits = match on_full {
                    OnFull::Block => tx
                        .reserve_many(n)
                        .await
                        .map_err(|_| QueueError::Closed(self.name.to_string()))?,
                    OnFull::Reject => tx.try_reserve_many(n).map_err(|e| match e {
                        mpsc::error::TrySendError::Full(()) => QueueError::Full {
                            queue: self.name.to_string(),
                            capacity: *capacity,
                            batch: n,
                        },
                        mpsc::error::TrySendError::Closed(()) => {
                            QueueError::Closed(self.name.to_string())
                        }
                    })?,
                };
                for (permit, e) in permits.zip(entries) {
                    permit.send(Delivery::first(e));
                }
            }
        }
        Ok(n)
    }

    pub fn downgrade(&self) -> WeakFeedQueue {
        let tx = match &self.tx {
            Tx::Unbounded(tx) => WeakTx::Unbounded(tx.downgrade()),
            Tx::Bounded {
                tx,
                capacity,
                on_full,
            } => WeakTx::Bounded {
                tx: tx.downgrade(),
                capacity: *capacity,
                on_full: *on_full,
            },
        };
        WeakFeedQueue {
            name: self.name.clone(),
            tx,
        }
    }
}

impl WeakFeedQueue {
    /// Push one delivery back. Fails with `Closed` once the producers are gone.
    pub async fn redeliver(&self, delivery: Delivery) -> Result<(), QueueError> {
        let closed = || QueueError::Closed(self.name.to_string());
        match &self.tx {
            WeakTx::Unbounded(weak) => {
                let tx = weak.upgrade().ok_or_else(closed)?;
                tx.send(delivery).map_err(|_| closed())
            }
            WeakTx::Bounded {
                tx: weak,
                capacity,
                on_full,
            } => {
                let tx = weak.upgrade().ok_or_else(closed)?;
                match on_full {
                    OnFull::Block => tx.send(delivery).await.map_err(|_| closed()),
                    OnFull::Reject => tx.try_send(delivery).map_err(|e| match e {
                        mpsc::error::TrySendError::Full(_) => QueueError::Full {
                            queue: self.name.to_string(),
                            capacity: *capacity,
                            batch: 1,
                        },
                        mpsc::error::TrySendError::Closed(_) => closed(),
                    }),
                }
            }
        }
    }
}

impl QueueReceiver {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next delivery in FIFO order; `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Delivery> {
        let mut rx = self.rx.lock().await;
        match &mut *rx {
            Rx::Unbounded(r) => r.recv().await,
            Rx::Bounded(r) => r.recv().await,
        }
    }
}
