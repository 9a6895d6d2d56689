// src/dedup/memory.rs
use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{IdempotentRepository, MarkOutcome, RepositoryError};
use crate::key::DedupKey;

pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct SourceMarks {
    keys: HashSet<String>,
    // insertion order, oldest first
    order: VecDeque<String>,
}

impl SourceMarks {
    fn evict_to(&mut self, cap: usize) {
        while self.keys.len() > cap {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.keys.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

/// Bounded, process-lifetime repository. Once a source holds `capacity` marks the
/// oldest one is evicted.
#[derive(Debug)]
pub struct MemoryRepository {
    inner: Mutex<HashMap<String, SourceMarks>>,
    cap: usize,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }
}

impl MemoryRepository {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            cap: cap.max(1),
        }
    }

    pub fn len(&self, source: &str) -> usize {
        self.inner.lock().get(source).map_or(0, |m| m.keys.len())
    }

    pub fn is_empty(&self, source: &str) -> bool {
        self.len(source) == 0
    }
}

#[async_trait]
impl IdempotentRepository for MemoryRepository {
    async fn check_and_mark(
        &self,
        source: &str,
        key: &DedupKey,
    ) -> Result<MarkOutcome, RepositoryError> {
        let k = key.storage_key();
        let mut all = self.inner.lock();
        let marks = all.entry(source.to_string()).or_default();
        if marks.keys.contains(&k) {
            return Ok(MarkOutcome::AlreadyPresent);
        }
        marks.keys.insert(k.clone());
        marks.order.push_back(k);
        marks.evict_to(self.cap);
        Ok(MarkOutcome::NewlyMarked)
    }

    async fn unmark(&self, source: &str, key: &DedupKey) -> Result<(), RepositoryError> {
        let k = key.storage_key();
        if let Some(marks) = self.inner.lock().get_mut(source) {
            if marks.keys.remove(&k) {
                marks.order.retain(|o| o != &k);
            }
        }
        Ok(())
    }

    async fn contains(&self, source: &str, key: &DedupKey) -> Result<bool, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .get(source)
            .is_some_and(|m| m.keys.contains(&key.storage_key())))
    }
}
