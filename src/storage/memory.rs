//! In-memory data backend
//!
//! Keeps payloads in arrival order and ignores ones it has already seen,
//! so a DATA flood stops at the first node that already holds the payload.

use crate::storage::DataBackend;
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::sync::RwLock;

/// Default number of payloads kept before the oldest is evicted
pub const DEFAULT_STORE_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct StoreInner {
    entries: VecDeque<Bytes>,
    seen: HashSet<Bytes>,
}

/// Bounded, deduplicating payload store
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STORE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Number of stored payloads
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataBackend for MemoryStore {
    /// Newest payload starting with `query`; an empty query matches anything.
    fn get(&self, query: &[u8]) -> Bytes {
        self.read()
            .entries
            .iter()
            .rev()
            .find(|entry| entry.starts_with(query))
            .cloned()
            .unwrap_or_default()
    }

    fn send(&self, payload: &[u8]) -> bool {
        if payload.is_empty() {
            return false;
        }

        let mut inner = self.write();
        let payload = Bytes::copy_from_slice(payload);
        if !inner.seen.insert(payload.clone()) {
            return false;
        }

        inner.entries.push_back(payload);
        if inner.entries.len() > self.capacity {
            if let Some(evicted) = inner.entries.pop_front() {
                inner.seen.remove(&evicted);
            }
        }
        log::debug!("Stored payload ({} entries)", inner.entries.len());
        true
    }
}
