//! Bounded in-process tier for hot entries.
//!
//! Eviction is by insertion order rather than recency. The disk tier is the
//! source of truth, so a cheap policy is enough here.

use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use super::types::CacheEntry;

#[derive(Default)]
struct Slots {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

/// Fixed-capacity memory cache keyed by content key.
pub struct MemoryTier {
    slots: RwLock<Slots>,
    capacity: usize,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self { slots: RwLock::new(Slots::default()), capacity: capacity.max(1) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.slots.read().await.entries.get(key).cloned()
    }

    /// Insert an entry, evicting the oldest insertion when full.
    ///
    /// Replacing an existing key keeps its original slot in the order.
    pub async fn put(&self, entry: CacheEntry) {
        let mut slots = self.slots.write().await;
        let key = entry.key.clone();

        if slots.entries.insert(key.clone(), entry).is_some() {
            return;
        }
        slots.order.push_back(key);

        while slots.order.len() > self.capacity {
            if let Some(oldest) = slots.order.pop_front() {
                slots.entries.remove(&oldest);
                tracing::debug!(key = %oldest, "evicted memory entry");
            }
        }
    }

    pub async fn remove(&self, key: &str) -> bool {
        let mut slots = self.slots.write().await;
        if slots.entries.remove(key).is_none() {
            return false;
        }
        slots.order.retain(|k| k != key);
        true
    }

    pub async fn clear(&self) {
        let mut slots = self.slots.write().await;
        slots.entries.clear();
        slots.order.clear();
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
