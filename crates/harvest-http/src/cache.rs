//! TTL read-through cache with FIFO eviction

use std::collections::VecDeque;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::time::Instant;

/// A cached response body.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Value,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded cache: entries expire after `ttl`; at capacity the oldest insert is evicted.
#[derive(Debug)]
pub struct TtlCache {
    entries: FxHashMap<String, CacheEntry>,
    /// Insertion order, oldest at the front
    order: VecDeque<String>,
    capacity: usize,
    ttl: Duration,
    evictions: u64,
}

impl TtlCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: FxHashMap::default(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            ttl,
            evictions: 0,
        }
    }

    /// Fresh payload for `key`; expired entries are dropped on sight.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<Value> {
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.entries.remove(key);
            self.order.retain(|k| k != key);
            return None;
        }
        self.entries.get(key).map(|e| e.payload.clone())
    }

    pub fn insert(&mut self, key: String, payload: Value, now: Instant) {
        if self.entries.remove(&key).is_some() {
            self.order.retain(|k| *k != key);
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                self.evictions += 1;
            }
        }
        self.entries.insert(
            key.clone(),
            CacheEntry {
                payload,
                stored_at: now,
                expires_at: now + self.ttl,
            },
        );
        self.order.push_back(key);
    }

    /// Remove every expired entry; returns how many were dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}
