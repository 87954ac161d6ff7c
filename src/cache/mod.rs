//! Bounded in-memory cache for traversal results.
//!
//! Owned by a single traversal engine; nothing here is process-global.
//!
//! # Design
//!
//! - Keyed by `(direction, root, depth, as_of)`
//! - Size bound - inserting into a full cache evicts the oldest entry
//! - Time bound - entries older than the TTL are treated as misses
//! - No invalidation on ingestion; callers needing fresh results bypass
//!   the cache or call [`TraversalCache::clear`]

mod hash;
pub use hash::ingestion_key;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::model::Direction;

/// Cache key for one traversal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub direction: Direction,
    pub root: String,
    /// Depth after clamping.
    pub depth: u32,
    pub as_of: Option<DateTime<Utc>>,
}

impl CacheKey {
    pub fn new(
        direction: Direction,
        root: impl Into<String>,
        depth: u32,
        as_of: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            direction,
            root: root.into(),
            depth,
            as_of,
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Number of entries currently held, expired or not.
    pub entries: usize,
}

/// Size- and time-bounded traversal cache.
#[derive(Debug)]
pub struct TraversalCache<V> {
    entries: DashMap<CacheKey, Entry<V>>,
    max_entries: usize,
    ttl: Duration,
    seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TraversalCache<V> {
    /// `max_entries` of zero disables caching.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            ttl,
            seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a live entry.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let found = self
            .entries
            .get(key)
            .map(|e| (e.value.clone(), e.inserted_at.elapsed() < self.ttl));

        match found {
            Some((value, true)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some((_, false)) => {
                self.entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace an entry, evicting the oldest one when full.
    pub fn insert(&self, key: CacheKey, value: V) {
        if self.max_entries == 0 {
            return;
        }

        while !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            // Collect first so no shard lock is held during removal
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.seq)
                .map(|e| e.key().clone());
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                }
                None => break,
            }
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                seq,
            },
        );
    }

    /// Drop every entry. Hit and miss counters are kept.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
