//! Result cache
//!
//! Keeps computed time series per (filter fingerprint, team, until bucket)
//! so a refresh only recomputes the buckets after the cached ones.
//!
//! # Design
//!
//! - One `parking_lot::Mutex` around an LRU map; reads and writes happen at
//!   request boundaries only
//! - An entry is usable when its axis is a prefix of the required axis
//! - Concurrent writers for the same key: last writer wins

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use trendline_query::calendar::Interval;
use xxhash_rust::xxh3::xxh3_64;

use crate::bucket::BucketAxis;
use crate::series::SeriesResult;

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Usable entries found
    pub hits: AtomicU64,

    /// No entry for the key
    pub misses: AtomicU64,

    /// Entry found but incompatible with the required axis
    pub rejected: AtomicU64,

    pub writes: AtomicU64,

    /// Total lookups
    pub lookups: AtomicU64,
}

impl CacheStats {
    /// Get hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = self.lookups.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Reset statistics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.lookups.store(0, Ordering::Relaxed);
    }
}

/// A cached computation
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub interval: Interval,
    /// Instant the entry was computed; buckets ending after it were still open
    pub as_of: DateTime<Utc>,
    /// Bucket `days` strings shared by every series
    pub days: Vec<String>,
    pub series: Vec<SeriesResult>,
}

impl CacheEntry {
    pub fn new(
        interval: Interval,
        as_of: DateTime<Utc>,
        days: Vec<String>,
        series: Vec<SeriesResult>,
    ) -> Self {
        Self {
            interval,
            as_of,
            days,
            series,
        }
    }

    /// First bucket of `axis` that must be recomputed, `None` when the entry is unusable
    ///
    /// Usable means: same interval, and the cached days are a non-empty
    /// prefix of the axis days. Recomputation starts at the first cached
    /// bucket still open at `as_of`. `Some(axis.len())` means nothing to recompute.
    pub fn resume_index(&self, axis: &BucketAxis) -> Option<usize> {
        if self.interval != axis.interval() || self.days.is_empty() {
            return None;
        }
        if self.series.iter().any(|s| s.data.len() != self.days.len()) {
            return None;
        }
        let required = axis.days();
        if self.days.len() > required.len() || required[..self.days.len()] != self.days[..] {
            return None;
        }

        let first_open = (0..self.days.len())
            .find(|&idx| axis.bucket_end(idx).is_none_or(|end| end > self.as_of))
            .unwrap_or(self.days.len());
        Some(first_open)
    }

    /// Splice cached and fresh data for one series over `axis`
    ///
    /// Buckets before `resume` come from the cache; the rest are read from
    /// `fresh` by day, missing days reading 0. `None` when the series is not
    /// cached.
    pub fn merge(
        &self,
        key: &str,
        axis: &BucketAxis,
        resume: usize,
        fresh_days: &[String],
        fresh: &[f64],
    ) -> Option<Vec<f64>> {
        let cached = self
            .series
            .iter()
            .find(|s| series_key(&s.label, s.action.order) == key)?;
        let fresh_by_day: HashMap<&str, f64> = fresh_days
            .iter()
            .map(String::as_str)
            .zip(fresh.iter().copied())
            .collect();

        Some(
            axis.days()
                .iter()
                .enumerate()
                .map(|(idx, day)| {
                    if idx < resume {
                        cached.data.get(idx).copied().unwrap_or_default()
                    } else {
                        fresh_by_day.get(day.as_str()).copied().unwrap_or_default()
                    }
                })
                .collect(),
        )
    }
}

/// Key of one series inside an entry: `"{label}_{entity order}"`
pub fn series_key(label: &str, order: usize) -> String {
    format!("{label}_{order}")
}

/// Cache key: hash of `"{fingerprint}_{team}_{until}"`
///
/// `until` is the resolved `date_to` truncated to its bucket.
pub fn cache_key(fingerprint: u64, team_id: u64, until: DateTime<Utc>) -> u64 {
    let combined = format!("{fingerprint}_{team_id}_{}", until.to_rfc3339());
    xxh3_64(combined.as_bytes())
}

/// Bounded map of computed trends results
pub struct ResultCache {
    entries: Mutex<LruCache<u64, CacheEntry>>,

    /// Maximum number of entries
    capacity: usize,

    stats: CacheStats,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            stats: CacheStats::default(),
        }
    }

    /// Look up the entry stored under `key`
    pub fn get(&self, key: u64) -> Option<CacheEntry> {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        let entry = self.entries.lock().get(&key);
        if entry.is_none() {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        entry
    }

    /// Look up an entry usable for `axis`, with the index to resume from
    pub fn get_usable(&self, key: u64, axis: &BucketAxis) -> Option<(CacheEntry, usize)> {
        let entry = self.get(key)?;
        match entry.resume_index(axis) {
            Some(resume) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some((entry, resume))
            }
            None => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, cached_days = entry.days.len(), "cached axis not usable");
                None
            }
        }
    }

    /// Store an entry, replacing any previous one
    pub fn put(&self, key: u64, entry: CacheEntry) {
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().put(key, entry);
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all entries and reset statistics
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.stats.reset();
    }
}

/// Simple LRU cache implementation
struct LruCache<K: Eq + Hash + Copy, V: Clone> {
    /// Map from key to (value, access_order)
    map: HashMap<K, (V, u64)>,

    /// Current access counter
    counter: u64,

    /// Maximum capacity
    capacity: usize,
}

impl<K: Eq + Hash + Copy, V: Clone> LruCache<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            counter: 0,
            capacity: capacity.max(1),
        }
    }

    fn get(&mut self, key: &K) -> Option<V> {
        let (value, order) = self.map.get_mut(key)?;
        self.counter += 1;
        *order = self.counter;
        Some(value.clone())
    }

    fn put(&mut self, key: K, value: V) {
        self.counter += 1;
        if self.map.len() >= self.capacity && !self.map.contains_key(&key) {
            self.evict_lru();
        }
        self.map.insert(key, (value, self.counter));
    }

    fn evict_lru(&mut self) {
        let oldest_key = self
            .map
            .iter()
            .min_by_key(|(_, (_, order))| *order)
            .map(|(k, _)| *k);

        if let Some(key) = oldest_key {
            self.map.remove(&key);
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn clear(&mut self) {
        self.map.clear();
        self.counter = 0;
    }
}
