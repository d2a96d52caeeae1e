//! The partitioned, bounded `(parent_id, name) -> entry` table.

use std::hash::BuildHasher as _;

use rustc_hash::FxBuildHasher;
use tracing::{debug, warn};

use crate::cache::entry::{CacheEntry, CacheKey, EntryValue};
use crate::cache::eviction::clock::ClockSweep;
use crate::cache::partition::{ClearOutcome, Partition, PartitionFull};
use crate::config::CacheConfig;
use crate::sync::Arc;
use crate::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Lookups answered from an authoritative cached value.
    pub hits: u64,
    /// Lookups that had to consult the store.
    pub misses: u64,
    /// Provisional entries created.
    pub inserts: u64,
    /// Entries reclaimed by the clock sweep.
    pub evictions: u64,
    /// `find_or_create` calls that found no room even after evicting.
    pub exhausted: u64,
    /// Read-only lookups served by the store without a cache entry.
    pub fallbacks: u64,
    /// Entries currently cached.
    pub live: usize,
}

/// Monotonic counters kept alongside the cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    exhausted: AtomicU64,
    fallbacks: AtomicU64,
}

impl CacheStats {
    pub(crate) fn note_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    fn note_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    fn note_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn note_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, live: usize) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            live,
        }
    }
}

/// A fixed number of independently latched partitions.
///
/// Memory is bounded by `partitions * partition_capacity` entries. Each partition has a soft
/// target (`eviction_threshold`) enforced at commit time, and a hard capacity enforced on insert.
#[derive(Debug)]
pub struct PartitionedLockCache {
    partitions: Box<[Partition]>,
    eviction_threshold: usize,
    stats: CacheStats,
}

impl PartitionedLockCache {
    /// Build an empty cache sized by `config`. The config must already be validated.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        let partitions = (0..config.partitions)
            .map(|i| Partition::new(i, config.partition_capacity))
            .collect();
        Self {
            partitions,
            eviction_threshold: config.eviction_threshold(),
            stats: CacheStats::default(),
        }
    }

    fn hash(key: &CacheKey) -> u64 {
        FxBuildHasher.hash_one(key)
    }

    fn partition_for(&self, hash: u64) -> &Partition {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "reduced modulo the partition count, which is a usize"
        )]
        let idx = (hash % self.partitions.len() as u64) as usize;
        &self.partitions[idx]
    }

    /// Index of the partition `key` lives in.
    #[must_use]
    pub fn partition_of(&self, key: &CacheKey) -> usize {
        self.partition_for(Self::hash(key)).index()
    }

    /// Find `key`. The returned entry is already declared; the caller owns that session.
    #[must_use]
    pub fn find(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let hash = Self::hash(key);
        self.partition_for(hash).find(hash, key)
    }

    /// Find `key`, creating a provisional entry if absent. The returned entry is declared.
    ///
    /// When the partition is at hard capacity one entry is evicted and the insert retried once.
    /// Returns `None` if there is still no room; the cache is optional, so callers either fall
    /// back to the store or report [`NsError::CacheExhausted`](crate::NsError::CacheExhausted).
    #[must_use]
    pub fn find_or_create(&self, key: &CacheKey) -> Option<(Arc<CacheEntry>, bool)> {
        let hash = Self::hash(key);
        let partition = self.partition_for(hash);
        let result = match partition.find_or_insert(hash, key) {
            Err(PartitionFull) => {
                if ClockSweep::evict_one(partition) {
                    self.stats.note_eviction();
                }
                partition.find_or_insert(hash, key)
            }
            found => found,
        };
        match result {
            Ok((entry, created)) => {
                if created {
                    self.stats.note_insert();
                }
                Some((entry, created))
            }
            Err(PartitionFull) => {
                self.stats.note_exhausted();
                warn!(
                    partition = partition.index(),
                    key = %key,
                    "partition is full of referenced entries"
                );
                None
            }
        }
    }

    /// Remove `key` if nobody references it.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let hash = Self::hash(key);
        self.partition_for(hash).remove(hash, key)
    }

    /// Store an authoritative value for `key`, re-creating the entry if it was evicted.
    pub fn publish(&self, key: &CacheKey, value: EntryValue) -> bool {
        let hash = Self::hash(key);
        self.partition_for(hash).publish(hash, key, value)
    }

    /// Invalidate the whole cache.
    ///
    /// Unreferenced entries are dropped. Referenced ones are kept, since their holders are
    /// serializing on them, but their value is reset so the next reader consults the store.
    pub fn clear(&self) -> ClearOutcome {
        let mut outcome = ClearOutcome::default();
        for partition in &self.partitions {
            let cleared = partition.clear();
            outcome.removed += cleared.removed;
            outcome.retained += cleared.retained;
        }
        debug!(
            removed = outcome.removed,
            retained = outcome.retained,
            "cleared lock cache"
        );
        outcome
    }

    /// Run one eviction pass on `partition` if it is over its soft target.
    ///
    /// Returns whether an entry was reclaimed.
    pub fn evict_if_needed(&self, partition: usize) -> bool {
        let Some(partition) = self.partitions.get(partition) else {
            return false;
        };
        if partition.len() <= self.eviction_threshold {
            return false;
        }
        let evicted = ClockSweep::evict_one(partition);
        if evicted {
            self.stats.note_eviction();
        }
        evicted
    }

    /// Total number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.iter().map(Partition::len).sum()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries in partition `idx`, or zero if out of range.
    #[must_use]
    pub fn partition_len(&self, idx: usize) -> usize {
        self.partitions.get(idx).map_or(0, Partition::len)
    }

    /// Number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Soft per-partition target above which commit-time eviction runs.
    #[must_use]
    pub fn eviction_threshold(&self) -> usize {
        self.eviction_threshold
    }

    /// Total hard capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.partitions.iter().map(Partition::capacity).sum()
    }

    pub(crate) fn counters(&self) -> &CacheStats {
        &self.stats
    }

    /// Snapshot the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot(self.len())
    }
}
