//! Per-transaction log of deferred cache mutations.
//!
//! A cache entry becomes visible to other transactions the moment it is created, because its lock
//! is what serializes them. Its *value* must not: until the store transaction commits, nobody else
//! may be told what the entry resolves to. The log decouples the two by holding every value change
//! back until commit, and dropping it on abort.

use tracing::warn;

use crate::cache::{CacheKey, EntryValue, PartitionedLockCache};
use crate::error::{NsError, NsResult};

/// One deferred cache mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedMutation {
    /// This transaction created a provisional entry for `key`.
    Insert {
        /// The new entry's key.
        key: CacheKey,
    },
    /// `key` resolves to `value` once this transaction commits.
    Update {
        /// The entry's key.
        key: CacheKey,
        /// The authoritative value.
        value: EntryValue,
    },
}

/// Bounded, ordered staging log.
#[derive(Debug)]
pub struct StagingLog {
    mutations: Vec<StagedMutation>,
    limit: usize,
}

impl StagingLog {
    /// An empty log that refuses more than `limit` mutations.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            mutations: Vec::new(),
            limit,
        }
    }

    /// Record that this transaction created the provisional entry for `key`.
    pub fn stage_insert(&mut self, key: CacheKey) -> NsResult<()> {
        self.push(StagedMutation::Insert { key })
    }

    /// Record the authoritative `value` of `key`.
    pub fn stage_update(&mut self, key: CacheKey, value: EntryValue) -> NsResult<()> {
        debug_assert!(value.is_authoritative(), "staging a provisional value");
        self.push(StagedMutation::Update { key, value })
    }

    fn push(&mut self, mutation: StagedMutation) -> NsResult<()> {
        if self.mutations.len() >= self.limit {
            warn!(limit = self.limit, "staging log is full");
            return Err(NsError::StagingOverflow { limit: self.limit });
        }
        self.mutations.push(mutation);
        Ok(())
    }

    /// Number of staged mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// The staged mutations, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &StagedMutation> {
        self.mutations.iter()
    }

    /// Replay the log against `cache`, in order.
    ///
    /// Updates are published immediately. Inserts only contribute their partition to the returned
    /// list, one element per insert; the caller runs the eviction checks once it has released its
    /// locks, so that it cannot evict anything it still references.
    ///
    /// The log is empty afterwards.
    pub fn apply(&mut self, cache: &PartitionedLockCache) -> Vec<usize> {
        let mut eviction_checks = Vec::new();
        for mutation in self.mutations.drain(..) {
            match mutation {
                StagedMutation::Insert { key } => eviction_checks.push(cache.partition_of(&key)),
                StagedMutation::Update { key, value } => {
                    if !cache.publish(&key, value) {
                        tracing::debug!(key = %key, "no room to cache committed value");
                    }
                }
            }
        }
        eviction_checks
    }

    /// Drop every staged mutation without touching the cache.
    pub fn discard(&mut self) {
        self.mutations.clear();
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn cache() -> PartitionedLockCache {
        PartitionedLockCache::new(&CacheConfig {
            partitions: 2,
            partition_capacity: 8,
            ..CacheConfig::default()
        })
    }

    #[test]
    fn overflow_is_reported_and_nothing_is_lost() {
        let mut log = StagingLog::with_limit(2);
        log.stage_insert(CacheKey::new(0, "a")).unwrap();
        log.stage_update(CacheKey::new(0, "a"), EntryValue::Known(1))
            .unwrap();
        let err = log.stage_insert(CacheKey::new(0, "b")).unwrap_err();
        assert!(matches!(err, NsError::StagingOverflow { limit: 2 }));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn apply_publishes_updates_in_order() {
        let cache = cache();
        let key = CacheKey::new(0, "a");
        let mut log = StagingLog::with_limit(8);
        log.stage_insert(key.clone()).unwrap();
        log.stage_update(key.clone(), EntryValue::Known(1)).unwrap();
        log.stage_update(key.clone(), EntryValue::NotExist).unwrap();

        let checks = log.apply(&cache);
        assert_eq!(checks, vec![cache.partition_of(&key)]);
        assert!(log.is_empty());
        let entry = cache.find(&key).unwrap();
        assert_eq!(entry.value(), EntryValue::NotExist, "last update wins");
        entry.lock().undeclare().unwrap();
    }

    #[test]
    fn discard_leaves_the_cache_untouched() {
        let cache = cache();
        let key = CacheKey::new(0, "a");
        let (entry, _) = cache.find_or_create(&key).unwrap();

        let mut log = StagingLog::with_limit(8);
        log.stage_insert(key.clone()).unwrap();
        log.stage_update(key, EntryValue::Known(7)).unwrap();
        log.discard();

        assert!(log.is_empty());
        assert_eq!(entry.value(), EntryValue::Unknown);
        entry.lock().undeclare().unwrap();
    }
}
