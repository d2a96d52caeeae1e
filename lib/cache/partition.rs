//! One independently latched shard of the lock cache.

use crate::cache::entry::{CacheEntry, CacheKey, EntryValue};
use crate::sync::atomic::{AtomicUsize, Ordering};
use crate::sync::{self, Arc, RwLock, RwLockReadGuard};

/// Bucketed hash table of entries. Bucket count is fixed at construction.
#[derive(Debug)]
pub struct Table {
    buckets: Box<[Vec<Arc<CacheEntry>>]>,
}

impl Table {
    fn new(bucket_count: usize) -> Self {
        Self {
            buckets: (0..bucket_count).map(|_| Vec::new()).collect(),
        }
    }

    /// Number of buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Entries chained in bucket `idx`.
    #[must_use]
    pub fn bucket(&self, idx: usize) -> &[Arc<CacheEntry>] {
        &self.buckets[idx]
    }

    fn bucket_of(&self, hash: u64) -> usize {
        // The low bits chose the partition; take the bucket from the high half.
        #[expect(
            clippy::cast_possible_truncation,
            reason = "masked to the bucket count, which is a usize"
        )]
        let idx = (hash >> 32) as usize & (self.buckets.len() - 1);
        idx
    }

    fn get(&self, hash: u64, key: &CacheKey) -> Option<&Arc<CacheEntry>> {
        self.buckets[self.bucket_of(hash)]
            .iter()
            .find(|e| e.key() == key)
    }
}

/// Why [`Partition::find_or_insert`] could not return an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionFull;

/// Outcome of [`Partition::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearOutcome {
    /// Entries physically removed.
    pub removed: usize,
    /// Entries still referenced, kept with their value reset to [`EntryValue::Unknown`].
    pub retained: usize,
}

/// A fixed-capacity shard.
///
/// The latch guards the *shape* of the table only: which entries exist. Readers of an entry's
/// payload synchronize on the entry lock, so two threads resolving unrelated keys of the same
/// partition never wait on each other beyond the brief latch hold.
///
/// Every entry handed out is *declared* while the latch is still held. Reclamation takes the latch
/// exclusively and re-checks destroyability, so an entry can never be removed between a caller
/// finding it and acquiring it.
#[derive(Debug)]
pub struct Partition {
    index: usize,
    table: RwLock<Table>,
    live: AtomicUsize,
    capacity: usize,
}

impl Partition {
    /// Create an empty partition that holds at most `capacity` entries.
    #[must_use]
    pub fn new(index: usize, capacity: usize) -> Self {
        Self {
            index,
            table: RwLock::new(Table::new(capacity.next_power_of_two())),
            live: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Position of this partition within the cache.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Hard entry limit.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Whether the partition holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared access to the table, for eviction scans.
    pub(crate) fn read_table(&self) -> RwLockReadGuard<'_, Table> {
        sync::read(&self.table)
    }

    /// Find `key` and declare a session on it.
    pub fn find(&self, hash: u64, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let table = sync::read(&self.table);
        let entry = table.get(hash, key)?;
        entry.lock().declare();
        Some(Arc::clone(entry))
    }

    /// Find `key`, creating a provisional entry if absent, and declare a session on it.
    ///
    /// Returns whether the entry was created by this call.
    pub fn find_or_insert(
        &self,
        hash: u64,
        key: &CacheKey,
    ) -> Result<(Arc<CacheEntry>, bool), PartitionFull> {
        if let Some(entry) = self.find(hash, key) {
            return Ok((entry, false));
        }

        let mut table = sync::write(&self.table);
        // Someone may have inserted the key between our shared lookup and the upgrade.
        if let Some(entry) = table.get(hash, key) {
            entry.lock().declare();
            return Ok((Arc::clone(entry), false));
        }
        if self.len() >= self.capacity {
            return Err(PartitionFull);
        }

        let entry = Arc::new(CacheEntry::new(key.clone(), hash, EntryValue::Unknown));
        entry.lock().declare();
        let bucket = table.bucket_of(hash);
        table.buckets[bucket].push(Arc::clone(&entry));
        self.live.fetch_add(1, Ordering::AcqRel);
        Ok((entry, true))
    }

    /// Write `value` for `key`, re-creating the entry if it was reclaimed meanwhile.
    ///
    /// Returns `false` if the entry is gone and there is no room to bring it back; the cache is
    /// optional, so the value is simply not cached.
    pub fn publish(&self, hash: u64, key: &CacheKey, value: EntryValue) -> bool {
        let mut table = sync::write(&self.table);
        if let Some(entry) = table.get(hash, key) {
            entry.set_value(value);
            return true;
        }
        if self.len() >= self.capacity {
            return false;
        }
        let bucket = table.bucket_of(hash);
        table.buckets[bucket].push(Arc::new(CacheEntry::new(key.clone(), hash, value)));
        self.live.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Remove `key` if nobody references it.
    pub fn remove(&self, hash: u64, key: &CacheKey) -> bool {
        let mut table = sync::write(&self.table);
        let bucket = table.bucket_of(hash);
        self.remove_where(&mut table.buckets[bucket], |e| e.key() == key)
    }

    /// Remove exactly `victim` if it is still present and still destroyable.
    pub(crate) fn remove_entry(&self, victim: &Arc<CacheEntry>) -> bool {
        let mut table = sync::write(&self.table);
        let bucket = table.bucket_of(victim.hash());
        self.remove_where(&mut table.buckets[bucket], |e| Arc::ptr_eq(e, victim))
    }

    /// Drop every destroyable entry. Referenced entries stay (their holders rely on their lock)
    /// but lose their cached value.
    pub fn clear(&self) -> ClearOutcome {
        let mut table = sync::write(&self.table);
        let mut outcome = ClearOutcome::default();
        for bucket in table.buckets.iter_mut() {
            bucket.retain(|e| {
                if e.check_destroyable() {
                    outcome.removed += 1;
                    false
                } else {
                    e.set_value(EntryValue::Unknown);
                    outcome.retained += 1;
                    true
                }
            });
        }
        self.live.fetch_sub(outcome.removed, Ordering::AcqRel);
        outcome
    }

    fn remove_where(
        &self,
        bucket: &mut Vec<Arc<CacheEntry>>,
        pred: impl Fn(&Arc<CacheEntry>) -> bool,
    ) -> bool {
        let Some(pos) = bucket.iter().position(pred) else {
            return false;
        };
        if !bucket[pos].check_destroyable() {
            return false;
        }
        bucket.swap_remove(pos);
        self.live.fetch_sub(1, Ordering::AcqRel);
        true
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::lock::LockMode;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(1, name)
    }

    #[test]
    fn find_or_insert_declares_and_reports_creation() {
        let partition = Partition::new(0, 4);
        let (entry, created) = partition.find_or_insert(7, &key("a")).unwrap();
        assert!(created);
        assert!(!entry.check_destroyable());
        assert_eq!(entry.value(), EntryValue::Unknown);

        let (again, created) = partition.find_or_insert(7, &key("a")).unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&entry, &again));
        assert_eq!(entry.lock().state().ref_count(), 2);
        assert_eq!(partition.len(), 1);
    }

    #[test]
    fn full_partition_refuses_new_keys_but_serves_existing() {
        let partition = Partition::new(0, 1);
        let (a, _) = partition.find_or_insert(1, &key("a")).unwrap();
        assert_eq!(
            partition.find_or_insert(2, &key("b")).unwrap_err(),
            PartitionFull
        );
        assert!(partition.find_or_insert(1, &key("a")).is_ok());
        a.lock().undeclare().unwrap();
    }

    #[test]
    fn remove_skips_referenced_entries() {
        let partition = Partition::new(0, 4);
        let (a, _) = partition.find_or_insert(1, &key("a")).unwrap();
        assert!(!partition.remove(1, &key("a")));
        a.lock().undeclare().unwrap();
        assert!(partition.remove(1, &key("a")));
        assert!(partition.is_empty());
        assert!(partition.find(1, &key("a")).is_none());
    }

    #[test]
    fn publish_recreates_reclaimed_entries() {
        let partition = Partition::new(0, 4);
        assert!(partition.publish(3, &key("x"), EntryValue::Known(9)));
        let found = partition.find(3, &key("x")).unwrap();
        assert_eq!(found.value(), EntryValue::Known(9));
        found.lock().undeclare().unwrap();
    }

    #[test]
    fn clear_keeps_held_entries_but_forgets_their_value() {
        let partition = Partition::new(0, 4);
        partition.publish(1, &key("idle"), EntryValue::Known(1));
        let (held, _) = partition.find_or_insert(2, &key("held")).unwrap();
        held.set_value(EntryValue::Known(2));
        held.lock().acquire(LockMode::Shared);
        held.lock().undeclare().unwrap();

        let outcome = partition.clear();
        assert_eq!(
            outcome,
            ClearOutcome {
                removed: 1,
                retained: 1
            }
        );
        assert_eq!(held.value(), EntryValue::Unknown);
        assert_eq!(partition.len(), 1);
        held.lock().release(LockMode::Shared).unwrap();
    }
}
