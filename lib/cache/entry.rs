//! Cache entries: one per `(parent_id, name)` key, each owning its own lock.

use std::fmt;

use crate::lock::{AtomicRwLock, LockHandle};
use crate::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// Identifier of a namespace object (directory or file).
pub type NodeIdent = u64;

/// Cap on an entry's usage counter. An entry touched many times survives at most this many
/// eviction sweeps without being touched again.
pub const MAX_USAGE_COUNT: i32 = 5;

const UNKNOWN_BITS: u64 = u64::MAX;
const NOT_EXIST_BITS: u64 = u64::MAX - 1;

/// Largest id that can be represented as [`EntryValue::Known`]. The two ids above it encode the
/// sentinel values.
pub const MAX_NODE_ID: NodeIdent = u64::MAX - 2;

/// Key of a cache entry: the parent directory id plus the entry name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Id of the containing directory.
    pub parent_id: NodeIdent,
    /// Entry name within the parent.
    pub name: Box<str>,
}

impl CacheKey {
    /// Build a key.
    pub fn new(parent_id: NodeIdent, name: impl Into<Box<str>>) -> Self {
        Self {
            parent_id,
            name: name.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?})", self.parent_id, self.name)
    }
}

/// What a cache entry knows about its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryValue {
    /// The key resolves to this id.
    Known(NodeIdent),
    /// The key is known not to exist.
    NotExist,
    /// Provisional: nothing authoritative is known. Always treated as a miss.
    Unknown,
}

impl EntryValue {
    /// Whether the value can answer a lookup without consulting the store.
    #[must_use]
    pub fn is_authoritative(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// The id, if the key is known to exist.
    #[must_use]
    pub fn id(self) -> Option<NodeIdent> {
        match self {
            Self::Known(id) => Some(id),
            Self::NotExist | Self::Unknown => None,
        }
    }

    /// Translate a store lookup result.
    #[must_use]
    pub fn from_lookup(found: Option<NodeIdent>) -> Self {
        found.map_or(Self::NotExist, Self::Known)
    }

    fn encode(self) -> u64 {
        match self {
            Self::Known(id) => {
                debug_assert!(id <= MAX_NODE_ID, "id {id} collides with a sentinel");
                id
            }
            Self::NotExist => NOT_EXIST_BITS,
            Self::Unknown => UNKNOWN_BITS,
        }
    }

    fn decode(bits: u64) -> Self {
        match bits {
            UNKNOWN_BITS => Self::Unknown,
            NOT_EXIST_BITS => Self::NotExist,
            id => Self::Known(id),
        }
    }
}

/// One cached directory entry.
///
/// The partition latch only guards whether the entry is in the table. The value is read under the
/// entry's own lock and written at commit by the transaction holding it.
pub struct CacheEntry {
    key: CacheKey,
    hash: u64,
    value: AtomicU64,
    lock: AtomicRwLock,
    usage: AtomicI32,
}

impl CacheEntry {
    pub(crate) fn new(key: CacheKey, hash: u64, value: EntryValue) -> Self {
        Self {
            key,
            hash,
            value: AtomicU64::new(value.encode()),
            lock: AtomicRwLock::new(),
            usage: AtomicI32::new(0),
        }
    }

    /// The key this entry caches.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }

    /// The cached value.
    #[must_use]
    pub fn value(&self) -> EntryValue {
        EntryValue::decode(self.value.load(Ordering::Acquire))
    }

    pub(crate) fn set_value(&self, value: EntryValue) {
        self.value.store(value.encode(), Ordering::Release);
    }

    /// The entry's lock.
    #[must_use]
    pub fn lock(&self) -> &AtomicRwLock {
        &self.lock
    }

    /// Current hotness credit.
    #[must_use]
    pub fn usage_count(&self) -> i32 {
        self.usage.load(Ordering::Relaxed)
    }

    /// Whether nobody references this entry, i.e. it may be reclaimed.
    #[must_use]
    pub fn check_destroyable(&self) -> bool {
        self.lock.check_destroyable()
    }

    /// Bump the hotness credit, saturating at [`MAX_USAGE_COUNT`].
    pub(crate) fn bump_usage(&self) {
        let _ = self
            .usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < MAX_USAGE_COUNT).then_some(n + 1)
            });
    }

    /// Second-chance test for eviction. Returns `true` if the entry has no credit left; otherwise
    /// spends one unit of credit and returns `false`.
    pub(crate) fn spend_usage(&self) -> bool {
        self.usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n > 0).then_some(n - 1)
            })
            .is_err()
    }
}

impl LockHandle for CacheEntry {
    fn rwlock(&self) -> &AtomicRwLock {
        &self.lock
    }

    fn note_acquired(&self) {
        self.bump_usage();
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("value", &self.value())
            .field("lock", &self.lock.state())
            .field("usage", &self.usage_count())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn sentinels_survive_the_atomic_word() {
        let entry = CacheEntry::new(CacheKey::new(0, "a"), 0, EntryValue::Unknown);
        assert_eq!(entry.value(), EntryValue::Unknown);
        entry.set_value(EntryValue::NotExist);
        assert_eq!(entry.value(), EntryValue::NotExist);
        entry.set_value(EntryValue::Known(MAX_NODE_ID));
        assert_eq!(entry.value(), EntryValue::Known(MAX_NODE_ID));
        entry.set_value(EntryValue::Known(0));
        assert_eq!(entry.value().id(), Some(0));
    }

    #[test]
    fn usage_saturates_and_spends_down() {
        let entry = CacheEntry::new(CacheKey::new(0, "a"), 0, EntryValue::Unknown);
        assert!(entry.spend_usage(), "a fresh entry has no credit");
        for _ in 0..10 {
            entry.bump_usage();
        }
        assert_eq!(entry.usage_count(), MAX_USAGE_COUNT);
        for _ in 0..MAX_USAGE_COUNT {
            assert!(!entry.spend_usage());
        }
        assert!(entry.spend_usage());
        assert_eq!(entry.usage_count(), 0);
    }
}
