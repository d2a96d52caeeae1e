/// Cache entries and their keys.
pub mod entry;
/// Cache eviction policies.
pub mod eviction;
/// The partitioned lock cache.
pub mod lock_cache;
/// A single latched shard.
pub mod partition;

pub use entry::{CacheEntry, CacheKey, EntryValue, MAX_NODE_ID, MAX_USAGE_COUNT, NodeIdent};
pub use lock_cache::{CacheStats, CacheStatsSnapshot, PartitionedLockCache};
