//! The process-wide lock manager, built once and shared by every transaction.

use tracing::{debug, info};

use crate::cache::{CacheStatsSnapshot, PartitionedLockCache};
use crate::config::{CacheConfig, ConfigError};
use crate::error::{NsError, NsResult};
use crate::store::NamespaceStore;
use crate::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use crate::txn::Transaction;

/// Owns the lock cache and the store it fronts.
///
/// Construct one at startup and share it (typically behind an `Arc`). Transactions borrow it, so
/// it cannot be dropped while any is in flight.
#[derive(Debug)]
pub struct NamespaceLockService<S: NamespaceStore> {
    config: CacheConfig,
    cache: PartitionedLockCache,
    store: S,
    next_txn: AtomicU64,
    shut_down: AtomicBool,
}

impl<S: NamespaceStore> NamespaceLockService<S> {
    /// Validate `config` and build the service around `store`.
    pub fn new(config: CacheConfig, store: S) -> Result<Self, ConfigError> {
        config.validate().map_err(ConfigError::ValidationErrors)?;
        let cache = PartitionedLockCache::new(&config);
        info!(
            partitions = config.partitions,
            capacity = cache.capacity(),
            "namespace lock service started"
        );
        Ok(Self {
            config,
            cache,
            store,
            next_txn: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Start a transaction.
    pub fn begin(&self) -> NsResult<Transaction<'_, S::Txn>> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(NsError::ShutDown);
        }
        let store = self.store.begin()?;
        let id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        debug!(txn = id, "transaction started");
        Ok(Transaction::new(id, &self.cache, &self.config, store))
    }

    /// Drop every cached value. Entries held by running transactions survive as provisional.
    pub fn invalidate_all(&self) {
        let outcome = self.cache.clear();
        info!(
            removed = outcome.removed,
            retained = outcome.retained,
            "lock cache invalidated"
        );
    }

    /// Refuse new transactions and empty the cache.
    ///
    /// Transactions already running keep working and release their locks normally.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let stats = self.stats();
        self.cache.clear();
        info!(
            hits = stats.hits,
            misses = stats.misses,
            evictions = stats.evictions,
            "namespace lock service shut down"
        );
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The lock cache.
    #[must_use]
    pub fn cache(&self) -> &PartitionedLockCache {
        &self.cache
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }
}
