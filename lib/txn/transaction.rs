//! The per-transaction handle through which metadata operations resolve and mutate paths.

use tracing::{debug, instrument, warn};

use crate::cache::{CacheEntry, NodeIdent, PartitionedLockCache};
use crate::config::CacheConfig;
use crate::error::{NsError, NsResult};
use crate::lock::HeldLocks;
use crate::resolve::memo::LockTree;
use crate::resolve::resolver::{Resolution, ResolveKind, Resolver};
use crate::store::StoreTxn;
use crate::txn::staging::StagingLog;

/// One transaction against the namespace.
///
/// Owns the store transaction, the locks taken so far, the staged cache mutations and the lock
/// memo. Every lock is held until [`commit`](Self::commit) or [`abort`](Self::abort); dropping an
/// unfinished transaction aborts it.
///
/// A fatal error (see [`NsError::is_fatal`]) poisons the transaction: every later call returns
/// [`NsError::Poisoned`] and `commit` aborts instead.
pub struct Transaction<'s, T: StoreTxn> {
    id: u64,
    cache: &'s PartitionedLockCache,
    config: &'s CacheConfig,
    store: Option<T>,
    locks: HeldLocks<CacheEntry>,
    staging: StagingLog,
    memo: LockTree,
    poisoned: bool,
}

impl<'s, T: StoreTxn> Transaction<'s, T> {
    pub(crate) fn new(
        id: u64,
        cache: &'s PartitionedLockCache,
        config: &'s CacheConfig,
        store: T,
    ) -> Self {
        Self {
            id,
            cache,
            config,
            store: Some(store),
            locks: HeldLocks::with_capacity(config.max_held_locks),
            staging: StagingLog::with_limit(config.max_staged_mutations),
            memo: LockTree::new(config.root_id),
            poisoned: false,
        }
    }

    /// Service-unique transaction number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether an earlier fatal error poisoned this transaction.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Number of locks currently held.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.locks.held_count()
    }

    /// Number of cache mutations waiting for commit.
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staging.len()
    }

    /// Resolve `path` for the given kind of request.
    pub fn resolve(
        &mut self,
        path: &str,
        kind: ResolveKind,
        allow_root: bool,
    ) -> NsResult<Resolution> {
        let result = self.resolver()?.resolve(path, kind, allow_root);
        self.settle(result)
    }

    /// Resolve `path`, locking every component shared so the answer holds until the end of the
    /// transaction. `Ok(None)` if the final component does not exist.
    pub fn lookup(&mut self, path: &str) -> NsResult<Option<NodeIdent>> {
        self.resolve(path, ResolveKind::Lookup { lock_final: true }, true)
            .map(|r| r.id)
    }

    /// Like [`lookup`](Self::lookup), but the final component is read without a lock.
    pub fn stat(&mut self, path: &str) -> NsResult<Option<NodeIdent>> {
        self.resolve(path, ResolveKind::Lookup { lock_final: false }, true)
            .map(|r| r.id)
    }

    /// Create `path` with the given id.
    pub fn create(&mut self, path: &str, id: NodeIdent) -> NsResult<Resolution> {
        self.resolve(path, ResolveKind::CreateFinal { id }, false)
    }

    /// Delete `path`, returning the id it had.
    pub fn remove(&mut self, path: &str) -> NsResult<NodeIdent> {
        let resolution = self.resolve(path, ResolveKind::DeleteFinal, false)?;
        resolution
            .id
            .ok_or_else(|| NsError::program("delete resolved without an id"))
    }

    /// Move `from` to `to`, returning the moved id.
    pub fn rename(&mut self, from: &str, to: &str) -> NsResult<NodeIdent> {
        let result = self.resolver()?.rename(from, to);
        self.settle(result)
    }

    fn resolver(&mut self) -> NsResult<Resolver<'_, T>> {
        if self.poisoned {
            return Err(NsError::Poisoned);
        }
        let Some(store) = self.store.as_mut() else {
            return Err(NsError::program("operation on a finished transaction"));
        };
        Ok(Resolver {
            cache: self.cache,
            config: self.config,
            store,
            locks: &mut self.locks,
            staging: &mut self.staging,
            memo: &mut self.memo,
        })
    }

    fn settle<R>(&mut self, result: NsResult<R>) -> NsResult<R> {
        if let Err(e) = &result
            && e.is_fatal()
        {
            warn!(txn = self.id, error = %e, "transaction poisoned");
            self.poisoned = true;
        }
        result
    }

    /// Commit the store transaction, publish staged values, release every lock, then run the
    /// eviction checks owed by the entries this transaction created.
    ///
    /// A poisoned transaction, or one whose store commit fails, is aborted instead.
    #[instrument(name = "Transaction::commit", skip(self), fields(txn = self.id))]
    pub fn commit(mut self) -> NsResult<()> {
        if self.poisoned {
            self.rollback();
            return Err(NsError::Poisoned);
        }
        let Some(store) = self.store.take() else {
            return Err(NsError::program("commit of a finished transaction"));
        };
        if let Err(e) = store.commit() {
            warn!(error = %e, "store commit failed; discarding staged mutations");
            self.staging.discard();
            self.release_locks();
            return Err(e.into());
        }

        let staged = self.staging.len();
        let eviction_checks = self.staging.apply(self.cache);
        let released = self.locks.release_all();
        let evicted = eviction_checks
            .into_iter()
            .filter(|&partition| self.cache.evict_if_needed(partition))
            .count();
        debug!(staged, evicted, "transaction committed");
        released
    }

    /// Roll back the store transaction, discard staged mutations and release every lock.
    #[instrument(name = "Transaction::abort", skip(self), fields(txn = self.id))]
    pub fn abort(mut self) {
        self.rollback();
    }

    fn rollback(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        store.abort();
        let discarded = self.staging.len();
        self.staging.discard();
        self.release_locks();
        debug!(txn = self.id, discarded, "transaction aborted");
    }

    fn release_locks(&mut self) {
        if let Err(error) = self.locks.release_all() {
            warn!(txn = self.id, %error, "lock release failed during cleanup");
        }
    }
}

impl<T: StoreTxn> Drop for Transaction<'_, T> {
    fn drop(&mut self) {
        self.rollback();
    }
}

impl<T: StoreTxn> std::fmt::Debug for Transaction<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("locks", &self.locks.len())
            .field("staged", &self.staging.len())
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}
