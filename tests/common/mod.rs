#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use nslock::cache::NodeIdent;
use nslock::store::MemoryTxn;
use nslock::{CacheConfig, MemoryStore, NamespaceLockService, NamespaceStore, StoreError, StoreTxn};

/// Knobs shared between a [`FaultyStore`] and the test driving it.
#[derive(Debug, Default)]
pub struct Faults {
    pub fail_lookups: AtomicBool,
    pub fail_commits: AtomicBool,
    pub lookups: AtomicUsize,
}

impl Faults {
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn reset_lookups(&self) {
        self.lookups.store(0, Ordering::SeqCst);
    }
}

/// A [`MemoryStore`] that counts lookups and fails on demand.
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub faults: Arc<Faults>,
}

pub struct FaultyTxn {
    inner: MemoryTxn,
    faults: Arc<Faults>,
}

impl NamespaceStore for FaultyStore {
    type Txn = FaultyTxn;

    fn begin(&self) -> Result<FaultyTxn, StoreError> {
        Ok(FaultyTxn {
            inner: self.inner.begin()?,
            faults: Arc::clone(&self.faults),
        })
    }
}

impl StoreTxn for FaultyTxn {
    fn lookup(&mut self, parent: NodeIdent, name: &str) -> Result<Option<NodeIdent>, StoreError> {
        self.faults.lookups.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected lookup failure".to_owned()));
        }
        self.inner.lookup(parent, name)
    }

    fn insert(&mut self, parent: NodeIdent, name: &str, id: NodeIdent) -> Result<(), StoreError> {
        self.inner.insert(parent, name, id)
    }

    fn delete(&mut self, parent: NodeIdent, name: &str) -> Result<(), StoreError> {
        self.inner.delete(parent, name)
    }

    fn commit(self) -> Result<(), StoreError> {
        if self.faults.fail_commits.load(Ordering::SeqCst) {
            self.inner.abort();
            return Err(StoreError::Backend("injected commit failure".to_owned()));
        }
        self.inner.commit()
    }

    fn abort(self) {
        self.inner.abort();
    }
}

pub fn config(partitions: usize, partition_capacity: usize) -> CacheConfig {
    CacheConfig {
        partitions,
        partition_capacity,
        ..CacheConfig::default()
    }
}

pub fn service() -> NamespaceLockService<MemoryStore> {
    NamespaceLockService::new(config(8, 64), MemoryStore::new()).unwrap()
}

pub fn faulty_service() -> (NamespaceLockService<FaultyStore>, Arc<Faults>) {
    let store = FaultyStore::default();
    let faults = Arc::clone(&store.faults);
    (
        NamespaceLockService::new(config(8, 64), store).unwrap(),
        faults,
    )
}

/// Create each `(path, id)` in its own committed transaction, parents first.
pub fn seed<S: NamespaceStore>(service: &NamespaceLockService<S>, entries: &[(&str, NodeIdent)]) {
    for &(path, id) in entries {
        let mut txn = service.begin().unwrap();
        txn.create(path, id).unwrap();
        txn.commit().unwrap();
    }
}

/// A small tree: `/a` (1), `/a/b` (2), `/a/b/c` (3), `/d` (4).
pub fn seed_tree<S: NamespaceStore>(service: &NamespaceLockService<S>) {
    seed(service, &[("/a", 1), ("/a/b", 2), ("/a/b/c", 3), ("/d", 4)]);
}
