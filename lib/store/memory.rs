use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use scc::HashMap as ConcurrentHashMap;
use scc::hash_map::Entry;

use crate::cache::NodeIdent;
use crate::store::{NamespaceStore, StoreError, StoreTxn};

type StoreKey = (NodeIdent, Box<str>);

/// A transactional in-memory store with read-committed isolation.
///
/// Committed mappings live in a concurrent map. Each transaction buffers its writes in a private
/// overlay that is applied on commit and simply dropped otherwise.
#[derive(Clone, Default)]
pub struct MemoryStore {
    committed: Arc<ConcurrentHashMap<StoreKey, NodeIdent>>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a committed mapping, bypassing any transaction.
    #[must_use]
    pub fn get(&self, parent: NodeIdent, name: &str) -> Option<NodeIdent> {
        self.committed
            .read_sync(&(parent, Box::from(name)), |_, id| *id)
    }

    /// Number of committed mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    /// Whether no mapping is committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl NamespaceStore for MemoryStore {
    type Txn = MemoryTxn;

    fn begin(&self) -> Result<MemoryTxn, StoreError> {
        Ok(MemoryTxn {
            committed: Arc::clone(&self.committed),
            overlay: BTreeMap::new(),
        })
    }
}

/// A [`MemoryStore`] transaction.
///
/// `None` in the overlay is a tombstone for a pending delete.
pub struct MemoryTxn {
    committed: Arc<ConcurrentHashMap<StoreKey, NodeIdent>>,
    overlay: BTreeMap<StoreKey, Option<NodeIdent>>,
}

impl StoreTxn for MemoryTxn {
    fn lookup(&mut self, parent: NodeIdent, name: &str) -> Result<Option<NodeIdent>, StoreError> {
        let key = (parent, Box::from(name));
        if let Some(pending) = self.overlay.get(&key) {
            return Ok(*pending);
        }
        Ok(self.committed.read_sync(&key, |_, id| *id))
    }

    fn insert(&mut self, parent: NodeIdent, name: &str, id: NodeIdent) -> Result<(), StoreError> {
        if self.lookup(parent, name)?.is_some() {
            return Err(StoreError::Duplicate {
                parent,
                name: name.to_owned(),
            });
        }
        self.overlay.insert((parent, Box::from(name)), Some(id));
        Ok(())
    }

    fn delete(&mut self, parent: NodeIdent, name: &str) -> Result<(), StoreError> {
        if self.lookup(parent, name)?.is_none() {
            return Err(StoreError::Missing {
                parent,
                name: name.to_owned(),
            });
        }
        self.overlay.insert((parent, Box::from(name)), None);
        Ok(())
    }

    fn commit(self) -> Result<(), StoreError> {
        for (key, pending) in self.overlay {
            match pending {
                Some(id) => match self.committed.entry_sync(key) {
                    Entry::Occupied(mut occ) => *occ.get_mut() = id,
                    Entry::Vacant(vac) => {
                        vac.insert_entry(id);
                    }
                },
                None => {
                    self.committed.remove_sync(&key);
                }
            }
        }
        Ok(())
    }

    fn abort(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncommitted_writes_are_private() {
        let store = MemoryStore::new();
        let mut t1 = store.begin().unwrap();
        let mut t2 = store.begin().unwrap();
        t1.insert(0, "a", 5).unwrap();

        assert_eq!(t1.lookup(0, "a").unwrap(), Some(5));
        assert_eq!(t2.lookup(0, "a").unwrap(), None);
        assert_eq!(store.get(0, "a"), None);

        t1.commit().unwrap();
        assert_eq!(t2.lookup(0, "a").unwrap(), Some(5), "read committed");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn abort_and_drop_discard_changes() {
        let store = MemoryStore::new();
        let mut t = store.begin().unwrap();
        t.insert(0, "a", 5).unwrap();
        t.abort();

        let mut t = store.begin().unwrap();
        t.insert(0, "b", 6).unwrap();
        drop(t);
        assert!(store.is_empty());
    }

    #[test]
    fn delete_then_reinsert_within_one_transaction() {
        let store = MemoryStore::new();
        let mut t = store.begin().unwrap();
        t.insert(0, "a", 1).unwrap();
        t.commit().unwrap();

        let mut t = store.begin().unwrap();
        t.delete(0, "a").unwrap();
        assert_eq!(t.lookup(0, "a").unwrap(), None);
        assert!(matches!(
            t.delete(0, "a"),
            Err(StoreError::Missing { parent: 0, .. })
        ));
        t.insert(0, "a", 2).unwrap();
        assert!(matches!(
            t.insert(0, "a", 3),
            Err(StoreError::Duplicate { parent: 0, .. })
        ));
        t.commit().unwrap();
        assert_eq!(store.get(0, "a"), Some(2));
    }
}
