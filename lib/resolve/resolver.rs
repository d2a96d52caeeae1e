//! Component-by-component path resolution.
//!
//! Every component is locked at most once per transaction. The memo tree records what was taken,
//! so a repeated visit reuses the lock, and a request that would need a stronger lock on something
//! the transaction already holds surfaces as [`NsError::PathLockConflict`] instead of spinning
//! against itself forever.
//!
//! Locks are always taken parent before child.

use tracing::trace;

use crate::cache::{
    CacheEntry, CacheKey, EntryValue, MAX_NODE_ID, NodeIdent, PartitionedLockCache,
};
use crate::config::CacheConfig;
use crate::error::{NsError, NsResult};
use crate::lock::{HeldLocks, LockMode};
use crate::resolve::memo::{LockLevel, LockTree, NodeId};
use crate::resolve::path::{parse_path, prefix};
use crate::store::StoreTxn;
use crate::sync::Arc;
use crate::txn::staging::StagingLog;

/// What to do with the final component of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveKind {
    /// Read the final component. With `lock_final` it is locked shared, making the answer stable
    /// until the transaction ends; without, it is a plain unlocked read.
    Lookup {
        /// Whether to lock the final component.
        lock_final: bool,
    },
    /// Create the final component with the given id. It must not exist.
    CreateFinal {
        /// Id of the new entry.
        id: NodeIdent,
    },
    /// Delete the final component. It must exist.
    DeleteFinal,
}

/// Result of resolving a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Id of the directory containing the final component. `None` for the root.
    pub parent_id: Option<NodeIdent>,
    /// Name of the final component. `None` for the root.
    pub name: Option<String>,
    /// Id of the final component, if it exists. For deletes, the id that was removed.
    pub id: Option<NodeIdent>,
}

/// Borrowed view of one transaction's state, used for the duration of a single operation.
pub(crate) struct Resolver<'r, T: StoreTxn> {
    pub(crate) cache: &'r PartitionedLockCache,
    pub(crate) config: &'r CacheConfig,
    pub(crate) store: &'r mut T,
    pub(crate) locks: &'r mut HeldLocks<CacheEntry>,
    pub(crate) staging: &'r mut StagingLog,
    pub(crate) memo: &'r mut LockTree,
}

impl<T: StoreTxn> Resolver<'_, T> {
    pub(crate) fn resolve(
        &mut self,
        path: &str,
        kind: ResolveKind,
        allow_root: bool,
    ) -> NsResult<Resolution> {
        let components = parse_path(path, self.config.max_name_len)?;
        let Some(&name) = components.last() else {
            return match kind {
                ResolveKind::Lookup { .. } if allow_root => Ok(Resolution {
                    parent_id: None,
                    name: None,
                    id: Some(self.config.root_id),
                }),
                _ => Err(NsError::PathIsRoot),
            };
        };

        let read_only = matches!(kind, ResolveKind::Lookup { .. });
        let (parent, parent_id) = self.walk_parent(&components, read_only)?;
        let key = CacheKey::new(parent_id, name);
        let id = match kind {
            ResolveKind::Lookup { lock_final } => {
                self.lookup_final(parent, &key, lock_final)?.id()
            }
            ResolveKind::CreateFinal { id } => {
                Some(self.create_final(parent, &key, id, &components)?)
            }
            ResolveKind::DeleteFinal => Some(self.delete_final(parent, &key, &components)?),
        };
        Ok(Resolution {
            parent_id: Some(parent_id),
            name: Some(name.to_owned()),
            id,
        })
    }

    /// Move the entry at `from` to `to`, which must not exist. Returns the moved id.
    ///
    /// Both final components are locked exclusively before anything is changed, in a
    /// process-wide order (component-wise lexicographic on the paths), so two concurrent renames
    /// over the same pair of paths cannot deadlock.
    pub(crate) fn rename(&mut self, from: &str, to: &str) -> NsResult<NodeIdent> {
        let src = parse_path(from, self.config.max_name_len)?;
        let dst = parse_path(to, self.config.max_name_len)?;
        if src.is_empty() || dst.is_empty() {
            return Err(NsError::PathIsRoot);
        }

        let (src_node, src_key, dst_node, dst_key) = if src <= dst {
            let (sn, sk) = self.lock_path_final(&src)?;
            let (dn, dk) = self.lock_path_final(&dst)?;
            (sn, sk, dn, dk)
        } else {
            let (dn, dk) = self.lock_path_final(&dst)?;
            let (sn, sk) = self.lock_path_final(&src)?;
            (sn, sk, dn, dk)
        };

        let Some(id) = self.store.lookup(src_key.parent_id, &src_key.name)? else {
            self.learn(src_node, &src_key, EntryValue::NotExist)?;
            return Err(NsError::PathNotExists {
                path: prefix(&src, src.len()),
            });
        };
        if src == dst {
            return Ok(id);
        }
        if let Some(existing) = self.store.lookup(dst_key.parent_id, &dst_key.name)? {
            self.learn(dst_node, &dst_key, EntryValue::Known(existing))?;
            return Err(NsError::PathExists {
                path: prefix(&dst, dst.len()),
            });
        }

        self.store.delete(src_key.parent_id, &src_key.name)?;
        self.store.insert(dst_key.parent_id, &dst_key.name, id)?;
        self.staging.stage_update(src_key, EntryValue::NotExist)?;
        self.staging.stage_update(dst_key, EntryValue::Known(id))?;
        self.memo
            .record(src_node, LockLevel::Exclusive, EntryValue::NotExist);
        self.memo
            .record(dst_node, LockLevel::ExclusiveForCreate, EntryValue::Known(id));
        Ok(id)
    }

    /// Walk every component but the last, locking each shared.
    ///
    /// Returns the memo node and id of the final component's parent.
    fn walk_parent(
        &mut self,
        components: &[&str],
        read_only: bool,
    ) -> NsResult<(NodeId, NodeIdent)> {
        let mut node = self.memo.root();
        let mut parent_id = self.config.root_id;
        for (depth, &name) in components[..components.len() - 1].iter().enumerate() {
            let child = self.memo.child_or_insert(node, name);
            let value = match self.memo.level(child) {
                LockLevel::Exclusive => {
                    return Err(NsError::PathLockConflict {
                        path: prefix(components, depth + 1),
                    });
                }
                LockLevel::Shared | LockLevel::ExclusiveForCreate => self.memo.target(child),
                LockLevel::None => {
                    self.resolve_shared(child, &CacheKey::new(parent_id, name), read_only)?
                }
            };
            trace!(parent_id, name, ?value, "resolved path component");
            parent_id = value.id().ok_or_else(|| NsError::PathNotExists {
                path: prefix(components, depth + 1),
            })?;
            node = child;
        }
        Ok((node, parent_id))
    }

    fn lookup_final(
        &mut self,
        parent: NodeId,
        key: &CacheKey,
        lock_final: bool,
    ) -> NsResult<EntryValue> {
        if let Some(child) = self.memo.child(parent, &key.name)
            && self.memo.level(child) != LockLevel::None
        {
            return Ok(self.memo.target(child));
        }
        if lock_final {
            let child = self.memo.child_or_insert(parent, &key.name);
            return self.resolve_shared(child, key, true);
        }
        self.peek(key)
    }

    fn create_final(
        &mut self,
        parent: NodeId,
        key: &CacheKey,
        id: NodeIdent,
        components: &[&str],
    ) -> NsResult<NodeIdent> {
        // Reusing the root's id would alias `/x` and `/<new>/x` to one cache key, which the memo
        // cannot see, so a transaction could spin on its own lock.
        if id > MAX_NODE_ID || id == self.config.root_id {
            return Err(NsError::InvalidId { id });
        }
        let exists = || NsError::PathExists {
            path: prefix(components, components.len()),
        };

        let child = self.lock_final_exclusive(parent, key, components)?;
        if self.memo.target(child).id().is_some() {
            return Err(exists());
        }
        if let Some(existing) = self.store.lookup(key.parent_id, &key.name)? {
            self.learn(child, key, EntryValue::Known(existing))?;
            return Err(exists());
        }

        self.store.insert(key.parent_id, &key.name, id)?;
        self.staging.stage_update(key.clone(), EntryValue::Known(id))?;
        self.memo
            .record(child, LockLevel::ExclusiveForCreate, EntryValue::Known(id));
        trace!(key = %key, id, "created entry");
        Ok(id)
    }

    fn delete_final(
        &mut self,
        parent: NodeId,
        key: &CacheKey,
        components: &[&str],
    ) -> NsResult<NodeIdent> {
        let child = self.lock_final_exclusive(parent, key, components)?;
        let Some(id) = self.store.lookup(key.parent_id, &key.name)? else {
            self.learn(child, key, EntryValue::NotExist)?;
            return Err(NsError::PathNotExists {
                path: prefix(components, components.len()),
            });
        };

        self.store.delete(key.parent_id, &key.name)?;
        self.staging.stage_update(key.clone(), EntryValue::NotExist)?;
        self.memo
            .record(child, LockLevel::Exclusive, EntryValue::NotExist);
        trace!(key = %key, id, "deleted entry");
        Ok(id)
    }

    fn lock_path_final(&mut self, components: &[&str]) -> NsResult<(NodeId, CacheKey)> {
        let (parent, parent_id) = self.walk_parent(components, false)?;
        let key = CacheKey::new(parent_id, components[components.len() - 1]);
        let node = self.lock_final_exclusive(parent, &key, components)?;
        Ok((node, key))
    }

    /// Make sure the transaction holds the final component exclusively.
    fn lock_final_exclusive(
        &mut self,
        parent: NodeId,
        key: &CacheKey,
        components: &[&str],
    ) -> NsResult<NodeId> {
        let child = self.memo.child_or_insert(parent, &key.name);
        match self.memo.level(child) {
            LockLevel::Shared => Err(NsError::PathLockConflict {
                path: prefix(components, components.len()),
            }),
            LockLevel::Exclusive | LockLevel::ExclusiveForCreate => Ok(child),
            LockLevel::None => {
                self.lock_node(child, key, LockLevel::Exclusive)?;
                Ok(child)
            }
        }
    }

    /// Lock `key` shared and read it through the cache.
    ///
    /// A read-only caller that finds no room in the cache reads the store directly instead, and
    /// `node` stays unlocked.
    fn resolve_shared(
        &mut self,
        node: NodeId,
        key: &CacheKey,
        read_only: bool,
    ) -> NsResult<EntryValue> {
        match self.lock_node(node, key, LockLevel::Shared) {
            Ok(entry) => {
                let value = self.read_through(&entry, key)?;
                self.memo.set_target(node, value);
                Ok(value)
            }
            Err(NsError::CacheExhausted { .. }) if read_only => {
                self.cache.counters().note_fallback();
                self.read_store(key)
            }
            Err(e) => Err(e),
        }
    }

    /// Find or create the entry for `key`, lock it, and record the lock on `node`.
    fn lock_node(
        &mut self,
        node: NodeId,
        key: &CacheKey,
        level: LockLevel,
    ) -> NsResult<Arc<CacheEntry>> {
        let mode = if level.is_exclusive() {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        };
        let Some((entry, created)) = self.cache.find_or_create(key) else {
            return Err(NsError::CacheExhausted {
                partition: self.cache.partition_of(key),
            });
        };
        self.locks.push_declared(Arc::clone(&entry))?;
        self.locks.promote(&entry, mode)?;
        self.memo.record(node, level, EntryValue::Unknown);
        if created {
            self.staging.stage_insert(key.clone())?;
        }
        trace!(key = %key, ?mode, created, "locked cache entry");
        Ok(entry)
    }

    /// Read the value of a locked entry, asking the store if the cache has nothing authoritative.
    fn read_through(&mut self, entry: &CacheEntry, key: &CacheKey) -> NsResult<EntryValue> {
        let cached = entry.value();
        if cached.is_authoritative() {
            self.cache.counters().note_hit();
            return Ok(cached);
        }
        self.cache.counters().note_miss();
        let value = self.read_store(key)?;
        self.staging.stage_update(key.clone(), value)?;
        Ok(value)
    }

    /// Unlocked read. Nothing is staged, since the answer is not protected by any lock.
    fn peek(&mut self, key: &CacheKey) -> NsResult<EntryValue> {
        if let Some(entry) = self.cache.find(key) {
            let cached = entry.value();
            entry.lock().undeclare()?;
            if cached.is_authoritative() {
                self.cache.counters().note_hit();
                return Ok(cached);
            }
        }
        self.cache.counters().note_miss();
        self.read_store(key)
    }

    fn read_store(&mut self, key: &CacheKey) -> NsResult<EntryValue> {
        Ok(EntryValue::from_lookup(
            self.store.lookup(key.parent_id, &key.name)?,
        ))
    }

    /// Record a value learned from the store for an entry this transaction holds exclusively.
    fn learn(&mut self, node: NodeId, key: &CacheKey, value: EntryValue) -> NsResult<()> {
        self.memo.set_target(node, value);
        self.staging.stage_update(key.clone(), value)
    }
}
