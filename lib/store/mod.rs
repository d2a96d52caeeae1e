//! The seam to the external transactional namespace store.
//!
//! The lock manager never persists anything itself. Authoritative `(parent_id, name) -> id`
//! mappings live in a store that takes part in the enclosing transaction and rolls back with it.

use thiserror::Error;

use crate::cache::NodeIdent;

/// In-memory reference store.
pub mod memory;

pub use memory::{MemoryStore, MemoryTxn};

/// Errors reported by a namespace store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// An insert collided with an existing mapping.
    #[error("entry ({parent}, {name:?}) already exists")]
    Duplicate {
        /// Parent directory id.
        parent: NodeIdent,
        /// Entry name.
        name: String,
    },

    /// A delete targeted a mapping that does not exist.
    #[error("entry ({parent}, {name:?}) does not exist")]
    Missing {
        /// Parent directory id.
        parent: NodeIdent,
        /// Entry name.
        name: String,
    },

    /// The backend failed for reasons of its own.
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// One transaction against the namespace store.
///
/// Dropping a transaction without calling [`commit`](Self::commit) must roll it back.
pub trait StoreTxn {
    /// Resolve `(parent, name)`.
    fn lookup(&mut self, parent: NodeIdent, name: &str) -> Result<Option<NodeIdent>, StoreError>;

    /// Map `(parent, name)` to `id`.
    fn insert(&mut self, parent: NodeIdent, name: &str, id: NodeIdent) -> Result<(), StoreError>;

    /// Remove the mapping for `(parent, name)`.
    fn delete(&mut self, parent: NodeIdent, name: &str) -> Result<(), StoreError>;

    /// Make every change of this transaction durable.
    fn commit(self) -> Result<(), StoreError>;

    /// Discard every change of this transaction.
    fn abort(self);
}

/// A transactional store the lock manager can resolve paths against.
pub trait NamespaceStore: Send + Sync {
    /// The transaction type handed out by [`begin`](Self::begin).
    type Txn: StoreTxn;

    /// Start a transaction.
    fn begin(&self) -> Result<Self::Txn, StoreError>;
}
