//! nslock: per-component namespace locking and bounded directory-entry caching for
//! transactional metadata stores.
//!
//! A [`NamespaceLockService`] fronts a transactional [`NamespaceStore`]. Each [`Transaction`]
//! resolves paths component by component, taking a shared lock on every directory it walks
//! through and the lock its request needs on the final component. Locks live in a bounded,
//! partitioned cache of `(parent_id, name) -> id` entries, whose values only change when the
//! transaction that learned them commits.

/// The partitioned lock cache.
pub mod cache;
/// Lock cache configuration.
pub mod config;
/// Error taxonomy.
pub mod error;
/// Entry-level locks.
pub mod lock;
/// Path resolution.
pub mod resolve;
/// The process-wide service.
pub mod service;
/// The external store seam.
pub mod store;
mod sync;
/// Transactions and their staging logs.
pub mod txn;

pub use config::CacheConfig;
pub use error::{ErrorClass, NsError, NsResult};
pub use resolve::{Resolution, ResolveKind};
pub use service::NamespaceLockService;
pub use store::{MemoryStore, NamespaceStore, StoreError, StoreTxn};
pub use txn::Transaction;
