//! Entry-level locking.
//!
//! [`rwlock::AtomicRwLock`] is the per-entry lock; [`held::HeldLocks`] is the per-transaction
//! record of every session opened on such locks.
pub mod held;
pub mod rwlock;

pub use held::{HeldLocks, LockHandle, SessionKind};
pub use rwlock::{AtomicRwLock, Backoff, LockMode, LockState};
