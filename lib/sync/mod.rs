//! Synchronization primitives.
//!
//! Shims between loom and std synchronization primitives, so the lock protocol can be model
//! checked with `RUSTFLAGS="--cfg loom"`.
pub mod atomic;

#[cfg(loom)]
pub use loom::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[cfg(not(loom))]
pub use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Give up the current time slice. Under loom this is the only way a spinning thread lets the
/// model scheduler make progress.
#[cfg(loom)]
pub fn yield_now() {
    loom::thread::yield_now();
}

/// Give up the current time slice.
#[cfg(not(loom))]
pub fn yield_now() {
    std::thread::yield_now();
}

/// Hint to the CPU that we are inside a spin-wait loop.
#[cfg(loom)]
pub fn spin_hint() {
    loom::hint::spin_loop();
}

/// Hint to the CPU that we are inside a spin-wait loop.
#[cfg(not(loom))]
pub fn spin_hint() {
    std::hint::spin_loop();
}

/// Read-lock `lock`, recovering the guard if a previous holder panicked.
///
/// The tables behind our latches hold no invariants that a panicking writer can break halfway
/// (every mutation is a single push/remove), so poisoning carries no information.
pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Write-lock `lock`, recovering the guard if a previous holder panicked.
pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}
