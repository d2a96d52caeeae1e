//! Model checks of the entry lock protocol.
//!
//! Run with `RUSTFLAGS="--cfg loom" cargo test --release --test loom_rwlock`.
#![cfg(loom)]
#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use loom::cell::UnsafeCell;
use loom::sync::Arc;
use loom::thread;
use nslock::lock::{AtomicRwLock, LockMode};

struct Guarded {
    lock: AtomicRwLock,
    value: UnsafeCell<u64>,
}

// SAFETY: `value` is only touched while `lock` is held in a mode that permits it.
unsafe impl Sync for Guarded {}

#[test]
fn exclusive_excludes_shared() {
    loom::model(|| {
        let guarded = Arc::new(Guarded {
            lock: AtomicRwLock::new(),
            value: UnsafeCell::new(0),
        });

        let writer = {
            let guarded = Arc::clone(&guarded);
            thread::spawn(move || {
                guarded.lock.acquire(LockMode::Exclusive);
                guarded.value.with_mut(|v| unsafe { *v += 1 });
                guarded.lock.release(LockMode::Exclusive).unwrap();
            })
        };

        guarded.lock.acquire(LockMode::Shared);
        let seen = guarded.value.with(|v| unsafe { *v });
        assert!(seen <= 1);
        guarded.lock.release(LockMode::Shared).unwrap();

        writer.join().unwrap();
        guarded.lock.acquire(LockMode::Shared);
        assert_eq!(guarded.value.with(|v| unsafe { *v }), 1);
        guarded.lock.release(LockMode::Shared).unwrap();
        assert!(guarded.lock.check_destroyable());
    });
}

#[test]
fn two_writers_serialize() {
    loom::model(|| {
        let guarded = Arc::new(Guarded {
            lock: AtomicRwLock::new(),
            value: UnsafeCell::new(0),
        });

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let guarded = Arc::clone(&guarded);
                thread::spawn(move || {
                    guarded.lock.acquire(LockMode::Exclusive);
                    guarded.value.with_mut(|v| unsafe { *v += 1 });
                    guarded.lock.release(LockMode::Exclusive).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(guarded.value.with(|v| unsafe { *v }), 2);
        assert!(guarded.lock.check_destroyable());
    });
}

#[test]
fn declare_blocks_destroy_until_undeclared() {
    loom::model(|| {
        let lock = Arc::new(AtomicRwLock::new());
        lock.declare();

        let reader = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.acquire(LockMode::Shared);
                lock.release(LockMode::Shared).unwrap();
            })
        };

        assert!(!lock.check_destroyable());
        reader.join().unwrap();
        assert!(!lock.check_destroyable());
        lock.undeclare().unwrap();
        assert!(lock.check_destroyable());
    });
}
