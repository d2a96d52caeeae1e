#![cfg(not(loom))]
#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use nslock::lock::{AtomicRwLock, LockMode};

#[test]
fn declared_session_pins_the_entry_across_threads() {
    let lock = Arc::new(AtomicRwLock::new());
    let declared = Arc::new(Barrier::new(2));
    let checked = Arc::new(Barrier::new(2));

    let holder = {
        let lock = Arc::clone(&lock);
        let declared = Arc::clone(&declared);
        let checked = Arc::clone(&checked);
        thread::spawn(move || {
            lock.declare();
            declared.wait();
            checked.wait();
            lock.undeclare().unwrap();
        })
    };

    declared.wait();
    assert!(lock.try_acquire(LockMode::Shared));
    assert!(!lock.check_destroyable());
    lock.release(LockMode::Shared).unwrap();
    assert!(!lock.check_destroyable());
    checked.wait();

    holder.join().unwrap();
    assert!(lock.check_destroyable());
}

#[test]
fn shared_holders_do_not_block_each_other() {
    let lock = Arc::new(AtomicRwLock::new());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                lock.acquire(LockMode::Shared);
                // Every thread holds its shared session here at the same time.
                barrier.wait();
                lock.release(LockMode::Shared).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(lock.check_destroyable());
    assert_eq!(lock.state().shared_count(), 0);
}

#[test]
fn exclusive_holder_excludes_everyone() {
    let lock = Arc::new(AtomicRwLock::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let writer_inside = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let writer_inside = Arc::clone(&writer_inside);
            thread::spawn(move || {
                for _ in 0..500 {
                    if i % 2 == 0 {
                        lock.acquire(LockMode::Exclusive);
                        assert!(!writer_inside.swap(true, Ordering::SeqCst));
                        assert_eq!(inside.load(Ordering::SeqCst), 0);
                        writer_inside.store(false, Ordering::SeqCst);
                        lock.release(LockMode::Exclusive).unwrap();
                    } else {
                        lock.acquire(LockMode::Shared);
                        inside.fetch_add(1, Ordering::SeqCst);
                        assert!(!writer_inside.load(Ordering::SeqCst));
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.release(LockMode::Shared).unwrap();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(lock.check_destroyable());
}

#[test]
fn waiting_writer_is_not_starved_by_new_readers() {
    let lock = Arc::new(AtomicRwLock::new());
    lock.acquire(LockMode::Shared);

    let writer = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            lock.acquire(LockMode::Exclusive);
            lock.release(LockMode::Exclusive).unwrap();
        })
    };

    while !lock.state().has_exclusive_waiter() {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(!lock.try_acquire(LockMode::Shared));

    lock.release(LockMode::Shared).unwrap();
    writer.join().unwrap();
    assert!(lock.try_acquire(LockMode::Shared));
    lock.release(LockMode::Shared).unwrap();
}
