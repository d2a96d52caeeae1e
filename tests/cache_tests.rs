#![cfg(not(loom))]
#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use nslock::{ErrorClass, MemoryStore, NamespaceLockService, NsError};
use rand::Rng as _;

use crate::common::{config, seed};

fn single_partition(capacity: usize) -> NamespaceLockService<MemoryStore> {
    NamespaceLockService::new(config(1, capacity), MemoryStore::new()).unwrap()
}

#[test]
fn eviction_spares_the_locked_entry() {
    let service = single_partition(4);
    assert_eq!(service.cache().eviction_threshold(), 3);
    seed(&service, &[("/a", 1), ("/b", 2), ("/c", 3)]);
    assert_eq!(service.cache().len(), 3);
    assert_eq!(service.stats().evictions, 0);

    let mut holder = service.begin().unwrap();
    assert_eq!(holder.lookup("/a").unwrap(), Some(1));

    seed(&service, &[("/d", 4)]);
    assert_eq!(service.stats().evictions, 1);
    assert_eq!(service.cache().len(), 3);
    holder.commit().unwrap();

    // `/a` survived with its value, so reading it is a hit.
    let hits = service.stats().hits;
    let mut txn = service.begin().unwrap();
    assert_eq!(txn.lookup("/a").unwrap(), Some(1));
    txn.commit().unwrap();
    assert_eq!(service.stats().hits, hits + 1);
}

#[test]
fn full_partition_of_locked_entries_falls_back_for_reads() {
    let service = single_partition(2);
    seed(&service, &[("/a", 1), ("/b", 2), ("/c", 3)]);

    let mut holder = service.begin().unwrap();
    holder.lookup("/a").unwrap();
    holder.lookup("/b").unwrap();
    assert_eq!(service.cache().len(), 2);

    let mut reader = service.begin().unwrap();
    assert_eq!(reader.lookup("/c").unwrap(), Some(3));
    assert_eq!(reader.lock_count(), 0);
    let err = reader.create("/e", 5).unwrap_err();
    assert!(matches!(err, NsError::CacheExhausted { partition: 0 }), "{err}");
    assert_eq!(err.class(), ErrorClass::Conflict);
    assert!(!reader.is_poisoned());
    reader.commit().unwrap();

    let stats = service.stats();
    assert_eq!(stats.fallbacks, 1);
    assert_eq!(stats.exhausted, 2);
    holder.commit().unwrap();

    let mut txn = service.begin().unwrap();
    txn.create("/e", 5).unwrap();
    txn.commit().unwrap();
    assert!(service.cache().len() <= 2);
}

#[test]
fn invalidate_keeps_held_entries_provisional() {
    let service = single_partition(8);
    seed(&service, &[("/a", 1), ("/b", 2)]);

    let mut holder = service.begin().unwrap();
    holder.lookup("/a").unwrap();
    service.invalidate_all();
    assert_eq!(service.cache().len(), 1);

    let misses = service.stats().misses;
    let mut txn = service.begin().unwrap();
    assert_eq!(txn.lookup("/a").unwrap(), Some(1));
    txn.commit().unwrap();
    assert_eq!(service.stats().misses, misses + 1);
    holder.commit().unwrap();
}

#[test]
fn concurrent_lookups_under_eviction_pressure_stay_correct() {
    const DIRS: u64 = 48;
    let service = NamespaceLockService::new(config(2, 8), MemoryStore::new()).unwrap();
    let entries: Vec<(String, u64)> = (0..DIRS).map(|i| (format!("/dir{i}"), 100 + i)).collect();
    let borrowed: Vec<(&str, u64)> = entries.iter().map(|(p, id)| (p.as_str(), *id)).collect();
    seed(&service, &borrowed);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut rng = rand::thread_rng();
                for _ in 0..2_000 {
                    let i = rng.gen_range(0..DIRS);
                    let mut txn = service.begin().unwrap();
                    assert_eq!(txn.lookup(&format!("/dir{i}")).unwrap(), Some(100 + i));
                    txn.commit().unwrap();
                }
            });
        }
    });

    let stats = service.stats();
    assert!(stats.live <= service.cache().capacity());
    assert!(stats.evictions > 0);
}
