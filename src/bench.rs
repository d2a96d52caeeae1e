//! The synthetic workload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use nslock::cache::NodeIdent;
use nslock::config::ConfigError;
use nslock::{ErrorClass, MemoryStore, NamespaceLockService, NsError, NsResult};
use rand::Rng as _;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::app_config::{Config, WorkloadConfig};

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to prepare the namespace: {0}")]
    Setup(#[from] NsError),
}

/// Outcome counts of one worker.
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    committed: u64,
    exists: u64,
    conflicts: u64,
    failed: u64,
}

impl Tally {
    fn record(&mut self, result: &NsResult<()>) {
        match result {
            Ok(()) => self.committed += 1,
            Err(e) => match e.class() {
                ErrorClass::Exists | ErrorClass::NotExists => self.exists += 1,
                ErrorClass::Conflict => self.conflicts += 1,
                ErrorClass::Argument | ErrorClass::Program | ErrorClass::Store => {
                    warn!(error = %e, "operation failed");
                    self.failed += 1;
                }
            },
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            committed: self.committed + other.committed,
            exists: self.exists + other.exists,
            conflicts: self.conflicts + other.conflicts,
            failed: self.failed + other.failed,
        }
    }
}

/// Hands out ids, skipping the root's.
struct IdAllocator {
    next: AtomicU64,
    root_id: NodeIdent,
}

impl IdAllocator {
    fn next(&self) -> NodeIdent {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != self.root_id {
                return id;
            }
        }
    }
}

pub fn run(config: &Config) -> Result<(), BenchError> {
    let service = NamespaceLockService::new(config.cache.clone(), MemoryStore::new())?;
    let ids = IdAllocator {
        next: AtomicU64::new(1),
        root_id: config.cache.root_id,
    };
    let workload = &config.workload;

    let mut txn = service.begin()?;
    for d in 0..workload.directories {
        txn.create(&format!("/d{d}"), ids.next())?;
    }
    txn.commit()?;
    info!(directories = workload.directories, "namespace prepared");

    let started = Instant::now();
    let tally = std::thread::scope(|s| {
        let handles: Vec<_> = (0..workload.threads)
            .map(|thread| {
                let (service, ids) = (&service, &ids);
                s.spawn(move || worker(service, workload, ids, thread))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    error!("worker panicked");
                    Tally::default()
                })
            })
            .fold(Tally::default(), Tally::merge)
    });
    let elapsed = started.elapsed();

    let stats = service.stats();
    #[expect(
        clippy::cast_precision_loss,
        reason = "an approximate throughput figure is all we report"
    )]
    let ops_per_sec = (workload.threads * workload.ops_per_thread) as f64 / elapsed.as_secs_f64();
    info!(
        elapsed = ?elapsed,
        ops_per_sec = ops_per_sec.round(),
        committed = tally.committed,
        exists = tally.exists,
        conflicts = tally.conflicts,
        failed = tally.failed,
        "workload finished"
    );
    info!(
        hits = stats.hits,
        misses = stats.misses,
        inserts = stats.inserts,
        evictions = stats.evictions,
        exhausted = stats.exhausted,
        fallbacks = stats.fallbacks,
        live = stats.live,
        capacity = service.cache().capacity(),
        "cache statistics"
    );
    service.shutdown();
    Ok(())
}

fn worker(
    service: &NamespaceLockService<MemoryStore>,
    workload: &WorkloadConfig,
    ids: &IdAllocator,
    thread: usize,
) -> Tally {
    let mut rng = rand::thread_rng();
    let mut tally = Tally::default();
    for i in 0..workload.ops_per_thread {
        let dir = rng.gen_range(0..workload.directories);
        let result = if rng.gen_bool(workload.lookup_ratio) {
            let n = rng.gen_range(0..=i);
            lookup(service, &format!("/d{dir}/t{thread}-{n}"))
        } else {
            create(service, &format!("/d{dir}/t{thread}-{i}"), ids.next())
        };
        tally.record(&result);
    }
    tally
}

fn lookup(service: &NamespaceLockService<MemoryStore>, path: &str) -> NsResult<()> {
    let mut txn = service.begin()?;
    txn.lookup(path)?;
    txn.commit()
}

fn create(service: &NamespaceLockService<MemoryStore>, path: &str, id: NodeIdent) -> NsResult<()> {
    let mut txn = service.begin()?;
    txn.create(path, id)?;
    txn.commit()
}
