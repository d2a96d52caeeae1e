//! Implements the second-chance clock eviction policy.
//!
//! Each entry carries a small usage credit that is bumped on every acquire. A sweep starts at a
//! random bucket and walks the partition; a destroyable entry with credit left loses one unit and
//! is passed over, the first destroyable entry without credit is the victim. Entries that are
//! referenced are skipped without being charged.
//!
//! The sweep runs under the shared partition latch. The victim is only removed after being
//! re-validated under the exclusive latch, since a concurrent lookup may have declared it in the
//! meantime.

use rand::Rng as _;
use tracing::{debug, trace};

use crate::cache::entry::{CacheEntry, MAX_USAGE_COUNT};
use crate::cache::partition::Partition;
use crate::sync::Arc;

/// Maximum number of times a victim is re-selected after failing re-validation.
const MAX_SELECTION_RETRIES: usize = 4;

/// Stateless second-chance clock sweeper.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockSweep;

impl ClockSweep {
    /// Choose a victim in `partition`, or `None` if nothing is reclaimable.
    ///
    /// Charges one unit of credit to every destroyable entry passed over. Gives up after a full
    /// lap that saw no destroyable entry; otherwise keeps sweeping until credit runs out, which
    /// takes at most `MAX_USAGE_COUNT + 1` laps.
    #[must_use]
    pub fn select_victim(partition: &Partition) -> Option<Arc<CacheEntry>> {
        let table = partition.read_table();
        let buckets = table.bucket_count();
        let start = rand::thread_rng().gen_range(0..buckets);

        #[expect(
            clippy::cast_sign_loss,
            reason = "MAX_USAGE_COUNT is a small positive constant"
        )]
        let max_laps = MAX_USAGE_COUNT as usize + 1;
        for lap in 0..max_laps {
            let mut saw_destroyable = false;
            for step in 0..buckets {
                for entry in table.bucket((start + step) % buckets) {
                    if !entry.check_destroyable() {
                        continue;
                    }
                    saw_destroyable = true;
                    if entry.spend_usage() {
                        trace!(key = %entry.key(), lap, "selected eviction victim");
                        return Some(Arc::clone(entry));
                    }
                }
            }
            if !saw_destroyable {
                return None;
            }
        }
        None
    }

    /// Reclaim one entry from `partition`. Returns whether an entry was removed.
    pub fn evict_one(partition: &Partition) -> bool {
        for _ in 0..MAX_SELECTION_RETRIES {
            let Some(victim) = Self::select_victim(partition) else {
                debug!(
                    partition = partition.index(),
                    live = partition.len(),
                    "no reclaimable entry; partition stays over its target"
                );
                return false;
            };
            if partition.remove_entry(&victim) {
                debug!(partition = partition.index(), key = %victim.key(), "evicted cache entry");
                return true;
            }
            // Re-declared or already removed by someone else since the sweep. Pick again.
        }
        false
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::cache::entry::CacheKey;
    use crate::lock::LockMode;

    fn fill(partition: &Partition, names: &[&str]) -> Vec<Arc<CacheEntry>> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let (entry, _) = partition
                    .find_or_insert(i as u64, &CacheKey::new(1, *name))
                    .unwrap();
                entry
            })
            .collect()
    }

    #[test]
    fn empty_partition_has_no_victim() {
        let partition = Partition::new(0, 4);
        assert!(ClockSweep::select_victim(&partition).is_none());
        assert!(!ClockSweep::evict_one(&partition));
    }

    #[test]
    fn referenced_entries_are_never_chosen_nor_charged() {
        let partition = Partition::new(0, 4);
        let entries = fill(&partition, &["a", "b"]);
        for e in &entries {
            e.bump_usage();
        }
        assert!(!ClockSweep::evict_one(&partition));
        assert_eq!(partition.len(), 2);
        for e in &entries {
            assert_eq!(e.usage_count(), 1, "skipped entries keep their credit");
        }
    }

    #[test]
    fn cold_entry_goes_before_hot_entry() {
        let partition = Partition::new(0, 4);
        let entries = fill(&partition, &["hot", "cold"]);
        entries[0].bump_usage();
        entries[0].bump_usage();
        for e in &entries {
            e.lock().undeclare().unwrap();
        }

        assert!(ClockSweep::evict_one(&partition));
        assert_eq!(partition.len(), 1);
        let hot = partition.find(0, &CacheKey::new(1, "hot"));
        assert!(hot.is_some(), "the entry with credit must survive");
    }

    #[test]
    fn credit_only_delays_eviction() {
        let partition = Partition::new(0, 4);
        let entries = fill(&partition, &["a"]);
        for _ in 0..MAX_USAGE_COUNT {
            entries[0].bump_usage();
        }
        entries[0].lock().undeclare().unwrap();
        assert!(ClockSweep::evict_one(&partition));
        assert!(partition.is_empty());
    }

    #[test]
    fn held_entry_survives_while_idle_one_is_reclaimed() {
        let partition = Partition::new(0, 4);
        let entries = fill(&partition, &["held", "idle"]);
        entries[0].lock().acquire(LockMode::Exclusive);
        entries[0].lock().undeclare().unwrap();
        entries[1].lock().undeclare().unwrap();

        assert!(ClockSweep::evict_one(&partition));
        assert!(!ClockSweep::evict_one(&partition));
        assert_eq!(partition.len(), 1);
        entries[0].lock().release(LockMode::Exclusive).unwrap();
    }
}
