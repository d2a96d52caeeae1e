//! Allocation-free shared/exclusive lock packed into a single `AtomicU64`.

use bitflags::bitflags;

use crate::error::{NsError, NsResult};
use crate::sync::atomic::{AtomicU64, Ordering};

/// The two modes in which an [`AtomicRwLock`] can be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Any number of holders, provided no exclusive holder or waiter exists.
    Shared,
    /// A single holder, with no shared holders.
    Exclusive,
}

bitflags! {
    /// Flag bits at the top of the packed lock word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LockFlags: u64 {
        /// Some session holds the lock exclusively.
        const EXCLUSIVE_HELD = 1 << 62;
        /// Some session is spinning for exclusive access. New shared requests back off.
        const EXCLUSIVE_WAITER = 1 << 63;
    }
}

const SHARED_ONE: u64 = 1;
const SHARED_MASK: u64 = (1 << 24) - 1;
const REF_SHIFT: u32 = 24;
const REF_ONE: u64 = 1 << REF_SHIFT;
const REF_MASK: u64 = SHARED_MASK << REF_SHIFT;

/// A decoded snapshot of the lock word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockState {
    word: u64,
}

impl LockState {
    /// Number of shared holders.
    #[must_use]
    pub fn shared_count(self) -> u64 {
        self.word & SHARED_MASK
    }

    /// Number of outstanding declare and acquire sessions.
    #[must_use]
    pub fn ref_count(self) -> u64 {
        (self.word & REF_MASK) >> REF_SHIFT
    }

    /// Flag bits currently set.
    #[must_use]
    pub fn flags(self) -> LockFlags {
        LockFlags::from_bits_truncate(self.word)
    }

    /// Whether an exclusive holder exists.
    #[must_use]
    pub fn exclusive_held(self) -> bool {
        self.flags().contains(LockFlags::EXCLUSIVE_HELD)
    }

    /// Whether an exclusive acquirer is waiting.
    #[must_use]
    pub fn has_exclusive_waiter(self) -> bool {
        self.flags().contains(LockFlags::EXCLUSIVE_WAITER)
    }
}

/// A reader/writer lock with a separate reference count for safe reclamation.
///
/// Layout: `[bit 63: exclusive waiter | bit 62: exclusive held | bits 24..48: refs | bits 0..24:
/// shared holders]`
///
/// The reference count covers every outstanding session, both *declared* ones (a caller found the
/// owning entry and is about to acquire) and *acquired* ones. An entry is only reclaimable once
/// that count is zero, which is strictly stronger than "nobody holds the lock".
///
/// Shared requests are refused while an exclusive request is waiting. Already-granted shared
/// sessions are unaffected, so the waiter is served once they drain.
#[derive(Debug, Default)]
pub struct AtomicRwLock {
    word: AtomicU64,
}

impl AtomicRwLock {
    /// Create an unheld, undeclared lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }

    /// Snapshot the current state.
    #[must_use]
    pub fn state(&self) -> LockState {
        LockState {
            word: self.word.load(Ordering::Acquire),
        }
    }

    /// Announce an upcoming session without acquiring.
    pub fn declare(&self) {
        let prev = self.word.fetch_add(REF_ONE, Ordering::AcqRel);
        debug_assert!(
            (prev & REF_MASK) != REF_MASK,
            "lock reference count overflowed"
        );
    }

    /// Retire a session previously opened with [`declare`](Self::declare).
    pub fn undeclare(&self) -> NsResult<()> {
        self.update(|word| {
            if word & REF_MASK == 0 {
                None
            } else {
                Some(word - REF_ONE)
            }
        })
        .map_err(|_| {
            NsError::program("undeclare on a lock with no outstanding sessions")
        })
    }

    /// Make a single attempt to acquire the lock in `mode`.
    ///
    /// A failed exclusive attempt does *not* register as a waiter; only [`acquire`](Self::acquire)
    /// does, since a waiter that never comes back would starve every future reader.
    #[must_use]
    pub fn try_acquire(&self, mode: LockMode) -> bool {
        self.attempt(mode, false)
    }

    /// Acquire the lock in `mode`, spinning with bounded backoff until granted.
    pub fn acquire(&self, mode: LockMode) {
        let mut backoff = Backoff::new();
        while !self.attempt(mode, true) {
            backoff.snooze();
        }
    }

    /// Release a session acquired in `mode`.
    pub fn release(&self, mode: LockMode) -> NsResult<()> {
        let result = match mode {
            LockMode::Shared => self.update(|word| {
                if word & SHARED_MASK == 0 || word & REF_MASK == 0 {
                    None
                } else {
                    Some(word - SHARED_ONE - REF_ONE)
                }
            }),
            LockMode::Exclusive => self.update(|word| {
                if word & LockFlags::EXCLUSIVE_HELD.bits() == 0 || word & REF_MASK == 0 {
                    None
                } else {
                    Some((word & !LockFlags::EXCLUSIVE_HELD.bits()) - REF_ONE)
                }
            }),
        };
        result.map_err(|_| {
            NsError::program(format!("release({mode:?}) of a lock not held so"))
        })
    }

    /// Whether no declare or acquire session is outstanding.
    #[must_use]
    pub fn check_destroyable(&self) -> bool {
        self.state().ref_count() == 0
    }

    fn attempt(&self, mode: LockMode, announce: bool) -> bool {
        let held = LockFlags::EXCLUSIVE_HELD.bits();
        let waiter = LockFlags::EXCLUSIVE_WAITER.bits();
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            let next = match mode {
                LockMode::Shared => {
                    if current & (held | waiter) != 0 {
                        return false;
                    }
                    current + SHARED_ONE + REF_ONE
                }
                LockMode::Exclusive => {
                    if current & held != 0 || current & SHARED_MASK != 0 {
                        if announce && current & waiter == 0 {
                            // Losing this race is fine: either someone else set the bit, or the
                            // state moved and our next attempt re-evaluates it.
                            let _ = self.word.compare_exchange(
                                current,
                                current | waiter,
                                Ordering::Relaxed,
                                Ordering::Relaxed,
                            );
                        }
                        return false;
                    }
                    ((current | held) & !waiter) + REF_ONE
                }
            };
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Apply `f` to the word. Fails, leaving the word as it was, if `f` refuses the transition.
    fn update(&self, f: impl FnMut(u64) -> Option<u64>) -> Result<(), u64> {
        self.word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, f)
            .map(drop)
    }
}

/// Bounded exponential backoff for spin loops.
///
/// Spins with CPU hints for the first few rounds, then starts yielding the time slice. Lock hold
/// times are microseconds, so the spin phase almost always suffices.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;

    /// A fresh backoff at its shortest delay.
    #[must_use]
    pub fn new() -> Self {
        Self { step: 0 }
    }

    /// Wait a little, longer on each call, up to a fixed ceiling.
    pub fn snooze(&mut self) {
        if cfg!(loom) || self.step > Self::SPIN_LIMIT {
            crate::sync::yield_now();
        } else {
            for _ in 0..(1u32 << self.step) {
                crate::sync::spin_hint();
            }
        }
        if self.step < Self::YIELD_LIMIT {
            self.step += 1;
        }
    }
}
