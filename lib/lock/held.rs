//! Per-execution-context bookkeeping of declared and held lock sessions.

use rustc_hash::FxHashMap;

use crate::error::{NsError, NsResult};
use crate::lock::rwlock::{AtomicRwLock, LockMode};
use crate::sync::Arc;

/// Something that owns an [`AtomicRwLock`] and can be tracked by [`HeldLocks`].
pub trait LockHandle {
    /// The lock guarding this object.
    fn rwlock(&self) -> &AtomicRwLock;

    /// Called after every successful acquire through [`HeldLocks::promote`].
    fn note_acquired(&self) {}
}

/// What a session on the stack currently represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Referenced via `declare`, not yet acquired.
    Declared,
    /// Acquired in the given mode.
    Held(LockMode),
}

#[derive(Debug)]
struct Session<H> {
    handle: Arc<H>,
    kind: SessionKind,
}

/// Stack of lock sessions opened by one execution context.
///
/// Every session the context opens is recorded here so that it can be released in bulk when the
/// transaction ends, and so that releasing something the context never opened is caught as a
/// [`NsError::Program`] instead of corrupting another context's lock.
///
/// Sessions are found through an index keyed by the handle's address, so closing one in the
/// middle of a deep stack costs the same as closing the top one. A closed slot is left empty
/// until everything above it is gone, keeping the stack order intact for
/// [`release_all`](Self::release_all).
#[derive(Debug)]
pub struct HeldLocks<H: LockHandle> {
    slots: Vec<Option<Session<H>>>,
    by_handle: FxHashMap<usize, Vec<usize>>,
    open: usize,
    held: usize,
    capacity: usize,
}

impl<H: LockHandle> HeldLocks<H> {
    /// An empty stack that refuses to grow beyond `capacity` sessions.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            by_handle: FxHashMap::default(),
            open: 0,
            held: 0,
            capacity,
        }
    }

    /// Record a session the caller has already declared on `handle`.
    ///
    /// On overflow the declaration is rolled back before the error is returned, so the entry is
    /// not left referenced forever.
    pub fn push_declared(&mut self, handle: Arc<H>) -> NsResult<()> {
        if self.open >= self.capacity {
            handle.rwlock().undeclare()?;
            tracing::warn!(limit = self.capacity, "held-lock stack is full");
            return Err(NsError::HeldLocksOverflow {
                limit: self.capacity,
            });
        }
        let slot = self.slots.len();
        self.by_handle
            .entry(Self::key(&handle))
            .or_default()
            .push(slot);
        self.slots.push(Some(Session {
            handle,
            kind: SessionKind::Declared,
        }));
        self.open += 1;
        Ok(())
    }

    /// Turn the most recent declared session on `handle` into one held in `mode`.
    ///
    /// The lock is acquired before the declaration is retired, so the entry stays referenced
    /// throughout.
    pub fn promote(&mut self, handle: &Arc<H>, mode: LockMode) -> NsResult<()> {
        let slot = self
            .position(handle, SessionKind::Declared)
            .ok_or_else(|| NsError::program("promote of a lock that was never declared"))?;
        let lock = handle.rwlock();
        lock.acquire(mode);
        handle.note_acquired();
        lock.undeclare()?;
        if let Some(session) = self.slots[slot].as_mut() {
            session.kind = SessionKind::Held(mode);
        }
        self.held += 1;
        Ok(())
    }

    /// Retire a declared session without acquiring.
    pub fn undeclare(&mut self, handle: &Arc<H>) -> NsResult<()> {
        let slot = self
            .position(handle, SessionKind::Declared)
            .ok_or_else(|| NsError::program("undeclare of a lock that was never declared"))?;
        self.close(slot);
        handle.rwlock().undeclare()
    }

    /// Release a session held in `mode`.
    pub fn release(&mut self, handle: &Arc<H>, mode: LockMode) -> NsResult<()> {
        let slot = self
            .position(handle, SessionKind::Held(mode))
            .ok_or_else(|| NsError::program(format!("release of a lock not held {mode:?}")))?;
        self.close(slot);
        handle.rwlock().release(mode)
    }

    /// Release every session, most recent first.
    ///
    /// Keeps going past failures so that one corrupt session cannot strand the others; the first
    /// error is returned.
    pub fn release_all(&mut self) -> NsResult<()> {
        let mut first_err = None;
        while let Some(slot) = self.slots.pop() {
            let Some(session) = slot else {
                continue;
            };
            let lock = session.handle.rwlock();
            let result = match session.kind {
                SessionKind::Declared => lock.undeclare(),
                SessionKind::Held(mode) => lock.release(mode),
            };
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        self.by_handle.clear();
        self.open = 0;
        self.held = 0;
        first_err.map_or(Ok(()), Err)
    }

    /// Number of open sessions, declared or held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.open
    }

    /// Whether no session is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open == 0
    }

    /// Number of sessions that actually hold their lock.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held
    }

    /// The kind of the most recent session on `handle`, if any.
    #[must_use]
    pub fn session_kind(&self, handle: &Arc<H>) -> Option<SessionKind> {
        let slot = *self.by_handle.get(&Self::key(handle))?.last()?;
        self.slots[slot].as_ref().map(|s| s.kind)
    }

    fn key(handle: &Arc<H>) -> usize {
        std::ptr::from_ref::<H>(handle).addr()
    }

    fn position(&self, handle: &Arc<H>, kind: SessionKind) -> Option<usize> {
        self.by_handle
            .get(&Self::key(handle))?
            .iter()
            .rev()
            .copied()
            .find(|&slot| self.slots[slot].as_ref().is_some_and(|s| s.kind == kind))
    }

    /// Empty `slot` and drop it from the index. The lock itself is left to the caller.
    fn close(&mut self, slot: usize) {
        let Some(session) = self.slots[slot].take() else {
            return;
        };
        let key = Self::key(&session.handle);
        if let Some(open) = self.by_handle.get_mut(&key) {
            open.retain(|&s| s != slot);
            if open.is_empty() {
                self.by_handle.remove(&key);
            }
        }
        self.open -= 1;
        if matches!(session.kind, SessionKind::Held(_)) {
            self.held -= 1;
        }
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        if self.slots.len() > 2 * self.open + 16 {
            self.compact();
        }
    }

    /// Squeeze out empty slots below the top, preserving order.
    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.by_handle.clear();
        for (slot, session) in self.slots.iter().enumerate() {
            if let Some(session) = session {
                self.by_handle
                    .entry(Self::key(&session.handle))
                    .or_default()
                    .push(slot);
            }
        }
    }
}
