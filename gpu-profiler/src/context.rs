//! Shared counter context ownership
//!
//! The counter engine has one hardware context for the whole process. Its
//! ownership is a lease: `begin` acquires it, and on success hands it over to
//! the dispatch so the matching `end` releases it. A dispatch is identified by
//! its queue and the thread that submits it, since several threads may share
//! one queue. A lease dropped before
//! being committed releases the context immediately, so every early return in
//! `begin` leaves it free.
//!
//! Independently of the lease, the slot remembers which session the open
//! hardware context belongs to. The context stays open after `end` until the
//! completion path has read that session's samples and closed it.

use crate::engine::SessionId;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tracing::warn;

/// The hardware context currently open, and the session recorded in it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenContext {
    pub queue_id: u64,
    pub session: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    Admitting,
    Dispatch { queue_id: u64, owner: ThreadId },
}

impl Holder {
    fn current_dispatch(queue_id: u64) -> Self {
        Holder::Dispatch {
            queue_id,
            owner: thread::current().id(),
        }
    }
}

#[derive(Debug, Default)]
struct SlotState {
    holder: Option<Holder>,
    open: Option<OpenContext>,
}

#[derive(Debug, Default)]
pub struct ContextSlot {
    state: Mutex<SlotState>,
    released: Condvar,
}

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until no other dispatch holds the context, then take it
    pub fn acquire(&self) -> ContextLease<'_> {
        let mut state = self.state();
        while state.holder.is_some() {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        state.holder = Some(Holder::Admitting);
        ContextLease {
            slot: self,
            committed: false,
        }
    }

    /// Release a context committed to this thread's dispatch on `queue_id`.
    /// Returns false if that dispatch does not hold it.
    pub fn release(&self, queue_id: u64) -> bool {
        let mut state = self.state();
        if state.holder != Some(Holder::current_dispatch(queue_id)) {
            return false;
        }
        state.holder = None;
        self.released.notify_one();
        true
    }

    pub fn is_held(&self) -> bool {
        self.state().holder.is_some()
    }

    /// Whether the calling thread's dispatch on `queue_id` owns the context
    pub fn is_held_by(&self, queue_id: u64) -> bool {
        self.state().holder == Some(Holder::current_dispatch(queue_id))
    }

    /// Queue whose dispatch currently owns the context
    pub fn holder_queue(&self) -> Option<u64> {
        match self.state().holder {
            Some(Holder::Dispatch { queue_id, .. }) => Some(queue_id),
            _ => None,
        }
    }

    pub fn open_context(&self) -> Option<OpenContext> {
        self.state().open
    }

    /// Forget the open context if it belongs to `session`. The caller closes
    /// the engine context when this returns true.
    pub fn clear_if_bound(&self, session: SessionId) -> bool {
        let mut state = self.state();
        match state.open {
            Some(open) if open.session == session => {
                state.open = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn clear_open(&self) {
        self.state().open = None;
    }

    fn release_uncommitted(&self) {
        let mut state = self.state();
        if state.holder == Some(Holder::Admitting) {
            state.holder = None;
            self.released.notify_one();
        } else {
            warn!("Context lease dropped while not admitting: {:?}", state.holder);
        }
    }
}

/// Exclusive ownership of the counter context during admission
#[derive(Debug)]
pub struct ContextLease<'a> {
    slot: &'a ContextSlot,
    committed: bool,
}

impl ContextLease<'_> {
    pub fn slot(&self) -> &ContextSlot {
        self.slot
    }

    /// Record that the engine context is open for `session` on `queue_id`
    pub fn mark_open(&self, queue_id: u64, session: SessionId) {
        self.slot.state().open = Some(OpenContext { queue_id, session });
    }

    /// Hand the context to this thread's dispatch on `queue_id`; its `end`
    /// releases it.
    pub fn commit(mut self, queue_id: u64) {
        self.slot.state().holder = Some(Holder::current_dispatch(queue_id));
        self.committed = true;
    }
}

impl Drop for ContextLease<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.slot.release_uncommitted();
        }
    }
}
