//! Pending session registry
//!
//! Maps a dispatch queue to the single capture session still waiting for its
//! GPU work to finish. A queue is a single-slot resource: a new session can
//! only be registered once the previous one has been retired.

use crate::engine::SessionId;
use kernscope_shared::KernelLaunchRecord;
use std::collections::BTreeMap;

/// An admitted capture waiting for retirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub queue_id: u64,
    pub record: KernelLaunchRecord,
    pub device_name: String,
}

/// Queue id → pending session. Not synchronized; the session manager guards
/// it with a mutex.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<u64, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` for `queue_id`. Returns false, leaving the existing
    /// entry in place, if the queue already has a pending session.
    pub fn try_insert(&mut self, queue_id: u64, session: Session) -> bool {
        if self.sessions.contains_key(&queue_id) {
            return false;
        }
        self.sessions.insert(queue_id, session);
        true
    }

    pub fn find(&self, queue_id: u64) -> Option<&Session> {
        self.sessions.get(&queue_id)
    }

    pub fn contains(&self, queue_id: u64) -> bool {
        self.sessions.contains_key(&queue_id)
    }

    /// Remove the entry for `queue_id`. Removing an absent id is a no-op.
    pub fn remove(&mut self, queue_id: u64) -> Option<Session> {
        self.sessions.remove(&queue_id)
    }

    /// Remove the entry only if it still holds `session_id`
    pub fn remove_session(&mut self, queue_id: u64, session_id: SessionId) -> Option<Session> {
        match self.sessions.get(&queue_id) {
            Some(session) if session.id == session_id => self.sessions.remove(&queue_id),
            _ => None,
        }
    }

    /// Snapshot of the queue ids with a pending session, in ascending order
    pub fn queue_ids(&self) -> Vec<u64> {
        self.sessions.keys().copied().collect()
    }

    pub fn first_queue_id(&self) -> Option<u64> {
        self.sessions.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: SessionId, queue_id: u64) -> Session {
        Session {
            id,
            queue_id,
            record: KernelLaunchRecord::placeholder("Fiji", 1),
            device_name: "Fiji".to_string(),
        }
    }

    #[test]
    fn test_single_slot_per_queue() {
        let mut registry = SessionRegistry::new();
        assert!(registry.try_insert(5, session(1, 5)));
        assert!(!registry.try_insert(5, session(2, 5)));

        // The original entry survives the rejected insert
        assert_eq!(registry.find(5).map(|s| s.id), Some(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = SessionRegistry::new();
        registry.try_insert(5, session(1, 5));

        assert!(registry.remove(5).is_some());
        assert!(registry.remove(5).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_session_checks_id() {
        let mut registry = SessionRegistry::new();
        registry.try_insert(5, session(1, 5));

        assert!(registry.remove_session(5, 2).is_none());
        assert!(registry.contains(5));
        assert!(registry.remove_session(5, 1).is_some());
    }

    #[test]
    fn test_queue_id_snapshot_is_ordered() {
        let mut registry = SessionRegistry::new();
        registry.try_insert(9, session(1, 9));
        registry.try_insert(2, session(2, 2));
        registry.try_insert(4, session(3, 4));

        let ids = registry.queue_ids();
        for id in &ids {
            registry.remove(*id);
        }
        assert_eq!(ids, vec![2, 4, 9]);
        assert_eq!(registry.first_queue_id(), None);
    }
}
