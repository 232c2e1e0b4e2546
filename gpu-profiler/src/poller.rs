//! Completion polling
//!
//! The counter engine cannot signal when a session's GPU work is done, so
//! pending sessions are polled at a fixed interval. A ready session is
//! claimed by removing its registry entry while the engine lock is held,
//! then its row is emitted and its context closed before the lock is
//! released. Concurrent pollers therefore never emit a session twice, and
//! anyone taking the engine lock afterwards sees the context closed.

use crate::error::ProfilerError;
use crate::manager::{close_context, SessionManager};
use crate::metrics::{PENDING_SESSIONS, SESSIONS_RETIRED, SESSION_TIMEOUTS};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

impl SessionManager {
    /// Retire the session pending on `queue_id` if the engine reports it
    /// ready. Returns false, leaving the entry untouched, otherwise.
    pub fn check_for_completed_session(&self, queue_id: u64) -> bool {
        let mut engine = self.engine();

        let session = self.registry().find(queue_id).cloned();
        let session = match session {
            Some(session) => session,
            None => return false,
        };

        match engine.is_session_ready(session.id) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!("Unable to query session {}: {}", session.id, e);
                return false;
            }
        }

        let claimed = self.registry().remove_session(queue_id, session.id);
        if claimed.is_none() {
            return false;
        }
        PENDING_SESSIONS.dec();
        SESSIONS_RETIRED.inc();

        if let Err(e) = self.emit_locked(&mut **engine, &session) {
            error!(
                "Unable to write result for {}: {}",
                session.record.kernel_name, e
            );
        }

        if self.context.clear_if_bound(session.id) {
            close_context(&mut **engine);
        }

        debug!("Session {} on queue {} retired", session.id, queue_id);
        true
    }

    /// Poll the session pending on `queue_id` until it is retired or
    /// `timeout` runs out
    pub fn wait_for_completed_session(&self, queue_id: u64, timeout: Duration) -> bool {
        self.try_wait_for_completed_session(queue_id, timeout).is_ok()
    }

    pub fn try_wait_for_completed_session(
        &self,
        queue_id: u64,
        timeout: Duration,
    ) -> Result<(), ProfilerError> {
        let mut pending = self.registry().contains(queue_id);
        if !pending {
            error!("Unknown queue {} specified", queue_id);
            return Err(ProfilerError::UnknownQueue(queue_id));
        }

        let budget = timeout.as_millis() / POLL_INTERVAL.as_millis();
        let mut ticks = 0;
        while pending && ticks < budget {
            ticks += 1;
            if !self.check_for_completed_session(queue_id) {
                thread::sleep(POLL_INTERVAL);
            }
            pending = self.registry().contains(queue_id);
        }

        if pending {
            error!(
                "Session on queue {} never completed after waiting {:?}",
                queue_id, timeout
            );
            SESSION_TIMEOUTS.inc();
            return Err(ProfilerError::SessionTimeout { queue_id, timeout });
        }
        Ok(())
    }

    /// Drain every pending session, one queue at a time. Stops at the first
    /// queue that does not complete in time.
    pub fn wait_for_completed_sessions(&self, timeout: Duration) -> bool {
        loop {
            let next = self.registry().first_queue_id();
            let queue_id = match next {
                Some(queue_id) => queue_id,
                None => return true,
            };

            match self.try_wait_for_completed_session(queue_id, timeout) {
                Ok(()) => {}
                // Retired by another poller since it was listed
                Err(ProfilerError::UnknownQueue(_)) => continue,
                Err(e) => {
                    warn!("Stopped draining sessions: {}", e);
                    return false;
                }
            }
        }
    }

    /// Make sure no hardware context is open before a new one is opened.
    ///
    /// Called with the context lease held. A context still bound to a
    /// pending session is retired through the normal completion path; one
    /// whose session is already gone is closed directly.
    pub(crate) fn retire_open_context(&self, timeout: Duration) -> Result<(), ProfilerError> {
        let open = match self.context.open_context() {
            Some(open) => open,
            None => return Ok(()),
        };

        let bound = self.registry().find(open.queue_id).map(|s| s.id);
        if bound == Some(open.session) {
            debug!(
                "Waiting for session {} on queue {} before reopening",
                open.session, open.queue_id
            );
            self.try_wait_for_completed_session(open.queue_id, timeout)?;
        }

        let mut engine = self.engine();
        if let Some(stale) = self.context.open_context() {
            warn!(
                "Closing counter context left open by session {} on queue {}",
                stale.session, stale.queue_id
            );
            close_context(&mut **engine);
            self.context.clear_open();
        }
        Ok(())
    }
}
