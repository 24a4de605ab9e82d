//! Status session tracking.
//!
//! Converts the stream of decoded statuses into closed time intervals:
//!
//! - a new status opens a session and closes the one before it
//! - the 1 Hz ticker stretches the open session's end to "now"
//! - a disconnect or pause closes the open session
//! - a flush folds the working list into the running [`DurationTable`] and
//!   hands the drained sessions to the persistence layer
//!
//! Session ends only move forward, so durations never shrink between ticks.

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::types::{DeviceIdentity, DurationTable, Status, StatusSession};

/// Owns the working list of unflushed sessions and the open one.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    device: DeviceIdentity,
    sessions: Vec<StatusSession>,
    /// Index of the open session in `sessions`.
    open: Option<usize>,
}

impl SessionTracker {
    /// Creates an empty tracker for `device`.
    #[must_use]
    pub const fn new(device: DeviceIdentity) -> Self {
        Self {
            device,
            sessions: Vec::new(),
            open: None,
        }
    }

    /// Records a decoded status at `at`.
    ///
    /// The open session, if any, is closed at `at` and a new one starts there.
    /// [`Status::None`] is ignored. Returns `true` when a session was opened.
    pub fn on_status(&mut self, status: Status, at: DateTime<Utc>) -> bool {
        if !status.is_tracked() {
            return false;
        }

        self.close(at);

        debug!(device = %self.device, %status, "status session opened");
        self.sessions
            .push(StatusSession::open(self.device.clone(), status, at));
        self.open = Some(self.sessions.len() - 1);
        true
    }

    /// Extends the open session's end to `at`. No-op without an open session.
    pub fn tick(&mut self, at: DateTime<Utc>) {
        if let Some(session) = self.open_mut() {
            if at > session.end() {
                session.set_end(at);
                trace!(status = %session.status(), duration_ms = session.duration_ms(), "tick");
            }
        }
    }

    /// Closes the open session at `at`.
    pub fn close(&mut self, at: DateTime<Utc>) {
        if let Some(session) = self.open_mut() {
            if at > session.end() {
                session.set_end(at);
            }
        }
        self.open = None;
    }

    /// Adds every working-list duration into `table` and drains the list.
    ///
    /// The open session is forgotten, so callers close it first. An empty
    /// working list yields an empty vector and leaves `table` untouched.
    pub fn flush(&mut self, table: &mut DurationTable) -> Vec<StatusSession> {
        self.open = None;
        if self.sessions.is_empty() {
            return Vec::new();
        }

        for session in &self.sessions {
            table.add(session.status(), session.duration_ms());
        }
        debug!(
            device = %self.device,
            count = self.sessions.len(),
            "flushed status sessions"
        );
        std::mem::take(&mut self.sessions)
    }

    /// The unflushed sessions, oldest first.
    #[must_use]
    pub fn sessions(&self) -> &[StatusSession] {
        &self.sessions
    }

    /// The open session, if any.
    #[must_use]
    pub fn current(&self) -> Option<&StatusSession> {
        self.open.and_then(|idx| self.sessions.get(idx))
    }

    /// Status of the open session, or [`Status::None`].
    #[must_use]
    pub fn current_status(&self) -> Status {
        self.current().map_or(Status::None, StatusSession::status)
    }

    /// The device this tracker records for.
    #[must_use]
    pub const fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    fn open_mut(&mut self) -> Option<&mut StatusSession> {
        self.open.and_then(|idx| self.sessions.get_mut(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn tracker() -> SessionTracker {
        SessionTracker::new(DeviceIdentity::new("IDP-Monitor", "AA:BB:CC:DD:EE:FF"))
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::milliseconds(ms)
    }

    #[test]
    fn test_none_status_is_ignored() {
        let mut t = tracker();
        assert!(!t.on_status(Status::None, at(0)));
        assert!(t.sessions().is_empty());
        assert_eq!(t.current_status(), Status::None);
    }

    #[test]
    fn test_tick_extends_open_session() {
        let mut t = tracker();
        t.on_status(Status::Idle, at(0));
        t.tick(at(1000));
        t.tick(at(2000));
        assert_eq!(t.current().unwrap().duration_ms(), 2000);
    }

    #[test]
    fn test_tick_never_shrinks_duration() {
        let mut t = tracker();
        t.on_status(Status::Idle, at(0));
        let mut last = 0;
        for ms in [1000, 500, 3000, 2999, 3000, 4000] {
            t.tick(at(ms));
            let now = t.current().unwrap().duration_ms();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 4000);
    }

    #[test]
    fn test_tick_without_open_session_is_noop() {
        let mut t = tracker();
        t.tick(at(1000));
        assert!(t.sessions().is_empty());
    }

    #[test]
    fn test_new_status_closes_previous_session() {
        let mut t = tracker();
        t.on_status(Status::Idle, at(0));
        t.tick(at(600));
        t.on_status(Status::Danger, at(1000));
        t.tick(at(2000));

        let sessions = t.sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].end(), at(1000));
        assert_eq!(sessions[0].duration_ms(), 1000);
        assert_eq!(sessions[1].start(), at(1000));
        assert_eq!(sessions[1].duration_ms(), 1000);
        assert_eq!(t.current_status(), Status::Danger);
    }

    #[test]
    fn test_repeated_status_does_not_double_count() {
        let mut t = tracker();
        t.on_status(Status::Idle, at(0));
        t.on_status(Status::Idle, at(1000));
        t.tick(at(2000));

        let total: u64 = t.sessions().iter().map(StatusSession::duration_ms).sum();
        assert_eq!(total, 2000);
    }

    #[test]
    fn test_close_then_tick_does_not_reopen() {
        let mut t = tracker();
        t.on_status(Status::Warning, at(0));
        t.close(at(1500));
        t.tick(at(5000));

        assert!(t.current().is_none());
        assert_eq!(t.sessions()[0].duration_ms(), 1500);
    }

    #[test]
    fn test_flush_moves_durations_into_table() {
        let mut t = tracker();
        let mut table = DurationTable::default();
        table.add(Status::Idle, 10_000);

        t.on_status(Status::Idle, at(0));
        t.on_status(Status::Danger, at(1000));
        t.close(at(2000));

        let drained = t.flush(&mut table);
        assert_eq!(drained.len(), 2);
        assert_eq!(table.get(Status::Idle), 11_000);
        assert_eq!(table.get(Status::Danger), 1000);
        assert!(t.sessions().is_empty());
        assert!(t.current().is_none());
    }

    #[test]
    fn test_empty_flush_is_idempotent() {
        let mut t = tracker();
        let mut table = DurationTable::default();
        table.add(Status::Warning, 42);

        assert!(t.flush(&mut table).is_empty());
        assert!(t.flush(&mut table).is_empty());
        assert_eq!(table.get(Status::Warning), 42);
        assert_eq!(table.total(), 42);
    }
}
