//! Outcome statistics over finished sessions

use crate::domain::disposition::{Disposition, FollowUp};
use crate::domain::session::{CallSession, SessionState};
use serde::{Deserialize, Serialize};

/// Aggregated outcome of a set of sessions
///
/// Pickups are counted from dispositions only. A provider "completed" status
/// or a long duration says nothing about whether a human answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub attempts: usize,
    pub connected: usize,
    pub failed: usize,
    pub human_pickups: usize,
    pub voicemail_drops: usize,
    pub undispositioned: usize,
    pub consumed_seconds: u64,
    pub follow_ups: usize,
}

impl SessionReport {
    pub fn from_sessions<'a, I>(sessions: I, follow_ups: &[FollowUp]) -> Self
    where
        I: IntoIterator<Item = &'a CallSession>,
    {
        let mut report = SessionReport::default();

        for session in sessions {
            if matches!(session.state(), SessionState::Idle) {
                continue;
            }
            report.attempts += 1;

            if matches!(session.state(), SessionState::Failed(_)) {
                report.failed += 1;
                continue;
            }
            if session.connected_at().is_some() {
                report.connected += 1;
            }
            report.consumed_seconds += session.consumed_seconds();

            if session.is_human_pickup() {
                report.human_pickups += 1;
            }
            match session.disposition() {
                Some(Disposition::LeftVoicemail) => report.voicemail_drops += 1,
                None if session.state() == &SessionState::Closed => report.undispositioned += 1,
                _ => {}
            }
        }

        report.follow_ups = follow_ups.len();
        report
    }

    /// Share of attempts a human answered, 0.0 when nothing was attempted
    pub fn pickup_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.human_pickups as f64 / self.attempts as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::ReservationHandle;
    use crate::domain::session::FailureReason;
    use crate::domain::shared::value_objects::{LeadRef, PhoneNumber, SessionId, TenantId};
    use chrono::{Duration, Utc};

    fn finished_session(seconds: i64, disposition: Option<Disposition>) -> CallSession {
        let mut session = CallSession::new(
            SessionId::new(),
            TenantId::new(),
            PhoneNumber::parse("+14155550100").unwrap(),
            PhoneNumber::parse("+14155550111").unwrap(),
            Some(LeadRef::new("lead")),
        );
        let handle = ReservationHandle {
            tenant_id: session.tenant_id(),
            session_id: session.id().clone(),
            amount: 100,
            covered_seconds: 600,
        };
        session.begin_connecting(&handle).unwrap();
        let connected = Utc::now();
        session.mark_connected(connected).unwrap();
        session
            .begin_disconnect(connected + Duration::seconds(seconds), None)
            .unwrap();
        session.await_disposition().unwrap();
        session
            .record_disposition(disposition, String::new(), vec![], Utc::now())
            .unwrap();
        session
    }

    #[test]
    fn test_voicemail_is_not_a_pickup() {
        let voicemail = finished_session(45, Some(Disposition::LeftVoicemail));
        let interested = finished_session(3, Some(Disposition::Interested));

        let report = SessionReport::from_sessions([&voicemail, &interested], &[]);

        assert_eq!(report.attempts, 2);
        assert_eq!(report.connected, 2);
        assert_eq!(report.human_pickups, 1);
        assert_eq!(report.voicemail_drops, 1);
        assert_eq!(report.consumed_seconds, 48);
        assert!((report.pickup_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_long_call_without_disposition_is_not_a_pickup() {
        let skipped = finished_session(600, None);
        let report = SessionReport::from_sessions([&skipped], &[]);

        assert_eq!(report.human_pickups, 0);
        assert_eq!(report.undispositioned, 1);
    }

    #[test]
    fn test_failed_sessions_count_as_attempts() {
        let mut failed = CallSession::new(
            SessionId::new(),
            TenantId::new(),
            PhoneNumber::parse("+14155550100").unwrap(),
            PhoneNumber::parse("+14155550122").unwrap(),
            None,
        );
        let handle = ReservationHandle {
            tenant_id: failed.tenant_id(),
            session_id: failed.id().clone(),
            amount: 10,
            covered_seconds: 60,
        };
        failed.begin_connecting(&handle).unwrap();
        failed.fail(FailureReason::Busy, Utc::now()).unwrap();

        let report = SessionReport::from_sessions([&failed], &[]);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.connected, 0);
        assert_eq!(report.pickup_rate(), 0.0);
    }
}
