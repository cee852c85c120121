//! Disposition capture
//!
//! Runs inside the session actor while the session is awaiting
//! disposition; the follow-up is stored before the session closes.

use crate::domain::disposition::{Disposition, FollowUp, FollowUpRepository};
use crate::domain::session::CallSession;
use crate::domain::shared::error::Result;
use crate::domain::shared::value_objects::LeadRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Notes recorded when a session is closed by the disposition timeout
pub const AUTO_CLOSE_NOTE: &str = "auto-closed: disposition timeout";

/// What the operator submitted for a finished call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionSubmission {
    pub disposition: Disposition,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub scheduled_callback: Option<DateTime<Utc>>,
    #[serde(default)]
    pub submitted_by: String,
}

impl DispositionSubmission {
    pub fn new(disposition: Disposition) -> Self {
        Self {
            disposition,
            notes: String::new(),
            tags: Vec::new(),
            scheduled_callback: None,
            submitted_by: String::new(),
        }
    }

    pub fn with_callback(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_callback = Some(at);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// Result of a submitted disposition
#[derive(Debug, Clone, Serialize)]
pub struct DispositionOutcome {
    pub session: CallSession,
    pub follow_up: Option<FollowUp>,
}

pub struct DispositionCapture {
    follow_ups: Arc<dyn FollowUpRepository>,
}

impl DispositionCapture {
    pub fn new(follow_ups: Arc<dyn FollowUpRepository>) -> Self {
        Self { follow_ups }
    }

    /// Create the follow-up a submission asks for, if any
    ///
    /// A callback that is not strictly after `now`, or a session without a
    /// lead to call back, produces nothing.
    pub async fn schedule_follow_up(
        &self,
        session: &CallSession,
        submission: &DispositionSubmission,
        now: DateTime<Utc>,
    ) -> Result<Option<FollowUp>> {
        let Some(scheduled_for) = submission.scheduled_callback else {
            return Ok(None);
        };

        if scheduled_for <= now {
            debug!(
                "Callback {} for session {} is not in the future, no follow-up",
                scheduled_for,
                session.id()
            );
            return Ok(None);
        }

        let Some(lead_ref) = session.lead_ref() else {
            warn!(
                "Session {} requested a callback but has no lead, no follow-up",
                session.id()
            );
            return Ok(None);
        };

        let follow_up = FollowUp::new(
            lead_ref.clone(),
            session.id().clone(),
            scheduled_for,
            submission.disposition,
            submission.notes.clone(),
            submission.submitted_by.clone(),
            now,
        )?;
        self.follow_ups.create(&follow_up).await?;

        info!(
            "Follow-up {} scheduled for lead {} at {}",
            follow_up.id, lead_ref, scheduled_for
        );
        Ok(Some(follow_up))
    }

    pub async fn follow_ups_for(&self, lead_ref: &LeadRef) -> Result<Vec<FollowUp>> {
        self.follow_ups.find_by_lead(lead_ref).await
    }

    /// Follow-ups the reminder system should act on by `until`
    pub async fn due(&self, until: DateTime<Utc>) -> Result<Vec<FollowUp>> {
        self.follow_ups.find_due(until).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::{PhoneNumber, SessionId, TenantId};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRepository {
        created: Mutex<Vec<FollowUp>>,
    }

    #[async_trait]
    impl FollowUpRepository for RecordingRepository {
        async fn create(&self, follow_up: &FollowUp) -> Result<()> {
            self.created.lock().unwrap().push(follow_up.clone());
            Ok(())
        }

        async fn find_by_lead(&self, lead_ref: &LeadRef) -> Result<Vec<FollowUp>> {
            Ok(self
                .created
                .lock()
                .unwrap()
                .iter()
                .filter(|f| &f.lead_ref == lead_ref)
                .cloned()
                .collect())
        }

        async fn find_due(&self, until: DateTime<Utc>) -> Result<Vec<FollowUp>> {
            Ok(self
                .created
                .lock()
                .unwrap()
                .iter()
                .filter(|f| f.scheduled_for <= until)
                .cloned()
                .collect())
        }
    }

    fn session_with_lead(lead: Option<&str>) -> CallSession {
        CallSession::new(
            SessionId::new(),
            TenantId::new(),
            PhoneNumber::parse("+14155550100").unwrap(),
            PhoneNumber::parse("+14155550199").unwrap(),
            lead.map(LeadRef::new),
        )
    }

    #[tokio::test]
    async fn test_future_callback_creates_follow_up() {
        let repo = Arc::new(RecordingRepository::default());
        let capture = DispositionCapture::new(repo.clone());
        let now = Utc::now();

        let submission = DispositionSubmission::new(Disposition::MeetingBooked)
            .with_callback(now + Duration::days(2))
            .with_notes("Demo on Thursday");
        let follow_up = capture
            .schedule_follow_up(&session_with_lead(Some("lead-3")), &submission, now)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(follow_up.reason, Disposition::MeetingBooked);
        assert_eq!(follow_up.notes, "Demo on Thursday");
        assert_eq!(repo.created.lock().unwrap().len(), 1);
        assert_eq!(
            capture.follow_ups_for(&LeadRef::new("lead-3")).await.unwrap().len(),
            1
        );
        assert!(capture.due(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_past_or_missing_callback_creates_nothing() {
        let repo = Arc::new(RecordingRepository::default());
        let capture = DispositionCapture::new(repo.clone());
        let now = Utc::now();
        let session = session_with_lead(Some("lead-1"));

        let none = DispositionSubmission::new(Disposition::Callback);
        let past = DispositionSubmission::new(Disposition::Callback).with_callback(now);

        assert!(capture.schedule_follow_up(&session, &none, now).await.unwrap().is_none());
        assert!(capture.schedule_follow_up(&session, &past, now).await.unwrap().is_none());
        assert!(repo.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_callback_without_lead_is_dropped() {
        let repo = Arc::new(RecordingRepository::default());
        let capture = DispositionCapture::new(repo.clone());
        let now = Utc::now();

        let submission =
            DispositionSubmission::new(Disposition::Callback).with_callback(now + Duration::hours(1));
        let result = capture
            .schedule_follow_up(&session_with_lead(None), &submission, now)
            .await
            .unwrap();

        assert!(result.is_none());
    }

    #[test]
    fn test_submission_json_defaults() {
        let submission: DispositionSubmission =
            serde_json::from_str(r#"{"disposition":"no_answer"}"#).unwrap();
        assert_eq!(submission.disposition, Disposition::NoAnswer);
        assert!(submission.tags.is_empty());
        assert!(submission.scheduled_callback.is_none());
    }
}
