//! Follow-up callbacks produced by disposition capture

use super::value_object::Disposition;
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{LeadRef, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scheduled callback for a lead
///
/// Consumed and closed by the reminder system; this crate only creates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    pub id: Uuid,
    pub lead_ref: LeadRef,
    pub session_id: SessionId,
    pub scheduled_for: DateTime<Utc>,
    pub reason: Disposition,
    pub notes: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl FollowUp {
    /// Create a follow-up; `scheduled_for` must be strictly after `now`
    pub fn new(
        lead_ref: LeadRef,
        session_id: SessionId,
        scheduled_for: DateTime<Utc>,
        reason: Disposition,
        notes: String,
        created_by: String,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if scheduled_for <= now {
            return Err(DomainError::ValidationError(format!(
                "Follow-up must be scheduled in the future, got {}",
                scheduled_for
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            lead_ref,
            session_id,
            scheduled_for,
            reason,
            notes,
            created_by,
            created_at: now,
        })
    }
}

/// Repository interface for follow-ups
#[async_trait]
pub trait FollowUpRepository: Send + Sync {
    async fn create(&self, follow_up: &FollowUp) -> Result<()>;

    async fn find_by_lead(&self, lead_ref: &LeadRef) -> Result<Vec<FollowUp>>;

    /// Follow-ups scheduled at or before `until`
    async fn find_due(&self, until: DateTime<Utc>) -> Result<Vec<FollowUp>>;
}
