//! PostgreSQL implementation of FollowUpRepository

use super::database::storage_error;
use crate::domain::disposition::{Disposition, FollowUp, FollowUpRepository};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{LeadRef, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

#[derive(FromRow)]
struct FollowUpRow {
    id: Uuid,
    lead_ref: String,
    session_id: String,
    scheduled_for: DateTime<Utc>,
    reason: String,
    notes: String,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<FollowUpRow> for FollowUp {
    type Error = DomainError;

    fn try_from(r: FollowUpRow) -> Result<Self> {
        let reason = Disposition::from_str(&r.reason).ok_or_else(|| {
            DomainError::Storage(format!("Unknown disposition '{}' on follow-up {}", r.reason, r.id))
        })?;

        Ok(FollowUp {
            id: r.id,
            lead_ref: LeadRef::new(r.lead_ref),
            session_id: SessionId::from(r.session_id),
            scheduled_for: r.scheduled_for,
            reason,
            notes: r.notes,
            created_by: r.created_by,
            created_at: r.created_at,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, lead_ref, session_id, scheduled_for, reason, notes, created_by, created_at FROM follow_ups";

pub struct PgFollowUpRepository {
    pool: PgPool,
}

impl PgFollowUpRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FollowUpRepository for PgFollowUpRepository {
    async fn create(&self, follow_up: &FollowUp) -> Result<()> {
        debug!(
            "Creating follow-up {} for lead {} at {}",
            follow_up.id, follow_up.lead_ref, follow_up.scheduled_for
        );

        sqlx::query(
            r#"
            INSERT INTO follow_ups (
                id, lead_ref, session_id, scheduled_for, reason, notes, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(follow_up.id)
        .bind(follow_up.lead_ref.as_str())
        .bind(follow_up.session_id.as_str())
        .bind(follow_up.scheduled_for)
        .bind(follow_up.reason.as_str())
        .bind(&follow_up.notes)
        .bind(&follow_up.created_by)
        .bind(follow_up.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DomainError::AlreadyExists(format!("Follow-up {}", follow_up.id))
            }
            _ => storage_error("create follow-up", e),
        })?;

        Ok(())
    }

    async fn find_by_lead(&self, lead_ref: &LeadRef) -> Result<Vec<FollowUp>> {
        let rows = sqlx::query_as::<_, FollowUpRow>(&format!(
            "{} WHERE lead_ref = $1 ORDER BY scheduled_for",
            SELECT_COLUMNS
        ))
        .bind(lead_ref.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("list follow-ups by lead", e))?;

        rows.into_iter().map(FollowUp::try_from).collect()
    }

    async fn find_due(&self, until: DateTime<Utc>) -> Result<Vec<FollowUp>> {
        let rows = sqlx::query_as::<_, FollowUpRow>(&format!(
            "{} WHERE scheduled_for <= $1 ORDER BY scheduled_for",
            SELECT_COLUMNS
        ))
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("list due follow-ups", e))?;

        rows.into_iter().map(FollowUp::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_reason_is_storage_error() {
        let row = FollowUpRow {
            id: Uuid::new_v4(),
            lead_ref: "lead-1".to_string(),
            session_id: "s1".to_string(),
            scheduled_for: Utc::now(),
            reason: "maybe".to_string(),
            notes: String::new(),
            created_by: "agent".to_string(),
            created_at: Utc::now(),
        };
        assert!(matches!(FollowUp::try_from(row), Err(DomainError::Storage(_))));
    }
}
