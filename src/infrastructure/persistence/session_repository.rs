//! PostgreSQL implementation of SessionRepository
//!
//! The aggregate is stored whole as JSONB; the scalar columns beside it
//! exist for queries and reporting.

use super::database::storage_error;
use crate::domain::session::{CallSession, SessionRepository};
use crate::domain::shared::error::Result;
use crate::domain::shared::value_objects::{SessionId, TenantId};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;

pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn decode(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<CallSession>> {
        rows.into_iter()
            .map(|row| {
                row.try_get::<Json<CallSession>, _>("snapshot")
                    .map(|json| json.0)
                    .map_err(|e| storage_error("decode call session", e))
            })
            .collect()
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<CallSession>> {
        let rows = sqlx::query("SELECT snapshot FROM call_sessions WHERE id = $1")
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("get call session", e))?;

        Ok(Self::decode(rows)?.into_iter().next())
    }

    async fn save(&self, session: &CallSession) -> Result<()> {
        debug!(
            "Saving session {} in {}",
            session.id(),
            session.state().as_str()
        );

        sqlx::query(
            r#"
            INSERT INTO call_sessions (
                id, tenant_id, state, caller_id, callee_number, lead_ref, provider_call_id,
                started_at, connected_at, ended_at, consumed_seconds, disposition,
                snapshot, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE
            SET state = EXCLUDED.state,
                provider_call_id = EXCLUDED.provider_call_id,
                connected_at = EXCLUDED.connected_at,
                ended_at = EXCLUDED.ended_at,
                consumed_seconds = EXCLUDED.consumed_seconds,
                disposition = EXCLUDED.disposition,
                snapshot = EXCLUDED.snapshot,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(session.id().as_str())
        .bind(session.tenant_id().as_uuid())
        .bind(session.state().as_str())
        .bind(session.caller_id().as_str())
        .bind(session.callee_number().as_str())
        .bind(session.lead_ref().map(|l| l.as_str().to_string()))
        .bind(session.provider_call_id().map(|p| p.as_str().to_string()))
        .bind(session.started_at())
        .bind(session.connected_at())
        .bind(session.ended_at())
        .bind(session.consumed_seconds().min(i64::MAX as u64) as i64)
        .bind(session.disposition().map(|d| d.as_str()))
        .bind(Json(session))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("save call session", e))?;

        Ok(())
    }

    async fn find_unfinished(&self) -> Result<Vec<CallSession>> {
        let rows = sqlx::query(
            r#"
            SELECT snapshot FROM call_sessions
            WHERE state NOT IN ('closed', 'failed')
            ORDER BY started_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("list unfinished sessions", e))?;

        Self::decode(rows)
    }

    async fn find_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<CallSession>> {
        let rows = sqlx::query(
            r#"
            SELECT snapshot FROM call_sessions
            WHERE tenant_id = $1
            ORDER BY started_at DESC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("list tenant sessions", e))?;

        Self::decode(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::PhoneNumber;
    use crate::infrastructure::persistence::database::{create_pool, run_migrations, DatabaseConfig};

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_save_and_find_session() {
        let pool = create_pool(&DatabaseConfig::from_env()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = PgSessionRepository::new(pool);

        let session = CallSession::new(
            SessionId::new(),
            TenantId::new(),
            PhoneNumber::parse("+14155550100").unwrap(),
            PhoneNumber::parse("+14155550101").unwrap(),
            None,
        );
        repo.save(&session).await.unwrap();

        let found = repo.find_by_id(session.id()).await.unwrap().unwrap();
        assert_eq!(found.id(), session.id());
        assert_eq!(repo.find_by_tenant(&session.tenant_id()).await.unwrap().len(), 1);
    }
}
