//! PostgreSQL implementation of DialQueueRepository

use super::database::storage_error;
use crate::domain::dialer::{DialQueue, DialQueueEntry, DialQueueRepository, InFlight, QueueStatus};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{LeadRef, PhoneNumber, QueueId, SessionId, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

#[derive(FromRow)]
struct QueueRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    caller_id: String,
    status: String,
    pause_requested: bool,
    in_flight_lead_ref: Option<String>,
    in_flight_session_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct EntryRow {
    lead_ref: String,
    position: i32,
    attempted: bool,
    last_session_ref: Option<String>,
    skip_reason: Option<String>,
    attempted_at: Option<DateTime<Utc>>,
}

impl QueueRow {
    fn into_queue(self, entries: Vec<EntryRow>) -> Result<DialQueue> {
        let queue_id = QueueId::from_uuid(self.id);
        let status = QueueStatus::parse(&self.status).ok_or_else(|| {
            DomainError::Storage(format!("Unknown status '{}' on queue {}", self.status, self.id))
        })?;
        let caller_id = PhoneNumber::parse(&self.caller_id).map_err(DomainError::Storage)?;

        let in_flight = match (self.in_flight_lead_ref, self.in_flight_session_id) {
            (Some(lead_ref), Some(session_id)) => Some(InFlight {
                lead_ref: LeadRef::new(lead_ref),
                session_id: SessionId::from(session_id),
            }),
            _ => None,
        };

        Ok(DialQueue {
            id: queue_id,
            tenant_id: TenantId::from_uuid(self.tenant_id),
            name: self.name,
            caller_id,
            status,
            pause_requested: self.pause_requested,
            entries: entries
                .into_iter()
                .map(|e| DialQueueEntry {
                    queue_id,
                    lead_ref: LeadRef::new(e.lead_ref),
                    position: e.position.max(0) as usize,
                    attempted: e.attempted,
                    last_session_ref: e.last_session_ref.map(SessionId::from),
                    skip_reason: e.skip_reason,
                    attempted_at: e.attempted_at,
                })
                .collect(),
            in_flight,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const QUEUE_COLUMNS: &str = r#"
    SELECT id, tenant_id, name, caller_id, status, pause_requested,
           in_flight_lead_ref, in_flight_session_id, created_at, updated_at
    FROM dial_queues
"#;

pub struct PgDialQueueRepository {
    pool: PgPool,
}

impl PgDialQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_entries(&self, queue_id: Uuid) -> Result<Vec<EntryRow>> {
        sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT lead_ref, position, attempted, last_session_ref, skip_reason, attempted_at
            FROM dial_queue_entries
            WHERE queue_id = $1
            ORDER BY position
            "#,
        )
        .bind(queue_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("load dial queue entries", e))
    }

    async fn with_entries(&self, rows: Vec<QueueRow>) -> Result<Vec<DialQueue>> {
        let mut queues = Vec::with_capacity(rows.len());
        for row in rows {
            let entries = self.load_entries(row.id).await?;
            queues.push(row.into_queue(entries)?);
        }
        Ok(queues)
    }
}

#[async_trait]
impl DialQueueRepository for PgDialQueueRepository {
    async fn find_by_id(&self, id: &QueueId) -> Result<Option<DialQueue>> {
        let row = sqlx::query_as::<_, QueueRow>(&format!("{} WHERE id = $1", QUEUE_COLUMNS))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("get dial queue", e))?;

        match row {
            Some(row) => {
                let entries = self.load_entries(row.id).await?;
                Ok(Some(row.into_queue(entries)?))
            }
            None => Ok(None),
        }
    }

    /// Replaces the entry rows inside one transaction
    async fn save(&self, queue: &DialQueue) -> Result<()> {
        debug!(
            "Saving dial queue {} ({} entries, {})",
            queue.id,
            queue.entries.len(),
            queue.status.as_str()
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("begin dial queue transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO dial_queues (
                id, tenant_id, name, caller_id, status, pause_requested,
                in_flight_lead_ref, in_flight_session_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                status = EXCLUDED.status,
                pause_requested = EXCLUDED.pause_requested,
                in_flight_lead_ref = EXCLUDED.in_flight_lead_ref,
                in_flight_session_id = EXCLUDED.in_flight_session_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(queue.id.as_uuid())
        .bind(queue.tenant_id.as_uuid())
        .bind(&queue.name)
        .bind(queue.caller_id.as_str())
        .bind(queue.status.as_str())
        .bind(queue.pause_requested)
        .bind(queue.in_flight.as_ref().map(|f| f.lead_ref.as_str().to_string()))
        .bind(queue.in_flight.as_ref().map(|f| f.session_id.as_str().to_string()))
        .bind(queue.created_at)
        .bind(queue.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error("save dial queue", e))?;

        sqlx::query("DELETE FROM dial_queue_entries WHERE queue_id = $1")
            .bind(queue.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_error("clear dial queue entries", e))?;

        for entry in &queue.entries {
            sqlx::query(
                r#"
                INSERT INTO dial_queue_entries (
                    queue_id, lead_ref, position, attempted, last_session_ref, skip_reason, attempted_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(queue.id.as_uuid())
            .bind(entry.lead_ref.as_str())
            .bind(entry.position.min(i32::MAX as usize) as i32)
            .bind(entry.attempted)
            .bind(entry.last_session_ref.as_ref().map(|s| s.as_str().to_string()))
            .bind(entry.skip_reason.as_deref())
            .bind(entry.attempted_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_error("save dial queue entry", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| storage_error("commit dial queue", e))?;
        Ok(())
    }

    async fn find_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<DialQueue>> {
        let rows = sqlx::query_as::<_, QueueRow>(&format!(
            "{} WHERE tenant_id = $1 ORDER BY created_at",
            QUEUE_COLUMNS
        ))
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("list dial queues", e))?;

        self.with_entries(rows).await
    }

    async fn find_active(&self) -> Result<Vec<DialQueue>> {
        let rows = sqlx::query_as::<_, QueueRow>(&format!(
            "{} WHERE status IN ($1, $2) ORDER BY created_at",
            QUEUE_COLUMNS
        ))
        .bind(QueueStatus::Running.as_str())
        .bind(QueueStatus::Paused.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("list active dial queues", e))?;

        self.with_entries(rows).await
    }
}
