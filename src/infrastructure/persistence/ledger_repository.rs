//! PostgreSQL implementation of LedgerStore

use super::database::storage_error;
use crate::domain::ledger::{CreditAccount, LedgerStore, Reservation};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::TenantId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

#[derive(FromRow)]
struct AccountRow {
    tenant_id: Uuid,
    balance: i64,
    free_allowance_remaining: i64,
    free_allowance_quota: i64,
    cycle_started_at: DateTime<Utc>,
    reservations: Json<Vec<Reservation>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AccountRow> for CreditAccount {
    fn from(r: AccountRow) -> Self {
        CreditAccount {
            tenant_id: TenantId::from_uuid(r.tenant_id),
            balance: r.balance.max(0) as u64,
            free_allowance_remaining: r.free_allowance_remaining.max(0) as u64,
            free_allowance_quota: r.free_allowance_quota.max(0) as u64,
            cycle_started_at: r.cycle_started_at,
            reservations: r
                .reservations
                .0
                .into_iter()
                .map(|reservation| (reservation.session_id.clone(), reservation))
                .collect(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn to_db_amount(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| DomainError::Storage(format!("Credit amount {} out of range", value)))
}

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn load(&self, tenant_id: &TenantId) -> Result<Option<CreditAccount>> {
        debug!("Loading credit account of tenant {}", tenant_id);

        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT tenant_id, balance, free_allowance_remaining, free_allowance_quota,
                   cycle_started_at, reservations, created_at, updated_at
            FROM credit_accounts
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("load credit account", e))?;

        Ok(row.map(CreditAccount::from))
    }

    async fn save(&self, account: &CreditAccount) -> Result<()> {
        debug!("Saving credit account of tenant {}", account.tenant_id);

        let mut reservations: Vec<&Reservation> = account.reservations.values().collect();
        reservations.sort_by_key(|r| r.created_at);

        sqlx::query(
            r#"
            INSERT INTO credit_accounts (
                tenant_id, balance, free_allowance_remaining, free_allowance_quota,
                cycle_started_at, reservations, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id) DO UPDATE
            SET balance = EXCLUDED.balance,
                free_allowance_remaining = EXCLUDED.free_allowance_remaining,
                free_allowance_quota = EXCLUDED.free_allowance_quota,
                cycle_started_at = EXCLUDED.cycle_started_at,
                reservations = EXCLUDED.reservations,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(account.tenant_id.as_uuid())
        .bind(to_db_amount(account.balance)?)
        .bind(to_db_amount(account.free_allowance_remaining)?)
        .bind(to_db_amount(account.free_allowance_quota)?)
        .bind(account.cycle_started_at)
        .bind(Json(&reservations))
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("save credit account", e))?;

        Ok(())
    }
}
