//! Ledger store interface

use super::account::CreditAccount;
use crate::domain::shared::error::Result;
use crate::domain::shared::value_objects::TenantId;
use async_trait::async_trait;

/// Durable storage for credit accounts
///
/// Only the credit ledger talks to this port; every mutation goes through
/// reserve, commit or release.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load the account of a tenant
    async fn load(&self, tenant_id: &TenantId) -> Result<Option<CreditAccount>>;

    /// Insert or replace an account
    async fn save(&self, account: &CreditAccount) -> Result<()>;
}
