//! Credit ledger service
//!
//! Every mutation of a tenant's account runs under that tenant's lock:
//! load, mutate, save. Readers only ever see saved accounts, so a
//! reservation is never observed half-applied.

use crate::domain::ledger::{CommitReceipt, CreditAccount, CreditRate, LedgerStore, ReservationHandle};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{SessionId, TenantId};
use chrono::{Duration, Utc};
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct CreditLedger {
    store: Arc<dyn LedgerStore>,
    rate: CreditRate,
    billing_cycle: Duration,
    locks: Mutex<HashMap<TenantId, Arc<Mutex<()>>>>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn LedgerStore>, rate: CreditRate, billing_cycle: Duration) -> Self {
        Self {
            store,
            rate,
            billing_cycle,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn rate(&self) -> CreditRate {
        self.rate
    }

    /// Single-writer lock for one tenant's account
    async fn tenant_lock(&self, tenant_id: TenantId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, tenant_id: &TenantId) -> Result<CreditAccount> {
        self.store
            .load(tenant_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("Credit account for tenant {}", tenant_id)))
    }

    /// Create the account when a tenant becomes eligible to dial
    pub async fn open_account(
        &self,
        tenant_id: TenantId,
        balance: u64,
        free_allowance_quota: u64,
    ) -> Result<CreditAccount> {
        let lock = self.tenant_lock(tenant_id).await;
        let _guard = lock.lock().await;

        if self.store.load(&tenant_id).await?.is_some() {
            return Err(DomainError::AlreadyExists(format!(
                "Credit account for tenant {}",
                tenant_id
            )));
        }

        let account = CreditAccount::new(tenant_id, balance, free_allowance_quota, Utc::now());
        self.store.save(&account).await?;

        info!(
            "Opened credit account for tenant {}: balance={}, free_allowance={}",
            tenant_id, balance, free_allowance_quota
        );
        Ok(account)
    }

    /// Add purchased credits to the paid balance
    pub async fn top_up(&self, tenant_id: TenantId, credits: u64) -> Result<CreditAccount> {
        let lock = self.tenant_lock(tenant_id).await;
        let _guard = lock.lock().await;

        let mut account = self.load(&tenant_id).await?;
        account.balance = account.balance.saturating_add(credits);
        account.updated_at = Utc::now();
        self.store.save(&account).await?;

        info!("Tenant {} topped up {} credits, balance={}", tenant_id, credits, account.balance);
        Ok(account)
    }

    /// Current account state
    pub async fn account(&self, tenant_id: &TenantId) -> Result<CreditAccount> {
        self.load(tenant_id).await
    }

    /// Hold credits for a session before any provider resource is used
    pub async fn reserve(
        &self,
        tenant_id: TenantId,
        session_id: &SessionId,
        estimated_max_seconds: u64,
    ) -> Result<ReservationHandle> {
        let lock = self.tenant_lock(tenant_id).await;
        let _guard = lock.lock().await;

        let mut account = self.load(&tenant_id).await?;
        let now = Utc::now();

        if account.roll_billing_cycle(now, self.billing_cycle) {
            info!(
                "Tenant {} entered a new billing cycle, free allowance reset to {}",
                tenant_id, account.free_allowance_remaining
            );
        }

        let handle = match account.reserve(session_id, self.rate, estimated_max_seconds, now) {
            Ok(handle) => handle,
            Err(e) => {
                if let DomainError::InsufficientCredits { available, .. } = &e {
                    warn!(
                        "Tenant {} cannot afford session {}: available={}",
                        tenant_id, session_id, available
                    );
                    counter!("dialer_reservations_rejected_total").increment(1);
                }
                // A cycle roll may still need saving
                self.store.save(&account).await?;
                return Err(e);
            }
        };
        self.store.save(&account).await?;

        info!(
            "Reserved {} credits ({}s) for session {} of tenant {}",
            handle.amount, handle.covered_seconds, session_id, tenant_id
        );
        debug!(
            "Tenant {} after reserve: balance={}, free={}",
            tenant_id, account.balance, account.free_allowance_remaining
        );
        Ok(handle)
    }

    /// Settle the actual cost of a finished call; repeating it is a no-op
    pub async fn commit(
        &self,
        handle: &ReservationHandle,
        actual_seconds: u64,
    ) -> Result<CommitReceipt> {
        let lock = self.tenant_lock(handle.tenant_id).await;
        let _guard = lock.lock().await;

        let mut account = self.load(&handle.tenant_id).await?;
        let receipt = account.commit(&handle.session_id, self.rate, actual_seconds, Utc::now())?;

        if receipt.replayed {
            debug!("Commit for session {} already applied", handle.session_id);
            return Ok(receipt);
        }
        self.store.save(&account).await?;

        counter!("dialer_credits_committed_total").increment(receipt.cost);
        info!(
            "Committed {} credits ({} min) for session {} of tenant {}, refunded free={} balance={}",
            receipt.cost,
            receipt.billable_minutes,
            handle.session_id,
            handle.tenant_id,
            receipt.refunded_free,
            receipt.refunded_balance
        );
        Ok(receipt)
    }

    /// Return the whole hold of a call that never connected
    pub async fn release(&self, handle: &ReservationHandle) -> Result<u64> {
        let lock = self.tenant_lock(handle.tenant_id).await;
        let _guard = lock.lock().await;

        let mut account = self.load(&handle.tenant_id).await?;
        let returned = account.release(&handle.session_id, Utc::now())?;
        if returned > 0 {
            self.store.save(&account).await?;
        }

        info!(
            "Released {} credits for session {} of tenant {}",
            returned, handle.session_id, handle.tenant_id
        );
        Ok(returned)
    }
}
