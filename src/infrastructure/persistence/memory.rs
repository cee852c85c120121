//! In-memory repositories
//!
//! Used by the binary when no database is configured and by the tests.

use crate::domain::dialer::{DialQueue, DialQueueRepository, QueueStatus};
use crate::domain::disposition::{FollowUp, FollowUpRepository};
use crate::domain::lead::{Lead, LeadStore};
use crate::domain::ledger::{CreditAccount, LedgerStore};
use crate::domain::session::{CallSession, SessionRepository};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{LeadRef, QueueId, SessionId, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    accounts: Arc<RwLock<HashMap<TenantId, CreditAccount>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load(&self, tenant_id: &TenantId) -> Result<Option<CreditAccount>> {
        Ok(self.accounts.read().await.get(tenant_id).cloned())
    }

    async fn save(&self, account: &CreditAccount) -> Result<()> {
        self.accounts
            .write()
            .await
            .insert(account.tenant_id, account.clone());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemorySessionRepository {
    sessions: Arc<RwLock<HashMap<SessionId, CallSession>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<CallSession>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn save(&self, session: &CallSession) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id().clone(), session.clone());
        Ok(())
    }

    async fn find_unfinished(&self) -> Result<Vec<CallSession>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| !s.state().is_terminal())
            .cloned()
            .collect())
    }

    async fn find_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<CallSession>> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| &s.tenant_id() == tenant_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at().cmp(&a.started_at()));
        Ok(sessions)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryFollowUpRepository {
    follow_ups: Arc<RwLock<Vec<FollowUp>>>,
}

impl InMemoryFollowUpRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<FollowUp> {
        self.follow_ups.read().await.clone()
    }
}

#[async_trait]
impl FollowUpRepository for InMemoryFollowUpRepository {
    async fn create(&self, follow_up: &FollowUp) -> Result<()> {
        let mut follow_ups = self.follow_ups.write().await;
        if follow_ups.iter().any(|f| f.id == follow_up.id) {
            return Err(DomainError::AlreadyExists(format!("Follow-up {}", follow_up.id)));
        }
        follow_ups.push(follow_up.clone());
        Ok(())
    }

    async fn find_by_lead(&self, lead_ref: &LeadRef) -> Result<Vec<FollowUp>> {
        Ok(self
            .follow_ups
            .read()
            .await
            .iter()
            .filter(|f| &f.lead_ref == lead_ref)
            .cloned()
            .collect())
    }

    async fn find_due(&self, until: DateTime<Utc>) -> Result<Vec<FollowUp>> {
        let mut due: Vec<_> = self
            .follow_ups
            .read()
            .await
            .iter()
            .filter(|f| f.scheduled_for <= until)
            .cloned()
            .collect();
        due.sort_by_key(|f| f.scheduled_for);
        Ok(due)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryDialQueueRepository {
    queues: Arc<RwLock<HashMap<QueueId, DialQueue>>>,
}

impl InMemoryDialQueueRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DialQueueRepository for InMemoryDialQueueRepository {
    async fn find_by_id(&self, id: &QueueId) -> Result<Option<DialQueue>> {
        Ok(self.queues.read().await.get(id).cloned())
    }

    async fn save(&self, queue: &DialQueue) -> Result<()> {
        self.queues.write().await.insert(queue.id, queue.clone());
        Ok(())
    }

    async fn find_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<DialQueue>> {
        let mut queues: Vec<_> = self
            .queues
            .read()
            .await
            .values()
            .filter(|q| &q.tenant_id == tenant_id)
            .cloned()
            .collect();
        queues.sort_by_key(|q| q.created_at);
        Ok(queues)
    }

    async fn find_active(&self) -> Result<Vec<DialQueue>> {
        let mut queues: Vec<_> = self
            .queues
            .read()
            .await
            .values()
            .filter(|q| matches!(q.status, QueueStatus::Running | QueueStatus::Paused))
            .cloned()
            .collect();
        queues.sort_by_key(|q| q.created_at);
        Ok(queues)
    }
}

/// Lead lookup backed by a map; stands in for the external lead store
#[derive(Default, Clone)]
pub struct InMemoryLeadStore {
    leads: Arc<RwLock<HashMap<LeadRef, Lead>>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, lead: Lead) {
        self.leads.write().await.insert(lead.lead_ref.clone(), lead);
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn find(&self, lead_ref: &LeadRef) -> Result<Option<Lead>> {
        Ok(self.leads.read().await.get(lead_ref).cloned())
    }

    async fn touch_last_contacted(&self, lead_ref: &LeadRef, at: DateTime<Utc>) -> Result<()> {
        let mut leads = self.leads.write().await;
        let lead = leads
            .get_mut(lead_ref)
            .ok_or_else(|| DomainError::NotFound(format!("Lead {}", lead_ref)))?;
        lead.last_contacted_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::disposition::Disposition;
    use crate::domain::shared::value_objects::PhoneNumber;
    use chrono::Duration;

    #[tokio::test]
    async fn test_unfinished_sessions_exclude_terminal() {
        let repo = InMemorySessionRepository::new();
        let session = CallSession::new(
            SessionId::from("s1"),
            TenantId::new(),
            PhoneNumber::parse("+14155550100").unwrap(),
            PhoneNumber::parse("+14155550101").unwrap(),
            None,
        );
        repo.save(&session).await.unwrap();

        assert_eq!(repo.find_unfinished().await.unwrap().len(), 1);
        assert_eq!(repo.find_by_tenant(&session.tenant_id()).await.unwrap().len(), 1);
        assert!(repo.find_by_tenant(&TenantId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_follow_ups_due_in_order() {
        let repo = InMemoryFollowUpRepository::new();
        let now = Utc::now();
        for hours in [5, 1, 3] {
            let follow_up = FollowUp::new(
                LeadRef::new(format!("lead-{}", hours)),
                SessionId::new(),
                now + Duration::hours(hours),
                Disposition::Callback,
                String::new(),
                "agent".to_string(),
                now,
            )
            .unwrap();
            repo.create(&follow_up).await.unwrap();
        }

        let due = repo.find_due(now + Duration::hours(4)).await.unwrap();
        assert_eq!(due.len(), 2);
        assert!(due[0].scheduled_for < due[1].scheduled_for);
    }

    #[tokio::test]
    async fn test_active_queues_skip_idle_and_completed() {
        let repo = InMemoryDialQueueRepository::new();
        let tenant_id = TenantId::new();
        let caller_id = PhoneNumber::parse("+14155550100").unwrap();

        let idle = DialQueue::new(tenant_id, "idle".to_string(), caller_id.clone());
        let mut running = DialQueue::new(tenant_id, "running".to_string(), caller_id.clone());
        running.enqueue(vec![LeadRef::new("a")]).unwrap();
        running.start().unwrap();
        let mut completed = DialQueue::new(tenant_id, "completed".to_string(), caller_id);
        completed.start().unwrap();

        for queue in [&idle, &running, &completed] {
            repo.save(queue).await.unwrap();
        }

        let active = repo.find_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, running.id);
    }

    #[tokio::test]
    async fn test_touch_unknown_lead() {
        let store = InMemoryLeadStore::new();
        let result = store
            .touch_last_contacted(&LeadRef::new("missing"), Utc::now())
            .await;
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }
}
