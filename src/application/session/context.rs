//! State shared between the session manager and its actors

use super::actor::SessionCommand;
use crate::application::disposition::DispositionCapture;
use crate::application::events::{DialerEvent, EventBroadcaster};
use crate::application::ledger::CreditLedger;
use crate::domain::lead::LeadStore;
use crate::domain::session::{CallSession, SessionRepository, SessionState};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{PhoneNumber, ProviderCallId, SessionId, TenantId};
use crate::domain::telephony::{ProviderEvent, TelephonyProvider};
use metrics::gauge;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

/// Provider events held back before their dial registered
const MAX_UNROUTED_PER_CALL: usize = 16;
const UNROUTED_TTL: Duration = Duration::from_secs(120);

/// Session timing knobs
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Bound on the provider acknowledging a dial
    pub dial_timeout: Duration,
    /// How long an operator hang-up may wait for provider confirmation
    pub end_call_timeout: Duration,
    /// How long a finished call may wait for a disposition
    pub disposition_timeout: Duration,
    /// Per-session command channel depth
    pub command_buffer: usize,
    /// Estimate used when a caller does not give one
    pub default_max_call_seconds: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_millis(15_000),
            end_call_timeout: Duration::from_millis(10_000),
            disposition_timeout: Duration::from_secs(900),
            command_buffer: 64,
            default_max_call_seconds: 3600,
        }
    }
}

/// Live actors, provider routes and caller-id bookkeeping
#[derive(Default)]
pub(crate) struct Registry {
    pub live: HashMap<SessionId, mpsc::Sender<SessionCommand>>,
    pub routes: HashMap<ProviderCallId, SessionId>,
    unrouted: HashMap<ProviderCallId, Vec<(Instant, ProviderEvent)>>,
    caller_ids: HashMap<TenantId, HashSet<PhoneNumber>>,
    caller_ids_in_use: HashMap<(TenantId, PhoneNumber), SessionId>,
}

impl Registry {
    pub fn register_caller_id(&mut self, tenant_id: TenantId, number: PhoneNumber) -> bool {
        self.caller_ids.entry(tenant_id).or_default().insert(number)
    }

    pub fn unregister_caller_id(&mut self, tenant_id: TenantId, number: &PhoneNumber) -> bool {
        self.caller_ids
            .get_mut(&tenant_id)
            .map(|numbers| numbers.remove(number))
            .unwrap_or(false)
    }

    pub fn caller_ids(&self, tenant_id: &TenantId) -> Vec<PhoneNumber> {
        let mut numbers: Vec<_> = self
            .caller_ids
            .get(tenant_id)
            .map(|numbers| numbers.iter().cloned().collect())
            .unwrap_or_default();
        numbers.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        numbers
    }

    pub fn ensure_registered(&self, tenant_id: TenantId, number: &PhoneNumber) -> Result<()> {
        let registered = self
            .caller_ids
            .get(&tenant_id)
            .map(|numbers| numbers.contains(number))
            .unwrap_or(false);
        if !registered {
            return Err(DomainError::ValidationError(format!(
                "Caller id {} is not registered for tenant {}",
                number, tenant_id
            )));
        }
        Ok(())
    }

    /// Caller id must be registered and not held by another live session
    pub fn claim_caller_id(
        &mut self,
        tenant_id: TenantId,
        number: &PhoneNumber,
        session_id: &SessionId,
    ) -> Result<()> {
        self.ensure_registered(tenant_id, number)?;

        let key = (tenant_id, number.clone());
        if let Some(holder) = self.caller_ids_in_use.get(&key) {
            if holder != session_id {
                return Err(DomainError::Conflict(format!(
                    "Caller id {} is in use by session {}",
                    number, holder
                )));
            }
        }
        self.caller_ids_in_use.insert(key, session_id.clone());
        Ok(())
    }

    /// Re-take a caller id for a recovered session, whatever its registration
    pub fn force_claim_caller_id(
        &mut self,
        tenant_id: TenantId,
        number: &PhoneNumber,
        session_id: &SessionId,
    ) {
        self.caller_ids_in_use
            .insert((tenant_id, number.clone()), session_id.clone());
    }

    pub fn free_caller_id(&mut self, tenant_id: TenantId, number: &PhoneNumber, session_id: &SessionId) {
        let key = (tenant_id, number.clone());
        if self.caller_ids_in_use.get(&key) == Some(session_id) {
            self.caller_ids_in_use.remove(&key);
        }
    }

    pub fn buffer_unrouted(&mut self, event: ProviderEvent) {
        let now = Instant::now();
        self.unrouted.retain(|_, events| {
            events.retain(|(received, _)| now.duration_since(*received) < UNROUTED_TTL);
            !events.is_empty()
        });

        let events = self
            .unrouted
            .entry(event.provider_call_id.clone())
            .or_default();
        if events.len() >= MAX_UNROUTED_PER_CALL {
            warn!(
                "Dropping provider event {} for unknown call {}",
                event.status.as_str(),
                event.provider_call_id
            );
            return;
        }
        events.push((now, event));
    }

    pub fn take_unrouted(&mut self, provider_call_id: &ProviderCallId) -> Vec<ProviderEvent> {
        self.unrouted
            .remove(provider_call_id)
            .map(|events| events.into_iter().map(|(_, event)| event).collect())
            .unwrap_or_default()
    }

    pub fn sender_for_call(&self, provider_call_id: &ProviderCallId) -> Option<mpsc::Sender<SessionCommand>> {
        self.routes
            .get(provider_call_id)
            .and_then(|session_id| self.live.get(session_id))
            .cloned()
    }
}

pub(crate) struct SessionContext {
    pub ledger: Arc<CreditLedger>,
    pub provider: Arc<dyn TelephonyProvider>,
    pub sessions: Arc<dyn SessionRepository>,
    pub leads: Arc<dyn LeadStore>,
    pub dispositions: Arc<DispositionCapture>,
    pub events: EventBroadcaster,
    pub settings: SessionSettings,
    pub registry: Mutex<Registry>,
}

impl SessionContext {
    /// Save the session and publish what happened to it
    ///
    /// Events are published even when the save fails; the in-memory
    /// session stays authoritative and the next save catches up.
    /// Must not be called while holding the registry lock.
    pub async fn persist(&self, session: &mut CallSession) -> Result<()> {
        let events = session.take_events();
        let saved = self.sessions.save(session).await;
        if let Err(e) = &saved {
            error!("Failed to save session {}: {}", session.id(), e);
        }

        // A session past its call no longer holds the caller id
        if session.state() != &SessionState::Idle && !session.state().is_live() {
            self.free_caller_id(session).await;
        }

        for event in events {
            debug!("Session {} -> {}", event.session_id, event.kind.name());
            self.events.publish(DialerEvent::Session(event));
        }
        saved
    }

    /// Give the whole reservation back
    pub async fn release_reservation(&self, session: &CallSession) {
        if let Err(e) = self.ledger.release(&session.reservation_handle()).await {
            error!(
                "Failed to release reservation of session {}: {}",
                session.id(),
                e
            );
        }
    }

    pub async fn free_caller_id(&self, session: &CallSession) {
        self.registry.lock().await.free_caller_id(
            session.tenant_id(),
            session.caller_id(),
            session.id(),
        );
    }

    /// Forget a session that reached Closed or Failed
    pub async fn deregister(&self, session: &CallSession) {
        let count = {
            let mut registry = self.registry.lock().await;
            registry.live.remove(session.id());
            if let Some(provider_call_id) = session.provider_call_id() {
                registry.routes.remove(provider_call_id);
            }
            registry.free_caller_id(session.tenant_id(), session.caller_id(), session.id());
            registry.live.len()
        };
        self.live_sessions_changed(count);
    }

    pub fn live_sessions_changed(&self, count: usize) {
        gauge!("dialer_live_sessions").set(count as f64);
        self.events
            .publish(DialerEvent::LiveSessionsUpdated { count });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::telephony::ProviderCallStatus;
    use chrono::Utc;

    fn number(value: &str) -> PhoneNumber {
        PhoneNumber::parse(value).unwrap()
    }

    #[test]
    fn test_caller_id_must_be_registered() {
        let mut registry = Registry::default();
        let tenant = TenantId::new();

        let result = registry.claim_caller_id(tenant, &number("+14155550100"), &SessionId::from("s1"));
        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }

    #[test]
    fn test_caller_id_held_by_one_session() {
        let mut registry = Registry::default();
        let tenant = TenantId::new();
        let caller = number("+14155550100");
        registry.register_caller_id(tenant, caller.clone());

        registry.claim_caller_id(tenant, &caller, &SessionId::from("s1")).unwrap();
        assert!(matches!(
            registry.claim_caller_id(tenant, &caller, &SessionId::from("s2")),
            Err(DomainError::Conflict(_))
        ));

        // Another tenant's registration is independent
        let other = TenantId::new();
        registry.register_caller_id(other, caller.clone());
        registry.claim_caller_id(other, &caller, &SessionId::from("s3")).unwrap();

        registry.free_caller_id(tenant, &caller, &SessionId::from("s2"));
        assert!(registry.claim_caller_id(tenant, &caller, &SessionId::from("s2")).is_err());

        registry.free_caller_id(tenant, &caller, &SessionId::from("s1"));
        registry.claim_caller_id(tenant, &caller, &SessionId::from("s2")).unwrap();
    }

    #[test]
    fn test_unrouted_events_are_kept_in_order() {
        let mut registry = Registry::default();
        let call = ProviderCallId::new("pc-1");

        registry.buffer_unrouted(ProviderEvent::new(call.clone(), ProviderCallStatus::Ringing, Utc::now()));
        registry.buffer_unrouted(ProviderEvent::new(call.clone(), ProviderCallStatus::InProgress, Utc::now()));

        let drained = registry.take_unrouted(&call);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].status, ProviderCallStatus::Ringing);
        assert!(registry.take_unrouted(&call).is_empty());
    }

    #[test]
    fn test_unrouted_buffer_is_bounded() {
        let mut registry = Registry::default();
        let call = ProviderCallId::new("pc-2");
        for _ in 0..(MAX_UNROUTED_PER_CALL + 5) {
            registry.buffer_unrouted(ProviderEvent::new(call.clone(), ProviderCallStatus::Ringing, Utc::now()));
        }
        assert_eq!(registry.take_unrouted(&call).len(), MAX_UNROUTED_PER_CALL);
    }
}
