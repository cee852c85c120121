//! Call session manager
//!
//! Starts calls, routes provider events and operator commands to the
//! owning session actor, and answers snapshot queries.

use super::actor::{Reply, SessionActor, SessionCommand};
use super::context::{Registry, SessionContext, SessionSettings};
use crate::application::disposition::{DispositionCapture, DispositionOutcome, DispositionSubmission};
use crate::application::events::{DialerEvent, EventBroadcaster};
use crate::application::ledger::CreditLedger;
use crate::domain::lead::LeadStore;
use crate::domain::session::{CallSession, FailureReason, SessionRepository};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{LeadRef, PhoneNumber, SessionId, TenantId};
use crate::domain::telephony::{ProviderError, ProviderEvent, TelephonyProvider};
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Request to dial one number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartCallRequest {
    pub tenant_id: TenantId,
    pub caller_id: PhoneNumber,
    pub callee_number: PhoneNumber,
    #[serde(default)]
    pub lead_ref: Option<LeadRef>,
    #[serde(default)]
    pub estimated_max_seconds: Option<u64>,
    /// Pre-chosen id; generated when absent
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

impl StartCallRequest {
    pub fn new(tenant_id: TenantId, caller_id: PhoneNumber, callee_number: PhoneNumber) -> Self {
        Self {
            tenant_id,
            caller_id,
            callee_number,
            lead_ref: None,
            estimated_max_seconds: None,
            session_id: None,
        }
    }

    pub fn with_lead(mut self, lead_ref: LeadRef) -> Self {
        self.lead_ref = Some(lead_ref);
        self
    }

    pub fn with_estimate(mut self, seconds: u64) -> Self {
        self.estimated_max_seconds = Some(seconds);
        self
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

#[derive(Clone)]
pub struct CallSessionManager {
    ctx: Arc<SessionContext>,
}

impl CallSessionManager {
    pub fn new(
        ledger: Arc<CreditLedger>,
        provider: Arc<dyn TelephonyProvider>,
        sessions: Arc<dyn SessionRepository>,
        leads: Arc<dyn LeadStore>,
        dispositions: Arc<DispositionCapture>,
        events: EventBroadcaster,
        settings: SessionSettings,
    ) -> Self {
        Self {
            ctx: Arc::new(SessionContext {
                ledger,
                provider,
                sessions,
                leads,
                dispositions,
                events,
                settings,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.ctx.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DialerEvent> {
        self.ctx.events.subscribe()
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.ctx.ledger
    }

    pub fn leads(&self) -> &Arc<dyn LeadStore> {
        &self.ctx.leads
    }

    /// Allow a tenant to dial out from `number`
    pub async fn register_caller_id(&self, tenant_id: TenantId, number: PhoneNumber) -> bool {
        let added = self
            .ctx
            .registry
            .lock()
            .await
            .register_caller_id(tenant_id, number.clone());
        if added {
            info!("Registered caller id {} for tenant {}", number, tenant_id);
        }
        added
    }

    pub async fn unregister_caller_id(&self, tenant_id: TenantId, number: &PhoneNumber) -> bool {
        self.ctx
            .registry
            .lock()
            .await
            .unregister_caller_id(tenant_id, number)
    }

    /// ValidationError unless `number` is registered for the tenant
    pub async fn ensure_caller_id(&self, tenant_id: TenantId, number: &PhoneNumber) -> Result<()> {
        self.ctx
            .registry
            .lock()
            .await
            .ensure_registered(tenant_id, number)
    }

    pub async fn caller_ids(&self, tenant_id: &TenantId) -> Vec<PhoneNumber> {
        self.ctx.registry.lock().await.caller_ids(tenant_id)
    }

    pub async fn live_count(&self) -> usize {
        self.ctx.registry.lock().await.live.len()
    }

    /// Reserve credits, then ask the provider to dial
    ///
    /// Resolves once the provider acknowledged the dial. When the
    /// reservation fails the session never leaves Idle and is not stored.
    pub async fn start_call(&self, request: StartCallRequest) -> Result<CallSession> {
        let session_id = request.session_id.clone().unwrap_or_else(SessionId::new);

        {
            let mut registry = self.ctx.registry.lock().await;
            if registry.live.contains_key(&session_id) {
                return Err(DomainError::AlreadyExists(format!("Session {}", session_id)));
            }
            registry.claim_caller_id(request.tenant_id, &request.caller_id, &session_id)?;
        }

        match self.dial(request.clone(), session_id.clone()).await {
            Ok(session) => Ok(session),
            Err(e) => {
                self.ctx.registry.lock().await.free_caller_id(
                    request.tenant_id,
                    &request.caller_id,
                    &session_id,
                );
                Err(e)
            }
        }
    }

    async fn dial(&self, request: StartCallRequest, session_id: SessionId) -> Result<CallSession> {
        if self.ctx.sessions.find_by_id(&session_id).await?.is_some() {
            return Err(DomainError::AlreadyExists(format!("Session {}", session_id)));
        }

        let mut session = CallSession::new(
            session_id.clone(),
            request.tenant_id,
            request.caller_id.clone(),
            request.callee_number.clone(),
            request.lead_ref.clone(),
        );

        let estimated = request
            .estimated_max_seconds
            .unwrap_or(self.ctx.settings.default_max_call_seconds);
        let handle = self
            .ctx
            .ledger
            .reserve(request.tenant_id, &session_id, estimated)
            .await?;

        session.begin_connecting(&handle)?;
        if let Err(e) = self.ctx.persist(&mut session).await {
            self.ctx.release_reservation(&session).await;
            return Err(e);
        }

        info!(
            "Dialing {} from {} for session {} (tenant {})",
            request.callee_number, request.caller_id, session_id, request.tenant_id
        );

        let placed = tokio::time::timeout(
            self.ctx.settings.dial_timeout,
            self.ctx
                .provider
                .place_call(&request.caller_id, &request.callee_number),
        )
        .await;

        let provider_call_id = match placed {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                let reason = match &e {
                    ProviderError::Timeout => FailureReason::Timeout,
                    other => FailureReason::Rejected(other.to_string()),
                };
                self.abort_dial(&mut session, reason).await;
                return Err(e.into());
            }
            Err(_) => {
                self.abort_dial(&mut session, FailureReason::Timeout).await;
                return Err(DomainError::ProviderTimeout(format!(
                    "Dial for session {} not acknowledged within {:?}",
                    session_id, self.ctx.settings.dial_timeout
                )));
            }
        };

        session.attach_provider_call(provider_call_id.clone())?;
        let _ = self.ctx.persist(&mut session).await;

        if let Some(lead_ref) = session.lead_ref() {
            if let Err(e) = self.ctx.leads.touch_last_contacted(lead_ref, Utc::now()).await {
                warn!("Could not update last contact of lead {}: {}", lead_ref, e);
            }
        }

        counter!("dialer_calls_started_total").increment(1);
        info!(
            "Session {} dialing as provider call {}",
            session_id, provider_call_id
        );

        let snapshot = session.clone();
        self.spawn_actor(session).await;
        Ok(snapshot)
    }

    /// The dial never went out: fail the session and give the credits back
    async fn abort_dial(&self, session: &mut CallSession, reason: FailureReason) {
        warn!(
            "Dial for session {} failed: {}",
            session.id(),
            reason.as_str()
        );
        if let Err(e) = session.fail(reason.clone(), Utc::now()) {
            error!("Cannot fail session {}: {}", session.id(), e);
        }
        counter!("dialer_calls_failed_total", "reason" => reason.as_str()).increment(1);

        self.ctx.release_reservation(session).await;
        let _ = self.ctx.persist(session).await;
    }

    /// Start the owning task and route buffered provider events to it
    async fn spawn_actor(&self, session: CallSession) {
        let (tx, rx) = mpsc::channel(self.ctx.settings.command_buffer.max(1));
        let session_id = session.id().clone();
        let provider_call_id = session.provider_call_id().cloned();
        let actor = SessionActor::new(session, self.ctx.clone(), tx.clone(), rx);

        let count = {
            let mut registry = self.ctx.registry.lock().await;
            registry.live.insert(session_id.clone(), tx.clone());

            if let Some(provider_call_id) = provider_call_id {
                registry
                    .routes
                    .insert(provider_call_id.clone(), session_id.clone());

                for event in registry.take_unrouted(&provider_call_id) {
                    debug!(
                        "Replaying buffered {} for session {}",
                        event.status.as_str(),
                        session_id
                    );
                    let (reply, _) = oneshot::channel();
                    if tx.try_send(SessionCommand::Provider { event, reply }).is_err() {
                        warn!("Session {} inbox full, dropped a buffered event", session_id);
                    }
                }
            }
            registry.live.len()
        };

        self.ctx.live_sessions_changed(count);
        tokio::spawn(actor.run());
    }

    /// Feed one provider status report into the owning session
    ///
    /// Reports for calls that are not (yet) registered are buffered.
    pub async fn handle_provider_event(&self, event: ProviderEvent) -> Result<()> {
        let tx = {
            let mut registry = self.ctx.registry.lock().await;
            match registry.sender_for_call(&event.provider_call_id) {
                Some(tx) => tx,
                None => {
                    debug!(
                        "No session for provider call {} yet, buffering {}",
                        event.provider_call_id,
                        event.status.as_str()
                    );
                    registry.buffer_unrouted(event);
                    return Ok(());
                }
            }
        };

        let (reply, rx) = oneshot::channel();
        if tx.send(SessionCommand::Provider { event, reply }).await.is_err() {
            // Session finished meanwhile; late reports are no-ops
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Drain a provider event stream until it closes
    pub fn spawn_event_consumer(&self, mut events: mpsc::Receiver<ProviderEvent>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = manager.handle_provider_event(event).await {
                    warn!("Provider event rejected: {}", e);
                }
            }
            debug!("Provider event stream closed");
        })
    }

    async fn request<T>(
        &self,
        session_id: &SessionId,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T> {
        let tx = self.ctx.registry.lock().await.live.get(session_id).cloned();
        let Some(tx) = tx else {
            return Err(self.not_live(session_id).await);
        };

        let (reply, rx) = oneshot::channel();
        if tx.send(build(reply)).await.is_err() {
            return Err(self.not_live(session_id).await);
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self.not_live(session_id).await),
        }
    }

    /// Error for a command aimed at a session without a running actor
    async fn not_live(&self, session_id: &SessionId) -> DomainError {
        match self.ctx.sessions.find_by_id(session_id).await {
            Ok(Some(session)) => DomainError::InvalidStateTransition(format!(
                "Session {} is {}",
                session_id,
                session.state().as_str()
            )),
            Ok(None) => DomainError::NotFound(format!("Session {}", session_id)),
            Err(e) => e,
        }
    }

    /// Ask the provider to hang up; ending a finished session is a no-op
    pub async fn end_call(&self, session_id: &SessionId) -> Result<()> {
        match self
            .request(session_id, |reply| SessionCommand::EndCall { reply })
            .await
        {
            Err(DomainError::InvalidStateTransition(_)) => Ok(()),
            other => other,
        }
    }

    pub async fn toggle_mute(&self, session_id: &SessionId) -> Result<bool> {
        self.request(session_id, |reply| SessionCommand::ToggleMute { reply })
            .await
    }

    pub async fn send_digits(&self, session_id: &SessionId, digits: String) -> Result<()> {
        self.request(session_id, |reply| SessionCommand::SendDigits { digits, reply })
            .await
    }

    /// Write-once: a second submission is rejected
    pub async fn submit_disposition(
        &self,
        session_id: &SessionId,
        submission: DispositionSubmission,
    ) -> Result<DispositionOutcome> {
        self.request(session_id, |reply| SessionCommand::SubmitDisposition {
            submission,
            reply,
        })
        .await
    }

    pub async fn skip_disposition(
        &self,
        session_id: &SessionId,
        notes: Option<String>,
    ) -> Result<CallSession> {
        self.request(session_id, |reply| SessionCommand::SkipDisposition { notes, reply })
            .await
    }

    /// Current view of a session, live or archived
    pub async fn snapshot(&self, session_id: &SessionId) -> Result<CallSession> {
        match self
            .request(session_id, |reply| SessionCommand::Snapshot { reply })
            .await
        {
            Err(DomainError::InvalidStateTransition(_)) => self
                .ctx
                .sessions
                .find_by_id(session_id)
                .await?
                .ok_or_else(|| DomainError::NotFound(format!("Session {}", session_id))),
            other => other,
        }
    }

    pub async fn sessions_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<CallSession>> {
        self.ctx.sessions.find_by_tenant(tenant_id).await
    }

    /// Rehydrate unfinished sessions after a restart and reconcile them
    pub async fn recover(&self) -> Result<usize> {
        let unfinished = self.ctx.sessions.find_unfinished().await?;
        let mut recovered = Vec::new();

        for session in unfinished {
            if session.state() == &crate::domain::session::SessionState::Idle {
                continue;
            }
            {
                let mut registry = self.ctx.registry.lock().await;
                if registry.live.contains_key(session.id()) {
                    continue;
                }
                if session.state().is_live() {
                    registry.force_claim_caller_id(
                        session.tenant_id(),
                        session.caller_id(),
                        session.id(),
                    );
                }
            }

            info!(
                "Recovering session {} in {}",
                session.id(),
                session.state().as_str()
            );
            recovered.push(session.id().clone());
            self.spawn_actor(session).await;
        }

        for session_id in &recovered {
            if let Err(e) = self.reconcile(session_id).await {
                warn!("Reconcile of recovered session {} failed: {}", session_id, e);
            }
        }

        info!("Recovered {} sessions", recovered.len());
        Ok(recovered.len())
    }

    pub async fn reconcile(&self, session_id: &SessionId) -> Result<()> {
        self.request(session_id, |reply| SessionCommand::Reconcile { reply })
            .await
    }

    /// Reconcile every live session; returns how many succeeded
    pub async fn reconcile_all(&self) -> usize {
        let ids: Vec<SessionId> = self
            .ctx
            .registry
            .lock()
            .await
            .live
            .keys()
            .cloned()
            .collect();

        let mut reconciled = 0;
        for session_id in ids {
            match self.reconcile(&session_id).await {
                Ok(()) => reconciled += 1,
                Err(DomainError::InvalidStateTransition(_)) | Err(DomainError::NotFound(_)) => {}
                Err(e) => warn!("Reconcile of session {} failed: {}", session_id, e),
            }
        }
        reconciled
    }

    pub fn spawn_reconcile_loop(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reconciled = manager.reconcile_all().await;
                debug!("Reconciled {} live sessions", reconciled);
            }
        })
    }
}
