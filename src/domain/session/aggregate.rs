//! Call session aggregate root

use super::event::{SessionEvent, SessionEventKind};
use super::value_object::{FailureReason, SessionState};
use crate::domain::disposition::Disposition;
use crate::domain::ledger::ReservationHandle;
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{
    LeadRef, PhoneNumber, ProviderCallId, SessionId, TenantId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Call session aggregate root
///
/// Lifecycle of one outbound call from dial to disposition. Provider status
/// reports and operator commands both end up as method calls here; the
/// transition table in [`SessionState`] rejects anything out of order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    id: SessionId,
    tenant_id: TenantId,
    caller_id: PhoneNumber,
    callee_number: PhoneNumber,
    lead_ref: Option<LeadRef>,
    state: SessionState,
    provider_call_id: Option<ProviderCallId>,
    started_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    reserved_credits: u64,
    covered_seconds: u64,
    consumed_seconds: u64,
    muted: bool,
    disposition: Option<Disposition>,
    disposition_recorded_at: Option<DateTime<Utc>>,
    notes: String,
    tags: Vec<String>,
    end_requested_at: Option<DateTime<Utc>>,
    last_reported_duration: Option<u64>,
    /// Pending domain events
    #[serde(skip)]
    events: Vec<SessionEvent>,
}

impl CallSession {
    /// Create a new idle session
    pub fn new(
        id: SessionId,
        tenant_id: TenantId,
        caller_id: PhoneNumber,
        callee_number: PhoneNumber,
        lead_ref: Option<LeadRef>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            caller_id,
            callee_number,
            lead_ref,
            state: SessionState::Idle,
            provider_call_id: None,
            started_at: Utc::now(),
            connected_at: None,
            ended_at: None,
            reserved_credits: 0,
            covered_seconds: 0,
            consumed_seconds: 0,
            muted: false,
            disposition: None,
            disposition_recorded_at: None,
            notes: String::new(),
            tags: Vec::new(),
            end_requested_at: None,
            last_reported_duration: None,
            events: Vec::new(),
        }
    }

    /// Credits are held; the dial goes out next
    pub fn begin_connecting(&mut self, reservation: &ReservationHandle) -> Result<()> {
        if reservation.session_id != self.id {
            return Err(DomainError::InvalidOperation(format!(
                "Reservation belongs to session {}, not {}",
                reservation.session_id, self.id
            )));
        }

        self.transition_to(SessionState::Connecting)?;
        self.reserved_credits = reservation.amount;
        self.covered_seconds = reservation.covered_seconds;

        self.record_event(SessionEventKind::Connecting {
            reserved_credits: reservation.amount,
        });
        Ok(())
    }

    /// Remember the provider's id for this call
    pub fn attach_provider_call(&mut self, provider_call_id: ProviderCallId) -> Result<()> {
        if self.state != SessionState::Connecting {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot attach provider call in {:?}",
                self.state
            )));
        }
        self.provider_call_id = Some(provider_call_id);
        Ok(())
    }

    pub fn mark_ringing(&mut self) -> Result<()> {
        self.transition_to(SessionState::Ringing)?;
        self.record_event(SessionEventKind::Ringing);
        Ok(())
    }

    pub fn mark_connected(&mut self, connected_at: DateTime<Utc>) -> Result<()> {
        self.transition_to(SessionState::InProgress)?;
        self.connected_at = Some(connected_at);
        self.record_event(SessionEventKind::Connected { connected_at });
        Ok(())
    }

    /// The call never connected
    pub fn fail(&mut self, reason: FailureReason, at: DateTime<Utc>) -> Result<()> {
        self.transition_to(SessionState::Failed(reason.clone()))?;
        self.ended_at = Some(at);
        self.record_event(SessionEventKind::Failed { reason });
        Ok(())
    }

    /// Operator asked to hang up; the state changes once the provider confirms
    pub fn request_end(&mut self, at: DateTime<Utc>) -> Result<()> {
        if !self.state.is_live() {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot end a session in {:?}",
                self.state
            )));
        }
        if self.end_requested_at.is_none() {
            self.end_requested_at = Some(at);
        }
        Ok(())
    }

    /// Talk time is over
    ///
    /// `consumed_seconds` is computed from `connected_at`/`ended_at` unless
    /// a provider-reported duration is supplied.
    pub fn begin_disconnect(
        &mut self,
        ended_at: DateTime<Utc>,
        reported_seconds: Option<u64>,
    ) -> Result<u64> {
        self.transition_to(SessionState::Disconnecting)?;

        let connected_at = self.connected_at.unwrap_or(ended_at);
        let ended_at = ended_at.max(connected_at);
        self.ended_at = Some(ended_at);

        let elapsed = (ended_at - connected_at).num_seconds().max(0) as u64;
        self.consumed_seconds = reported_seconds.unwrap_or(elapsed);

        self.record_event(SessionEventKind::Disconnected {
            consumed_seconds: self.consumed_seconds,
        });
        Ok(self.consumed_seconds)
    }

    /// Credits are settled; the operator must categorise the call
    pub fn await_disposition(&mut self) -> Result<()> {
        self.transition_to(SessionState::AwaitingDisposition)?;
        self.record_event(SessionEventKind::AwaitingDisposition);
        Ok(())
    }

    /// Write-once: only valid while awaiting disposition
    ///
    /// `None` records a skipped disposition.
    pub fn record_disposition(
        &mut self,
        disposition: Option<Disposition>,
        notes: String,
        tags: Vec<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if self.state != SessionState::AwaitingDisposition {
            return Err(DomainError::InvalidStateTransition(format!(
                "Session {} cannot take a disposition in {:?}",
                self.id, self.state
            )));
        }

        self.transition_to(SessionState::Closed)?;
        self.disposition = disposition;
        self.disposition_recorded_at = Some(at);
        self.notes = notes;
        self.tags = tags;

        self.record_event(SessionEventKind::Closed { disposition });
        Ok(())
    }

    /// Flip the mute flag; only while talking
    pub fn toggle_mute(&mut self) -> Result<bool> {
        if self.state != SessionState::InProgress {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot mute a session in {:?}",
                self.state
            )));
        }
        self.muted = !self.muted;
        self.record_event(SessionEventKind::MuteChanged { muted: self.muted });
        Ok(self.muted)
    }

    /// Digits are forwarded verbatim; the only checks are state and non-empty input
    pub fn check_digits(&self, digits: &str) -> Result<()> {
        if self.state != SessionState::InProgress {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot send digits in {:?}",
                self.state
            )));
        }
        if digits.is_empty() {
            return Err(DomainError::ValidationError(
                "Digit sequence must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Keep the latest duration the provider reported
    pub fn note_reported_duration(&mut self, seconds: u64) {
        self.last_reported_duration = Some(seconds);
    }

    /// Best-known talk time when the provider cannot confirm the end
    pub fn best_known_duration(&self, now: DateTime<Utc>) -> u64 {
        if let Some(reported) = self.last_reported_duration {
            return reported;
        }
        self.connected_at
            .map(|connected| (now - connected).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// Genuine human pickup, judged from the disposition only
    pub fn is_human_pickup(&self) -> bool {
        self.disposition
            .map(|d| d.is_human_pickup())
            .unwrap_or(false)
    }

    /// Transition to a new state
    fn transition_to(&mut self, new_state: SessionState) -> Result<()> {
        if !self.state.can_transition_to(&new_state) {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot transition from {:?} to {:?}",
                self.state, new_state
            )));
        }

        self.state = new_state;
        Ok(())
    }

    fn record_event(&mut self, kind: SessionEventKind) {
        self.events
            .push(SessionEvent::new(self.id.clone(), self.tenant_id, kind));
    }

    /// Take all pending events
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // Getters
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn caller_id(&self) -> &PhoneNumber {
        &self.caller_id
    }

    pub fn callee_number(&self) -> &PhoneNumber {
        &self.callee_number
    }

    pub fn lead_ref(&self) -> Option<&LeadRef> {
        self.lead_ref.as_ref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn provider_call_id(&self) -> Option<&ProviderCallId> {
        self.provider_call_id.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn reserved_credits(&self) -> u64 {
        self.reserved_credits
    }

    pub fn covered_seconds(&self) -> u64 {
        self.covered_seconds
    }

    pub fn consumed_seconds(&self) -> u64 {
        self.consumed_seconds
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn disposition(&self) -> Option<Disposition> {
        self.disposition
    }

    pub fn disposition_recorded_at(&self) -> Option<DateTime<Utc>> {
        self.disposition_recorded_at
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn end_requested_at(&self) -> Option<DateTime<Utc>> {
        self.end_requested_at
    }

    pub fn last_reported_duration(&self) -> Option<u64> {
        self.last_reported_duration
    }

    /// Rebuild the handle that holds this session's credits
    pub fn reservation_handle(&self) -> ReservationHandle {
        ReservationHandle {
            tenant_id: self.tenant_id,
            session_id: self.id.clone(),
            amount: self.reserved_credits,
            covered_seconds: self.covered_seconds,
        }
    }
}
