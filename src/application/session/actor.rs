//! Per-session actor
//!
//! One task owns one `CallSession`. Provider events, operator commands and
//! timers all arrive on the same channel and are applied one at a time in
//! arrival order.

use super::context::SessionContext;
use crate::application::disposition::{DispositionOutcome, DispositionSubmission, AUTO_CLOSE_NOTE};
use crate::domain::session::{CallSession, FailureReason, SessionState};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::ProviderCallId;
use crate::domain::telephony::{ProviderCallStatus, ProviderError, ProviderEvent};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum SessionCommand {
    Provider {
        event: ProviderEvent,
        reply: Reply<()>,
    },
    EndCall {
        reply: Reply<()>,
    },
    ToggleMute {
        reply: Reply<bool>,
    },
    SendDigits {
        digits: String,
        reply: Reply<()>,
    },
    SubmitDisposition {
        submission: DispositionSubmission,
        reply: Reply<DispositionOutcome>,
    },
    SkipDisposition {
        notes: Option<String>,
        reply: Reply<CallSession>,
    },
    Snapshot {
        reply: Reply<CallSession>,
    },
    Reconcile {
        reply: Reply<()>,
    },
    /// Hang-up was requested and the provider never confirmed it
    EndTimeout,
    /// Talk time reached what the reservation covers
    CapReached,
    DispositionTimeout,
}

pub(crate) struct SessionActor {
    session: CallSession,
    ctx: Arc<SessionContext>,
    tx: mpsc::Sender<SessionCommand>,
    rx: mpsc::Receiver<SessionCommand>,
    end_timer: Option<JoinHandle<()>>,
    cap_timer: Option<JoinHandle<()>>,
    disposition_timer: Option<JoinHandle<()>>,
}

impl SessionActor {
    pub fn new(
        session: CallSession,
        ctx: Arc<SessionContext>,
        tx: mpsc::Sender<SessionCommand>,
        rx: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        Self {
            session,
            ctx,
            tx,
            rx,
            end_timer: None,
            cap_timer: None,
            disposition_timer: None,
        }
    }

    pub async fn run(mut self) {
        debug!("Session actor {} started in {}", self.session.id(), self.session.state().as_str());
        self.arm_timers_for_state();

        while let Some(command) = self.rx.recv().await {
            self.handle(command).await;

            if self.session.state().is_terminal() {
                break;
            }
        }

        self.cancel_timers();
        self.ctx.deregister(&self.session).await;
        debug!("Session actor {} stopped", self.session.id());
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Provider { event, reply } => {
                let result = self.on_provider_event(event).await;
                let _ = reply.send(result);
            }
            SessionCommand::EndCall { reply } => {
                let result = self.end_call().await;
                let _ = reply.send(result);
            }
            SessionCommand::ToggleMute { reply } => {
                let result = self.toggle_mute().await;
                let _ = reply.send(result);
            }
            SessionCommand::SendDigits { digits, reply } => {
                let result = self.send_digits(digits).await;
                let _ = reply.send(result);
            }
            SessionCommand::SubmitDisposition { submission, reply } => {
                let result = self.submit_disposition(submission).await;
                let _ = reply.send(result);
            }
            SessionCommand::SkipDisposition { notes, reply } => {
                let result = self.close_without_disposition(notes.unwrap_or_default()).await;
                let _ = reply.send(result);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.session.clone()));
            }
            SessionCommand::Reconcile { reply } => {
                let result = self.reconcile().await;
                let _ = reply.send(result);
            }
            SessionCommand::EndTimeout => {
                self.end_timer = None;
                if let Err(e) = self.on_end_timeout().await {
                    error!("Session {} end timeout: {}", self.session.id(), e);
                }
            }
            SessionCommand::CapReached => {
                self.cap_timer = None;
                if self.session.state() == &SessionState::InProgress {
                    info!(
                        "Session {} used its {}s of reserved talk time, hanging up",
                        self.session.id(),
                        self.session.covered_seconds()
                    );
                    if let Err(e) = self.end_call().await {
                        warn!("Session {} cap hang-up failed: {}", self.session.id(), e);
                    }
                }
            }
            SessionCommand::DispositionTimeout => {
                self.disposition_timer = None;
                if self.session.state() == &SessionState::AwaitingDisposition {
                    info!("Session {} disposition timed out", self.session.id());
                    if let Err(e) = self.close_without_disposition(AUTO_CLOSE_NOTE.to_string()).await {
                        error!("Session {} auto-close failed: {}", self.session.id(), e);
                    }
                }
            }
        }
    }

    async fn on_provider_event(&mut self, event: ProviderEvent) -> Result<()> {
        if let Some(seconds) = event.duration_seconds {
            self.session.note_reported_duration(seconds);
        }

        let state = self.session.state().clone();
        match (event.status, &state) {
            (ProviderCallStatus::Queued | ProviderCallStatus::Initiated, _) => Ok(()),

            (ProviderCallStatus::Ringing, SessionState::Connecting) => {
                self.session.mark_ringing()?;
                info!("Session {} ringing", self.session.id());
                self.persist().await;
                Ok(())
            }

            (
                ProviderCallStatus::InProgress,
                SessionState::Connecting | SessionState::Ringing,
            ) => {
                self.session.mark_connected(event.timestamp)?;
                info!("Session {} connected", self.session.id());
                self.persist().await;
                self.arm_cap_timer();
                Ok(())
            }

            (status, SessionState::Connecting | SessionState::Ringing) if status.is_final() => {
                self.fail(failure_reason(status), event.timestamp).await
            }

            (status, SessionState::InProgress) if status.is_final() => {
                self.finish_call(event.timestamp, event.duration_seconds).await
            }

            (status, state) => {
                debug!(
                    "Ignoring provider {} for session {} in {}",
                    status.as_str(),
                    self.session.id(),
                    state.as_str()
                );
                Ok(())
            }
        }
    }

    /// Talk time is over: settle credits and wait for the operator
    async fn finish_call(&mut self, ended_at: DateTime<Utc>, reported: Option<u64>) -> Result<()> {
        abort(&mut self.cap_timer);
        abort(&mut self.end_timer);

        let consumed = self.session.begin_disconnect(ended_at, reported)?;
        info!("Session {} disconnected after {}s", self.session.id(), consumed);
        self.persist().await;

        self.settle().await
    }

    /// Commit the reservation, then move to AwaitingDisposition
    ///
    /// A failed commit leaves the session Disconnecting; reconciliation
    /// retries it.
    async fn settle(&mut self) -> Result<()> {
        let handle = self.session.reservation_handle();
        if let Err(e) = self
            .ctx
            .ledger
            .commit(&handle, self.session.consumed_seconds())
            .await
        {
            error!(
                "Commit failed for session {}, will retry on reconcile: {}",
                self.session.id(),
                e
            );
            return Ok(());
        }

        self.session.await_disposition()?;
        self.persist().await;
        self.arm_disposition_timer(self.ctx.settings.disposition_timeout);
        Ok(())
    }

    async fn fail(&mut self, reason: FailureReason, at: DateTime<Utc>) -> Result<()> {
        abort(&mut self.end_timer);

        self.session.fail(reason.clone(), at)?;
        warn!("Session {} failed: {}", self.session.id(), reason.as_str());
        counter!("dialer_calls_failed_total", "reason" => reason.as_str()).increment(1);

        // Credits are back before anyone hears about the failure
        self.ctx.release_reservation(&self.session).await;
        self.persist().await;
        Ok(())
    }

    /// Cooperative hang-up; the state only moves once the provider confirms
    async fn end_call(&mut self) -> Result<()> {
        if !self.session.state().is_live() {
            return Ok(());
        }

        let first_request = self.session.end_requested_at().is_none();
        self.session.request_end(Utc::now())?;
        if first_request {
            info!("End requested for session {}", self.session.id());
            self.persist().await;
            let delay = self.ctx.settings.end_call_timeout;
            self.end_timer = Some(self.schedule(delay, SessionCommand::EndTimeout));
        }

        let Some(provider_call_id) = self.session.provider_call_id().cloned() else {
            return Ok(());
        };
        match self.ctx.provider.hang_up(&provider_call_id).await {
            Ok(()) => Ok(()),
            Err(ProviderError::CallNotFound(_)) => self.on_provider_gone().await,
            Err(e) => {
                warn!("Hang-up of session {} failed: {}", self.session.id(), e);
                Err(e.into())
            }
        }
    }

    async fn on_end_timeout(&mut self) -> Result<()> {
        let now = Utc::now();
        match self.session.state().clone() {
            SessionState::InProgress => {
                let seconds = self.session.best_known_duration(now);
                warn!(
                    "Provider never confirmed hang-up of session {}, forcing disconnect at {}s",
                    self.session.id(),
                    seconds
                );
                self.finish_call(now, Some(seconds)).await
            }
            SessionState::Connecting | SessionState::Ringing => {
                warn!(
                    "Provider never confirmed cancel of session {}",
                    self.session.id()
                );
                self.fail(FailureReason::Canceled, now).await
            }
            _ => Ok(()),
        }
    }

    /// The provider no longer knows the call
    async fn on_provider_gone(&mut self) -> Result<()> {
        let now = Utc::now();
        match self.session.state().clone() {
            SessionState::InProgress => {
                let seconds = self.session.best_known_duration(now);
                self.finish_call(now, Some(seconds)).await
            }
            SessionState::Connecting | SessionState::Ringing => {
                let reason = if self.session.end_requested_at().is_some() {
                    FailureReason::Canceled
                } else {
                    FailureReason::NoAnswer
                };
                self.fail(reason, now).await
            }
            _ => Ok(()),
        }
    }

    async fn toggle_mute(&mut self) -> Result<bool> {
        let muted = self.session.toggle_mute()?;
        let provider_call_id = self.provider_call_id()?;

        if let Err(e) = self.ctx.provider.set_muted(&provider_call_id, muted).await {
            self.session.toggle_mute()?;
            self.persist().await;
            return Err(e.into());
        }

        debug!("Session {} muted={}", self.session.id(), muted);
        self.persist().await;
        Ok(muted)
    }

    async fn send_digits(&mut self, digits: String) -> Result<()> {
        self.session.check_digits(&digits)?;
        let provider_call_id = self.provider_call_id()?;
        self.ctx
            .provider
            .send_digits(&provider_call_id, &digits)
            .await?;
        debug!("Session {} sent {} digits", self.session.id(), digits.len());
        Ok(())
    }

    async fn submit_disposition(&mut self, submission: DispositionSubmission) -> Result<DispositionOutcome> {
        if self.session.state() != &SessionState::AwaitingDisposition {
            return Err(DomainError::InvalidStateTransition(format!(
                "Session {} cannot take a disposition in {}",
                self.session.id(),
                self.session.state().as_str()
            )));
        }

        let now = Utc::now();
        let follow_up = self
            .ctx
            .dispositions
            .schedule_follow_up(&self.session, &submission, now)
            .await?;

        self.session.record_disposition(
            Some(submission.disposition),
            submission.notes,
            submission.tags,
            now,
        )?;
        abort(&mut self.disposition_timer);

        info!(
            "Session {} closed with disposition {}",
            self.session.id(),
            submission.disposition
        );
        self.persist().await;

        Ok(DispositionOutcome {
            session: self.session.clone(),
            follow_up,
        })
    }

    async fn close_without_disposition(&mut self, notes: String) -> Result<CallSession> {
        self.session
            .record_disposition(None, notes, Vec::new(), Utc::now())?;
        abort(&mut self.disposition_timer);

        info!("Session {} closed without disposition", self.session.id());
        self.persist().await;
        Ok(self.session.clone())
    }

    /// Bring the session in line with the provider's view of the call
    async fn reconcile(&mut self) -> Result<()> {
        match self.session.state().clone() {
            SessionState::Connecting | SessionState::Ringing | SessionState::InProgress => {
                let Some(provider_call_id) = self.session.provider_call_id().cloned() else {
                    warn!(
                        "Session {} has no provider call, the dial was never acknowledged",
                        self.session.id()
                    );
                    return self.fail(FailureReason::Timeout, Utc::now()).await;
                };

                match self.ctx.provider.query_call(&provider_call_id).await {
                    Ok(Some(report)) => {
                        let mut event =
                            ProviderEvent::new(provider_call_id, report.status, report.checked_at);
                        event.duration_seconds = report.duration_seconds;
                        self.on_provider_event(event).await
                    }
                    Ok(None) | Err(ProviderError::CallNotFound(_)) => {
                        info!(
                            "Provider no longer knows call {} of session {}",
                            provider_call_id,
                            self.session.id()
                        );
                        self.on_provider_gone().await
                    }
                    Err(e) => {
                        warn!("Reconcile of session {} failed: {}", self.session.id(), e);
                        Err(e.into())
                    }
                }
            }
            SessionState::Disconnecting => self.settle().await,
            _ => Ok(()),
        }
    }

    fn provider_call_id(&self) -> Result<ProviderCallId> {
        self.session.provider_call_id().cloned().ok_or_else(|| {
            DomainError::Internal(format!("Session {} has no provider call", self.session.id()))
        })
    }

    async fn persist(&mut self) {
        // Logged inside; the in-memory session stays authoritative
        let _ = self.ctx.persist(&mut self.session).await;
    }

    /// Timers a freshly spawned (or recovered) actor must run
    fn arm_timers_for_state(&mut self) {
        match self.session.state() {
            SessionState::InProgress => self.arm_cap_timer(),
            SessionState::AwaitingDisposition => {
                let elapsed = self
                    .session
                    .ended_at()
                    .map(|ended| (Utc::now() - ended).to_std().unwrap_or_default())
                    .unwrap_or_default();
                let remaining = self
                    .ctx
                    .settings
                    .disposition_timeout
                    .saturating_sub(elapsed);
                self.arm_disposition_timer(remaining);
            }
            _ => {}
        }

        if self.session.state().is_live() && self.session.end_requested_at().is_some() {
            let delay = self.ctx.settings.end_call_timeout;
            self.end_timer = Some(self.schedule(delay, SessionCommand::EndTimeout));
        }
    }

    fn arm_cap_timer(&mut self) {
        let talked = self
            .session
            .connected_at()
            .map(|connected| (Utc::now() - connected).num_seconds().max(0) as u64)
            .unwrap_or(0);
        let remaining = self.session.covered_seconds().saturating_sub(talked);

        abort(&mut self.cap_timer);
        self.cap_timer = Some(self.schedule(Duration::from_secs(remaining), SessionCommand::CapReached));
    }

    fn arm_disposition_timer(&mut self, delay: Duration) {
        abort(&mut self.disposition_timer);
        self.disposition_timer = Some(self.schedule(delay, SessionCommand::DispositionTimeout));
    }

    fn schedule(&self, delay: Duration, command: SessionCommand) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(command).await;
        })
    }

    fn cancel_timers(&mut self) {
        abort(&mut self.end_timer);
        abort(&mut self.cap_timer);
        abort(&mut self.disposition_timer);
    }
}

fn abort(timer: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = timer.take() {
        handle.abort();
    }
}

/// Final provider status of a call that never connected
fn failure_reason(status: ProviderCallStatus) -> FailureReason {
    match status {
        ProviderCallStatus::Busy => FailureReason::Busy,
        ProviderCallStatus::Canceled => FailureReason::Canceled,
        ProviderCallStatus::Failed => {
            FailureReason::Rejected("provider reported failure".to_string())
        }
        // Completed without ever connecting
        _ => FailureReason::NoAnswer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(failure_reason(ProviderCallStatus::Busy), FailureReason::Busy);
        assert_eq!(failure_reason(ProviderCallStatus::NoAnswer), FailureReason::NoAnswer);
        assert_eq!(failure_reason(ProviderCallStatus::Completed), FailureReason::NoAnswer);
        assert_eq!(failure_reason(ProviderCallStatus::Canceled), FailureReason::Canceled);
        assert!(matches!(
            failure_reason(ProviderCallStatus::Failed),
            FailureReason::Rejected(_)
        ));
    }
}
