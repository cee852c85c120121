//! In-process telephony provider
//!
//! Keeps every placed call in memory. With a timing configured it drives
//! ringing, answer and hang-up on its own and emits the matching status
//! events on a channel, the way a real provider calls the webhook. Without
//! one the calls stay put until a caller moves them with `advance_call`,
//! and emitted events collect in a buffer read by `take_events`.

use crate::domain::shared::value_objects::{PhoneNumber, ProviderCallId};
use crate::domain::telephony::{
    ProviderCallReport, ProviderCallStatus, ProviderError, ProviderEvent, TelephonyProvider,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Timing of the automatic call lifecycle; all `None` means manual
#[derive(Debug, Clone, Default)]
pub struct SimulatedBehaviour {
    /// Delay between accepting the dial and reporting ringing
    pub ring_after: Option<Duration>,
    /// Delay between ringing and answer
    pub answer_after: Option<Duration>,
    /// Talk time before the far end hangs up
    pub complete_after: Option<Duration>,
    /// Delay before `place_call` returns
    pub place_delay: Option<Duration>,
}

impl SimulatedBehaviour {
    pub fn manual() -> Self {
        Self::default()
    }

    pub fn auto_answer(ring_after: Duration, answer_after: Duration) -> Self {
        Self {
            ring_after: Some(ring_after),
            answer_after: Some(answer_after),
            ..Default::default()
        }
    }

    fn drives_calls(&self) -> bool {
        self.ring_after.is_some() || self.answer_after.is_some()
    }
}

/// What the provider knows about one call
#[derive(Debug, Clone)]
pub struct SimulatedCall {
    pub id: ProviderCallId,
    pub caller_id: PhoneNumber,
    pub callee: PhoneNumber,
    pub status: ProviderCallStatus,
    pub placed_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub digits: String,
    pub muted: bool,
}

impl SimulatedCall {
    fn duration_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        let answered_at = self.answered_at?;
        let end = self.ended_at.unwrap_or(now);
        Some((end - answered_at).num_seconds().max(0) as u64)
    }
}

#[derive(Clone)]
pub struct SimulatedProvider {
    inner: Arc<Inner>,
}

struct Inner {
    behaviour: SimulatedBehaviour,
    /// Feeds the single task that forwards events to the sink in order
    outbox: Option<mpsc::UnboundedSender<ProviderEvent>>,
    calls: Mutex<HashMap<ProviderCallId, SimulatedCall>>,
    pending: Mutex<Vec<ProviderEvent>>,
    reject_next: Mutex<Option<String>>,
    sequence: AtomicU64,
}

impl SimulatedProvider {
    /// A provider whose calls only move when told to
    pub fn manual() -> Self {
        Self::build(SimulatedBehaviour::manual(), None)
    }

    /// A provider that emits status events on `sink`
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(behaviour: SimulatedBehaviour, sink: mpsc::Sender<ProviderEvent>) -> Self {
        let (outbox, mut queued) = mpsc::unbounded_channel::<ProviderEvent>();
        tokio::spawn(async move {
            while let Some(event) = queued.recv().await {
                if sink.send(event).await.is_err() {
                    warn!("Simulated provider event sink closed");
                    break;
                }
            }
        });
        Self::build(behaviour, Some(outbox))
    }

    fn build(
        behaviour: SimulatedBehaviour,
        outbox: Option<mpsc::UnboundedSender<ProviderEvent>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                behaviour,
                outbox,
                calls: Mutex::new(HashMap::new()),
                pending: Mutex::new(Vec::new()),
                reject_next: Mutex::new(None),
                sequence: AtomicU64::new(1),
            }),
        }
    }

    /// Make the next `place_call` fail with `Rejected(reason)`
    pub async fn reject_next(&self, reason: impl Into<String>) {
        *self.inner.reject_next.lock().await = Some(reason.into());
    }

    pub async fn call(&self, id: &ProviderCallId) -> Option<SimulatedCall> {
        self.inner.calls.lock().await.get(id).cloned()
    }

    /// Calls in placement order
    pub async fn calls(&self) -> Vec<SimulatedCall> {
        let mut calls: Vec<_> = self.inner.calls.lock().await.values().cloned().collect();
        calls.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        calls
    }

    /// Drop a call, as a provider does once its records expire
    pub async fn forget(&self, id: &ProviderCallId) -> bool {
        self.inner.calls.lock().await.remove(id).is_some()
    }

    /// Events emitted while no sink was attached
    pub async fn take_events(&self) -> Vec<ProviderEvent> {
        std::mem::take(&mut *self.inner.pending.lock().await)
    }

    /// Move a call to `status` and emit the event
    pub async fn advance_call(
        &self,
        id: &ProviderCallId,
        status: ProviderCallStatus,
    ) -> Result<ProviderEvent, ProviderError> {
        self.inner.transition(id, status).await
    }

    fn spawn_driver(&self, id: ProviderCallId) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let behaviour = inner.behaviour.clone();
            let steps = [
                (behaviour.ring_after, ProviderCallStatus::Ringing),
                (behaviour.answer_after, ProviderCallStatus::InProgress),
                (behaviour.complete_after, ProviderCallStatus::Completed),
            ];

            for (delay, status) in steps {
                let Some(delay) = delay else {
                    continue;
                };
                tokio::time::sleep(delay).await;
                match inner.transition(&id, status).await {
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Simulated call {} stopped driving: {}", id, e);
                        return;
                    }
                }
            }
        });
    }
}

impl Inner {
    /// Move a call and emit its event before the call table is unlocked
    ///
    /// Events of one call therefore leave in the order its status changed.
    async fn transition(
        &self,
        id: &ProviderCallId,
        status: ProviderCallStatus,
    ) -> Result<ProviderEvent, ProviderError> {
        let mut calls = self.calls.lock().await;
        let call = calls
            .get_mut(id)
            .ok_or_else(|| ProviderError::CallNotFound(id.clone()))?;

        if call.status.is_final() {
            return Err(ProviderError::Rejected(format!(
                "call already {}",
                call.status.as_str()
            )));
        }

        let now = Utc::now();
        call.status = status;
        if status == ProviderCallStatus::InProgress && call.answered_at.is_none() {
            call.answered_at = Some(now);
        }
        if status.is_final() {
            call.ended_at = Some(now);
        }

        debug!("Simulated call {} -> {}", id, status.as_str());

        let mut event = ProviderEvent::new(id.clone(), status, now);
        if status.is_final() {
            if let Some(seconds) = call.duration_seconds(now) {
                event = event.with_duration(seconds);
            }
        }
        self.emit(event.clone()).await;
        Ok(event)
    }

    /// Never waits on the sink, so a handler holding a call cannot block on its own webhook
    async fn emit(&self, event: ProviderEvent) {
        match &self.outbox {
            Some(outbox) => {
                if outbox.send(event).is_err() {
                    warn!("Simulated provider event sink closed");
                }
            }
            None => self.pending.lock().await.push(event),
        }
    }

    async fn live_call(&self, id: &ProviderCallId) -> Result<(), ProviderError> {
        let calls = self.calls.lock().await;
        match calls.get(id) {
            None => Err(ProviderError::CallNotFound(id.clone())),
            Some(call) if call.status.is_final() => Err(ProviderError::Rejected(format!(
                "call already {}",
                call.status.as_str()
            ))),
            Some(_) => Ok(()),
        }
    }
}

#[async_trait]
impl TelephonyProvider for SimulatedProvider {
    async fn place_call(
        &self,
        caller_id: &PhoneNumber,
        callee: &PhoneNumber,
    ) -> Result<ProviderCallId, ProviderError> {
        if let Some(reason) = self.inner.reject_next.lock().await.take() {
            info!("Simulated provider rejecting dial to {}: {}", callee, reason);
            return Err(ProviderError::Rejected(reason));
        }

        if let Some(delay) = self.inner.behaviour.place_delay {
            tokio::time::sleep(delay).await;
        }

        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let id = ProviderCallId::new(format!("SIM{:08}", sequence));
        let call = SimulatedCall {
            id: id.clone(),
            caller_id: caller_id.clone(),
            callee: callee.clone(),
            status: ProviderCallStatus::Queued,
            placed_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            digits: String::new(),
            muted: false,
        };
        self.inner.calls.lock().await.insert(id.clone(), call);

        info!("Simulated call {} placed from {} to {}", id, caller_id, callee);

        if self.inner.behaviour.drives_calls() {
            self.spawn_driver(id.clone());
        }
        Ok(id)
    }

    async fn send_digits(&self, call: &ProviderCallId, digits: &str) -> Result<(), ProviderError> {
        self.inner.live_call(call).await?;
        if let Some(c) = self.inner.calls.lock().await.get_mut(call) {
            c.digits.push_str(digits);
        }
        debug!("Simulated call {} received digits {}", call, digits);
        Ok(())
    }

    async fn set_muted(&self, call: &ProviderCallId, muted: bool) -> Result<(), ProviderError> {
        self.inner.live_call(call).await?;
        if let Some(c) = self.inner.calls.lock().await.get_mut(call) {
            c.muted = muted;
        }
        Ok(())
    }

    async fn hang_up(&self, call: &ProviderCallId) -> Result<(), ProviderError> {
        let status = match self.call(call).await {
            None => return Err(ProviderError::CallNotFound(call.clone())),
            Some(c) if c.status.is_final() => return Ok(()),
            Some(c) if c.status == ProviderCallStatus::InProgress => ProviderCallStatus::Completed,
            Some(_) => ProviderCallStatus::Canceled,
        };

        info!("Simulated call {} hung up", call);
        self.inner.transition(call, status).await?;
        Ok(())
    }

    async fn query_call(
        &self,
        call: &ProviderCallId,
    ) -> Result<Option<ProviderCallReport>, ProviderError> {
        let now = Utc::now();
        Ok(self
            .inner
            .calls
            .lock()
            .await
            .get(call)
            .map(|c| ProviderCallReport {
                status: c.status,
                duration_seconds: c.duration_seconds(now),
                checked_at: now,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(n: &str) -> PhoneNumber {
        PhoneNumber::parse(n).unwrap()
    }

    #[tokio::test]
    async fn test_manual_call_lifecycle() {
        let provider = SimulatedProvider::manual();
        let id = provider
            .place_call(&number("+14155550100"), &number("+14155550101"))
            .await
            .unwrap();

        provider
            .advance_call(&id, ProviderCallStatus::InProgress)
            .await
            .unwrap();
        provider.send_digits(&id, "12#").await.unwrap();
        provider.set_muted(&id, true).await.unwrap();
        provider.hang_up(&id).await.unwrap();

        let call = provider.call(&id).await.unwrap();
        assert_eq!(call.digits, "12#");
        assert!(call.muted);
        assert_eq!(call.status, ProviderCallStatus::Completed);

        let events = provider.take_events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].status, ProviderCallStatus::Completed);
        assert!(events[1].duration_seconds.is_some());
    }

    #[tokio::test]
    async fn test_hang_up_before_answer_cancels() {
        let provider = SimulatedProvider::manual();
        let id = provider
            .place_call(&number("+14155550100"), &number("+14155550101"))
            .await
            .unwrap();

        provider.hang_up(&id).await.unwrap();
        let events = provider.take_events().await;
        assert_eq!(events[0].status, ProviderCallStatus::Canceled);
        assert_eq!(events[0].duration_seconds, None);

        assert!(matches!(
            provider.send_digits(&id, "1").await,
            Err(ProviderError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_reject_next_applies_once() {
        let provider = SimulatedProvider::manual();
        provider.reject_next("carrier blocked").await;

        let first = provider
            .place_call(&number("+14155550100"), &number("+14155550101"))
            .await;
        assert!(matches!(first, Err(ProviderError::Rejected(_))));

        let second = provider
            .place_call(&number("+14155550100"), &number("+14155550101"))
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_forgotten_call_is_unknown() {
        let provider = SimulatedProvider::manual();
        let id = provider
            .place_call(&number("+14155550100"), &number("+14155550101"))
            .await
            .unwrap();

        assert!(provider.query_call(&id).await.unwrap().is_some());
        assert!(provider.forget(&id).await);
        assert!(provider.query_call(&id).await.unwrap().is_none());
        assert!(matches!(
            provider.hang_up(&id).await,
            Err(ProviderError::CallNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_auto_answer_emits_events() {
        let (tx, mut rx) = mpsc::channel(8);
        let provider = SimulatedProvider::new(
            SimulatedBehaviour::auto_answer(Duration::from_millis(5), Duration::from_millis(5)),
            tx,
        );
        provider
            .place_call(&number("+14155550100"), &number("+14155550101"))
            .await
            .unwrap();

        let ringing = rx.recv().await.unwrap();
        assert_eq!(ringing.status, ProviderCallStatus::Ringing);
        let answered = rx.recv().await.unwrap();
        assert_eq!(answered.status, ProviderCallStatus::InProgress);
    }

    #[tokio::test]
    async fn test_back_to_back_events_keep_order() {
        let (tx, mut rx) = mpsc::channel(64);
        let provider = SimulatedProvider::new(SimulatedBehaviour::manual(), tx);

        let mut ids = Vec::new();
        for _ in 0..10 {
            let id = provider
                .place_call(&number("+14155550100"), &number("+14155550101"))
                .await
                .unwrap();
            provider
                .advance_call(&id, ProviderCallStatus::Ringing)
                .await
                .unwrap();
            provider
                .advance_call(&id, ProviderCallStatus::InProgress)
                .await
                .unwrap();
            provider.hang_up(&id).await.unwrap();
            ids.push(id);
        }

        for id in &ids {
            for expected in [
                ProviderCallStatus::Ringing,
                ProviderCallStatus::InProgress,
                ProviderCallStatus::Completed,
            ] {
                let event = rx.recv().await.unwrap();
                assert_eq!(&event.provider_call_id, id);
                assert_eq!(event.status, expected);
            }
        }
        assert!(provider.take_events().await.is_empty());
    }
}
