//! Power dialer sequencer
//!
//! Dials a queue's leads one after another. The next call starts only once
//! the previous session reached Closed or Failed, which the dialer learns
//! from the session event stream. A queue loaded from storage has its
//! in-flight session checked first, so a call that ended while no process
//! was watching still advances the queue.

use crate::application::disposition::DispositionCapture;
use crate::application::events::{DialerEvent, EventBroadcaster};
use crate::application::session::{CallSessionManager, StartCallRequest};
use crate::domain::dialer::{DialQueue, DialQueueRepository};
use crate::domain::lead::LeadStore;
use crate::domain::reporting::SessionReport;
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{LeadRef, PhoneNumber, QueueId, SessionId, TenantId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct PowerDialer {
    inner: Arc<DialerInner>,
}

struct DialerInner {
    sessions: CallSessionManager,
    leads: Arc<dyn LeadStore>,
    queues: Arc<dyn DialQueueRepository>,
    dispositions: Arc<DispositionCapture>,
    events: EventBroadcaster,
    estimated_max_seconds: u64,
    active: Mutex<HashMap<QueueId, Arc<Mutex<DialQueue>>>>,
    by_session: Mutex<HashMap<SessionId, QueueId>>,
}

impl PowerDialer {
    pub fn new(
        sessions: CallSessionManager,
        leads: Arc<dyn LeadStore>,
        queues: Arc<dyn DialQueueRepository>,
        dispositions: Arc<DispositionCapture>,
        estimated_max_seconds: u64,
    ) -> Self {
        let events = sessions.events().clone();
        Self {
            inner: Arc::new(DialerInner {
                sessions,
                leads,
                queues,
                dispositions,
                events,
                estimated_max_seconds,
                active: Mutex::new(HashMap::new()),
                by_session: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Watch session events and advance queues when their call ends
    ///
    /// Subscribes before returning, so no terminal event published after
    /// this call is missed.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let mut rx = self.inner.events.subscribe();
        let dialer = self.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(DialerEvent::Session(event)) if event.is_terminal() => {
                        dialer.on_session_finished(&event.session_id).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Power dialer missed {} events, resyncing", missed);
                        dialer.resync().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Power dialer listener stopped");
        })
    }

    /// Reload running and paused queues after a restart
    ///
    /// Call once the session manager has recovered its sessions. Returns the
    /// number of queues loaded.
    pub async fn recover(&self) -> Result<usize> {
        let queues = self.inner.queues.find_active().await?;
        let count = queues.len();

        for queue in queues {
            let queue_id = queue.id;
            let (_, stalled) = self.adopt(queue).await?;
            if stalled {
                self.advance(&queue_id).await;
            }
        }

        info!("Recovered {} dial queues", count);
        Ok(count)
    }

    pub async fn create_queue(
        &self,
        tenant_id: TenantId,
        name: String,
        caller_id: PhoneNumber,
    ) -> Result<DialQueue> {
        self.inner
            .sessions
            .ensure_caller_id(tenant_id, &caller_id)
            .await?;

        let queue = DialQueue::new(tenant_id, name, caller_id);
        self.inner.queues.save(&queue).await?;

        info!("Created dial queue {} for tenant {}", queue.id, tenant_id);
        self.inner
            .active
            .lock()
            .await
            .insert(queue.id, Arc::new(Mutex::new(queue.clone())));
        Ok(queue)
    }

    pub async fn enqueue(&self, queue_id: &QueueId, leads: Vec<LeadRef>) -> Result<usize> {
        let requested = leads.len();
        let added = self.with_queue(queue_id, |queue| queue.enqueue(leads)).await?;
        info!(
            "Queue {}: enqueued {} of {} leads",
            queue_id, added, requested
        );
        Ok(added)
    }

    pub async fn start(&self, queue_id: &QueueId) -> Result<DialQueue> {
        self.ensure_caller_id(queue_id).await?;
        self.with_queue(queue_id, |queue| queue.start()).await?;
        self.advance(queue_id).await;
        self.snapshot(queue_id).await
    }

    /// Takes effect once the in-flight call is over
    pub async fn pause(&self, queue_id: &QueueId) -> Result<DialQueue> {
        self.with_queue(queue_id, |queue| queue.pause()).await?;
        self.snapshot(queue_id).await
    }

    pub async fn resume(&self, queue_id: &QueueId) -> Result<DialQueue> {
        self.ensure_caller_id(queue_id).await?;
        self.with_queue(queue_id, |queue| queue.resume()).await?;
        self.advance(queue_id).await;
        self.snapshot(queue_id).await
    }

    /// Mark the current lead attempted without calling it
    pub async fn skip(&self, queue_id: &QueueId, reason: String) -> Result<LeadRef> {
        let events = self.inner.events.clone();
        let skipped = self
            .with_queue(queue_id, |queue| {
                let lead_ref = queue.skip(reason.clone())?;
                events.publish(DialerEvent::QueueEntrySkipped {
                    queue_id: queue.id,
                    lead_ref: lead_ref.clone(),
                    reason,
                });
                Ok(lead_ref)
            })
            .await?;

        info!("Queue {}: skipped lead {}", queue_id, skipped);
        self.advance(queue_id).await;
        Ok(skipped)
    }

    pub async fn remove(&self, queue_id: &QueueId, lead_ref: &LeadRef) -> Result<()> {
        self.with_queue(queue_id, |queue| queue.remove(lead_ref).map(|_| ()))
            .await?;
        info!("Queue {}: removed lead {}", queue_id, lead_ref);
        Ok(())
    }

    pub async fn snapshot(&self, queue_id: &QueueId) -> Result<DialQueue> {
        let queue = self.queue_handle(queue_id).await?;
        let snapshot = queue.lock().await.clone();
        Ok(snapshot)
    }

    pub async fn queues_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<DialQueue>> {
        self.inner.queues.find_by_tenant(tenant_id).await
    }

    /// Outcome statistics for the sessions this queue placed
    pub async fn report(&self, queue_id: &QueueId) -> Result<SessionReport> {
        let queue = self.snapshot(queue_id).await?;

        let mut sessions = Vec::new();
        let mut follow_ups = Vec::new();
        for entry in &queue.entries {
            let Some(session_id) = &entry.last_session_ref else {
                continue;
            };
            match self.inner.sessions.snapshot(session_id).await {
                Ok(session) => sessions.push(session),
                Err(DomainError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
            follow_ups.extend(
                self.inner
                    .dispositions
                    .follow_ups_for(&entry.lead_ref)
                    .await?
                    .into_iter()
                    .filter(|f| &f.session_id == session_id),
            );
        }

        Ok(SessionReport::from_sessions(&sessions, &follow_ups))
    }

    async fn ensure_caller_id(&self, queue_id: &QueueId) -> Result<()> {
        let queue = self.snapshot(queue_id).await?;
        self.inner
            .sessions
            .ensure_caller_id(queue.tenant_id, &queue.caller_id)
            .await
    }

    async fn queue_handle(&self, queue_id: &QueueId) -> Result<Arc<Mutex<DialQueue>>> {
        if let Some(queue) = self.inner.active.lock().await.get(queue_id) {
            return Ok(queue.clone());
        }

        let queue = self
            .inner
            .queues
            .find_by_id(queue_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("Dial queue {}", queue_id)))?;

        let (handle, stalled) = self.adopt(queue).await?;
        if stalled {
            self.spawn_advance(*queue_id);
        }
        Ok(handle)
    }

    /// Make a stored queue active, settling an in-flight call that is over
    ///
    /// Returns the handle and whether the queue could dial but nothing is
    /// in flight.
    async fn adopt(&self, mut queue: DialQueue) -> Result<(Arc<Mutex<DialQueue>>, bool)> {
        let mut active = self.inner.active.lock().await;
        if let Some(handle) = active.get(&queue.id) {
            return Ok((handle.clone(), false));
        }

        let before = queue.status;
        if self.settle_stale_flight(&mut queue).await? {
            self.inner.queues.save(&queue).await?;
            if queue.status != before {
                self.inner.events.publish(DialerEvent::QueueStatusChanged {
                    queue_id: queue.id,
                    status: queue.status,
                });
            }
        }

        let queue_id = queue.id;
        let stalled = queue.next_to_dial().is_some();
        let handle = Arc::new(Mutex::new(queue));
        active.insert(queue_id, handle.clone());
        Ok((handle, stalled))
    }

    /// Close out the in-flight entry of a freshly loaded queue if its session ended
    ///
    /// The session is registered before its state is read, so a terminal
    /// event published in between still reaches the listener.
    async fn settle_stale_flight(&self, queue: &mut DialQueue) -> Result<bool> {
        let Some(flight) = queue.in_flight.clone() else {
            return Ok(false);
        };
        self.inner
            .by_session
            .lock()
            .await
            .insert(flight.session_id.clone(), queue.id);

        let note = match self.inner.sessions.snapshot(&flight.session_id).await {
            Ok(session) if session.state().is_terminal() => None,
            Ok(_) => return Ok(false),
            // Claimed but never stored: the process stopped mid-dial
            Err(DomainError::NotFound(_)) => Some("dial lost on restart".to_string()),
            Err(e) => return Err(e),
        };

        self.inner.by_session.lock().await.remove(&flight.session_id);
        let settled = queue.complete_dial(&flight.session_id, note);
        if settled {
            info!(
                "Queue {}: session {} ended while the queue was unloaded",
                queue.id, flight.session_id
            );
        }
        Ok(settled)
    }

    fn spawn_advance(&self, queue_id: QueueId) {
        let dialer = self.clone();
        tokio::spawn(async move {
            dialer.advance(&queue_id).await;
        });
    }

    /// Mutate a queue under its lock and save it
    async fn with_queue<R>(
        &self,
        queue_id: &QueueId,
        f: impl FnOnce(&mut DialQueue) -> Result<R>,
    ) -> Result<R> {
        let handle = self.queue_handle(queue_id).await?;
        let mut queue = handle.lock().await;

        let before = queue.status;
        let result = f(&mut queue)?;
        self.inner.queues.save(&queue).await?;

        if queue.status != before {
            info!(
                "Queue {}: {} -> {}",
                queue.id,
                before.as_str(),
                queue.status.as_str()
            );
            self.inner.events.publish(DialerEvent::QueueStatusChanged {
                queue_id: queue.id,
                status: queue.status,
            });
        }
        Ok(result)
    }

    /// Start calls until one is in flight or the queue cannot dial
    ///
    /// A lead that cannot be dialled counts as attempted and the loop moves
    /// on to the next one.
    async fn advance(&self, queue_id: &QueueId) {
        loop {
            // An unregistered caller id would fail every lead; hold the queue instead
            if let Err(e) = self.ensure_caller_id(queue_id).await {
                warn!("Queue {} cannot advance: {}", queue_id, e);
                return;
            }

            let session_id = SessionId::new();
            let claimed = self
                .with_queue(queue_id, |queue| {
                    let Some(lead_ref) = queue.next_to_dial() else {
                        return Ok(None);
                    };
                    queue.begin_dial(&lead_ref, session_id.clone())?;
                    Ok(Some((lead_ref, queue.tenant_id, queue.caller_id.clone())))
                })
                .await;

            let (lead_ref, tenant_id, caller_id) = match claimed {
                Ok(Some(claim)) => claim,
                Ok(None) => return,
                Err(e) => {
                    warn!("Queue {} cannot advance: {}", queue_id, e);
                    return;
                }
            };

            self.inner
                .by_session
                .lock()
                .await
                .insert(session_id.clone(), *queue_id);

            match self
                .dial_lead(tenant_id, caller_id, &lead_ref, session_id.clone())
                .await
            {
                Ok(()) => {
                    info!(
                        "Queue {}: dialing lead {} as session {}",
                        queue_id, lead_ref, session_id
                    );
                    self.inner.events.publish(DialerEvent::QueueAdvanced {
                        queue_id: *queue_id,
                        lead_ref,
                        session_id,
                    });
                    return;
                }
                Err(e) => {
                    warn!(
                        "Queue {}: lead {} could not be dialled: {}",
                        queue_id, lead_ref, e
                    );
                    self.finish_entry(queue_id, &session_id, Some(format!("dial failed: {}", e)))
                        .await;
                }
            }
        }
    }

    async fn dial_lead(
        &self,
        tenant_id: TenantId,
        caller_id: PhoneNumber,
        lead_ref: &LeadRef,
        session_id: SessionId,
    ) -> Result<()> {
        let lead = self
            .inner
            .leads
            .find(lead_ref)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("Lead {}", lead_ref)))?;

        let request = StartCallRequest::new(tenant_id, caller_id, lead.phone_number)
            .with_lead(lead_ref.clone())
            .with_estimate(self.inner.estimated_max_seconds)
            .with_session_id(session_id);
        self.inner.sessions.start_call(request).await?;
        Ok(())
    }

    /// Record the end of the in-flight entry; repeated calls are harmless
    async fn finish_entry(&self, queue_id: &QueueId, session_id: &SessionId, note: Option<String>) -> bool {
        self.inner.by_session.lock().await.remove(session_id);

        let result = self
            .with_queue(queue_id, |queue| Ok(queue.complete_dial(session_id, note)))
            .await;
        match result {
            Ok(completed) => completed,
            Err(e) => {
                warn!("Queue {}: cannot record end of {}: {}", queue_id, session_id, e);
                false
            }
        }
    }

    async fn on_session_finished(&self, session_id: &SessionId) {
        let queue_id = self.inner.by_session.lock().await.get(session_id).copied();
        let Some(queue_id) = queue_id else {
            return;
        };

        if self.finish_entry(&queue_id, session_id, None).await {
            debug!("Queue {}: session {} finished", queue_id, session_id);
            self.advance(&queue_id).await;
        }
    }

    /// Catch up on sessions that ended while events were missed
    async fn resync(&self) {
        let in_flight: Vec<SessionId> = self
            .inner
            .by_session
            .lock()
            .await
            .keys()
            .cloned()
            .collect();

        for session_id in in_flight {
            let finished = match self.inner.sessions.snapshot(&session_id).await {
                Ok(session) => session.state().is_terminal(),
                // Not stored yet; the dial is still in progress
                Err(DomainError::NotFound(_)) => false,
                Err(e) => {
                    warn!("Resync of session {} failed: {}", session_id, e);
                    false
                }
            };
            if finished {
                self.on_session_finished(&session_id).await;
            }
        }
    }
}
