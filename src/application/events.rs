//! Event fan-out to in-process listeners and WebSocket clients

use crate::domain::dialer::QueueStatus;
use crate::domain::session::SessionEvent;
use crate::domain::shared::value_objects::{LeadRef, QueueId, SessionId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events that can be broadcast to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DialerEvent {
    /// A call session changed state
    Session(SessionEvent),
    /// The power dialer started a call for a queued lead
    QueueAdvanced {
        queue_id: QueueId,
        lead_ref: LeadRef,
        session_id: SessionId,
    },
    /// A queue entry was marked attempted without a call
    QueueEntrySkipped {
        queue_id: QueueId,
        lead_ref: LeadRef,
        reason: String,
    },
    /// Queue run status changed
    QueueStatusChanged {
        queue_id: QueueId,
        status: QueueStatus,
    },
    /// Live session count updated
    LiveSessionsUpdated { count: usize },
}

/// Event broadcaster
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<DialerEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: DialerEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DialerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
