//! Call session domain events

use super::value_object::FailureReason;
use crate::domain::disposition::Disposition;
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use crate::domain::shared::value_objects::{SessionId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEventKind {
    Connecting { reserved_credits: u64 },
    Ringing,
    Connected { connected_at: DateTime<Utc> },
    MuteChanged { muted: bool },
    Disconnected { consumed_seconds: u64 },
    AwaitingDisposition,
    Closed { disposition: Option<Disposition> },
    Failed { reason: FailureReason },
}

impl SessionEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEventKind::Connecting { .. } => "session.connecting",
            SessionEventKind::Ringing => "session.ringing",
            SessionEventKind::Connected { .. } => "session.connected",
            SessionEventKind::MuteChanged { .. } => "session.mute_changed",
            SessionEventKind::Disconnected { .. } => "session.disconnected",
            SessionEventKind::AwaitingDisposition => "session.awaiting_disposition",
            SessionEventKind::Closed { .. } => "session.closed",
            SessionEventKind::Failed { .. } => "session.failed",
        }
    }
}

/// Session domain event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub metadata: EventMetadata,
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn new(session_id: SessionId, tenant_id: TenantId, kind: SessionEventKind) -> Self {
        Self {
            metadata: EventMetadata::new(kind.name()),
            session_id,
            tenant_id,
            kind,
        }
    }

    /// Closed or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            SessionEventKind::Closed { .. } | SessionEventKind::Failed { .. }
        )
    }
}

impl DomainEvent for SessionEvent {
    fn event_type(&self) -> &'static str {
        self.kind.name()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata.occurred_at
    }
}
