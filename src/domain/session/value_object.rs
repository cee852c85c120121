//! Call session value objects

use serde::{Deserialize, Serialize};

/// Why a session failed before anyone talked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Provider refused to place the call
    Rejected(String),
    /// Callee was busy
    Busy,
    /// Nobody answered
    NoAnswer,
    /// Operator cancelled before connection
    Canceled,
    /// Provider did not acknowledge the dial in time
    Timeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Rejected(_) => "rejected",
            FailureReason::Busy => "busy",
            FailureReason::NoAnswer => "no_answer",
            FailureReason::Canceled => "canceled",
            FailureReason::Timeout => "timeout",
        }
    }
}

/// Call session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    /// Created, credits not yet reserved
    Idle,
    /// Credits reserved, dial requested from the provider
    Connecting,
    /// Callee is being alerted
    Ringing,
    /// Call connected, talk time is running
    InProgress,
    /// Call ended, accounting in progress
    Disconnecting,
    /// Waiting for the operator to categorise the call
    AwaitingDisposition,
    /// Disposition recorded, session archived
    Closed,
    /// Never connected
    Failed(FailureReason),
}

impl SessionState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: &SessionState) -> bool {
        use SessionState::*;

        match (self, new_state) {
            (Idle, Connecting) => true,

            (Connecting, Ringing) => true,
            (Connecting, InProgress) => true,
            (Connecting, Failed(_)) => true,

            (Ringing, InProgress) => true,
            (Ringing, Failed(_)) => true,

            (InProgress, Disconnecting) => true,

            (Disconnecting, AwaitingDisposition) => true,

            (AwaitingDisposition, Closed) => true,

            (Closed, _) | (Failed(_), _) => false,

            _ => false,
        }
    }

    /// Closed or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }

    /// Holding a provider call (dialling or connected)
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Ringing | SessionState::InProgress
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Ringing => "ringing",
            SessionState::InProgress => "in_progress",
            SessionState::Disconnecting => "disconnecting",
            SessionState::AwaitingDisposition => "awaiting_disposition",
            SessionState::Closed => "closed",
            SessionState::Failed(_) => "failed",
        }
    }
}
