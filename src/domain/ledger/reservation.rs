//! Credit reservations

use crate::domain::shared::value_objects::{SessionId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reservation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Credits are held against a live session
    Held,
    /// Actual cost was debited and the remainder returned
    Committed,
    /// Everything was returned to the original pools
    Released,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Held => "held",
            ReservationStatus::Committed => "committed",
            ReservationStatus::Released => "released",
        }
    }
}

/// A provisional hold on credits, split by the pool it was taken from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub session_id: SessionId,
    pub from_free: u64,
    pub from_balance: u64,
    pub covered_seconds: u64,
    pub status: ReservationStatus,
    pub committed_cost: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn amount(&self) -> u64 {
        self.from_free + self.from_balance
    }

    pub fn is_held(&self) -> bool {
        self.status == ReservationStatus::Held
    }
}

/// Handle returned by a successful reservation
///
/// The session holds on to this and hands it back to commit or release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationHandle {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub amount: u64,
    pub covered_seconds: u64,
}

/// Outcome of committing a reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub session_id: SessionId,
    pub billable_minutes: u64,
    pub cost: u64,
    pub refunded_free: u64,
    pub refunded_balance: u64,
    /// True when the handle had already been committed and nothing changed
    pub replayed: bool,
}
