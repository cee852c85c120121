//! Power-dial queue aggregate

use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::value_objects::{LeadRef, PhoneNumber, QueueId, SessionId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Created, not started
    Idle,
    /// Dialling leads one after another
    Running,
    /// Holding between calls until resumed
    Paused,
    /// Every entry was attempted; report-only
    Completed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Idle => "idle",
            QueueStatus::Running => "running",
            QueueStatus::Paused => "paused",
            QueueStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(QueueStatus::Idle),
            "running" => Some(QueueStatus::Running),
            "paused" => Some(QueueStatus::Paused),
            "completed" => Some(QueueStatus::Completed),
            _ => None,
        }
    }
}

/// One lead in a power-dial run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialQueueEntry {
    pub queue_id: QueueId,
    pub lead_ref: LeadRef,
    pub position: usize,
    pub attempted: bool,
    pub last_session_ref: Option<SessionId>,
    pub skip_reason: Option<String>,
    pub attempted_at: Option<DateTime<Utc>>,
}

/// The entry currently being dialled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlight {
    pub lead_ref: LeadRef,
    pub session_id: SessionId,
}

/// Ordered list of leads dialled by the sequencer
///
/// At most one entry is in flight at a time, and `attempted` flags only
/// ever go from false to true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialQueue {
    pub id: QueueId,
    pub tenant_id: TenantId,
    pub name: String,
    pub caller_id: PhoneNumber,
    pub status: QueueStatus,
    pub pause_requested: bool,
    pub entries: Vec<DialQueueEntry>,
    pub in_flight: Option<InFlight>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DialQueue {
    pub fn new(tenant_id: TenantId, name: String, caller_id: PhoneNumber) -> Self {
        let now = Utc::now();
        Self {
            id: QueueId::new(),
            tenant_id,
            name,
            caller_id,
            status: QueueStatus::Idle,
            pause_requested: false,
            entries: Vec::new(),
            in_flight: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append leads in order; a lead already in the queue is not added twice
    pub fn enqueue(&mut self, leads: Vec<LeadRef>) -> Result<usize> {
        if self.status == QueueStatus::Completed {
            return Err(DomainError::InvalidOperation(format!(
                "Queue {} is completed",
                self.id
            )));
        }

        let mut added = 0;
        for lead_ref in leads {
            if self.entries.iter().any(|e| e.lead_ref == lead_ref) {
                continue;
            }
            self.entries.push(DialQueueEntry {
                queue_id: self.id,
                lead_ref,
                position: self.entries.len(),
                attempted: false,
                last_session_ref: None,
                skip_reason: None,
                attempted_at: None,
            });
            added += 1;
        }

        self.touch();
        Ok(added)
    }

    /// Drop an entry that was never dialled
    pub fn remove(&mut self, lead_ref: &LeadRef) -> Result<DialQueueEntry> {
        if self.in_flight.as_ref().map(|f| &f.lead_ref) == Some(lead_ref) {
            return Err(DomainError::Conflict(format!(
                "Lead {} is being dialled",
                lead_ref
            )));
        }

        let index = self
            .entries
            .iter()
            .position(|e| &e.lead_ref == lead_ref)
            .ok_or_else(|| DomainError::NotFound(format!("Lead {} in queue {}", lead_ref, self.id)))?;
        if self.entries[index].attempted {
            return Err(DomainError::InvalidOperation(format!(
                "Lead {} was already attempted",
                lead_ref
            )));
        }

        let removed = self.entries.remove(index);
        for (position, entry) in self.entries.iter_mut().enumerate() {
            entry.position = position;
        }

        self.complete_if_exhausted();
        self.touch();
        Ok(removed)
    }

    pub fn start(&mut self) -> Result<()> {
        match self.status {
            QueueStatus::Idle => {
                self.status = QueueStatus::Running;
                self.complete_if_exhausted();
                self.touch();
                Ok(())
            }
            QueueStatus::Running => Ok(()),
            QueueStatus::Paused => Err(DomainError::InvalidOperation(format!(
                "Queue {} is paused; resume it instead",
                self.id
            ))),
            QueueStatus::Completed => Err(DomainError::InvalidOperation(format!(
                "Queue {} is completed",
                self.id
            ))),
        }
    }

    /// Stop dialling; a live call is never interrupted
    pub fn pause(&mut self) -> Result<()> {
        match self.status {
            QueueStatus::Running if self.in_flight.is_some() => {
                self.pause_requested = true;
            }
            QueueStatus::Running => {
                self.status = QueueStatus::Paused;
            }
            QueueStatus::Paused => {}
            other => {
                return Err(DomainError::InvalidOperation(format!(
                    "Cannot pause queue {} while {}",
                    self.id,
                    other.as_str()
                )));
            }
        }
        self.touch();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.status {
            QueueStatus::Paused => {
                self.status = QueueStatus::Running;
                self.complete_if_exhausted();
            }
            QueueStatus::Running => {
                self.pause_requested = false;
            }
            other => {
                return Err(DomainError::InvalidOperation(format!(
                    "Cannot resume queue {} while {}",
                    self.id,
                    other.as_str()
                )));
            }
        }
        self.touch();
        Ok(())
    }

    /// First entry not yet attempted
    pub fn next_unattempted(&self) -> Option<&DialQueueEntry> {
        self.entries.iter().find(|e| !e.attempted)
    }

    /// Entry being dialled, or the next one in line
    pub fn current_entry(&self) -> Option<&DialQueueEntry> {
        match &self.in_flight {
            Some(flight) => self.entries.iter().find(|e| e.lead_ref == flight.lead_ref),
            None => self.next_unattempted(),
        }
    }

    /// Lead the sequencer should dial now, if any
    pub fn next_to_dial(&self) -> Option<LeadRef> {
        if self.status != QueueStatus::Running || self.in_flight.is_some() || self.pause_requested
        {
            return None;
        }
        self.next_unattempted().map(|e| e.lead_ref.clone())
    }

    /// Claim the queue's single dialling slot for `lead_ref`
    pub fn begin_dial(&mut self, lead_ref: &LeadRef, session_id: SessionId) -> Result<()> {
        if let Some(flight) = &self.in_flight {
            return Err(DomainError::Conflict(format!(
                "Queue {} is already dialling session {}",
                self.id, flight.session_id
            )));
        }

        let entry = self
            .entries
            .iter()
            .find(|e| &e.lead_ref == lead_ref)
            .ok_or_else(|| DomainError::NotFound(format!("Lead {} in queue {}", lead_ref, self.id)))?;
        if entry.attempted {
            return Err(DomainError::InvalidOperation(format!(
                "Lead {} was already attempted",
                lead_ref
            )));
        }

        self.in_flight = Some(InFlight {
            lead_ref: lead_ref.clone(),
            session_id,
        });
        self.touch();
        Ok(())
    }

    /// The in-flight session reached Closed or Failed (or never started)
    ///
    /// Returns false when `session_id` is not the one in flight, which makes
    /// repeated notifications harmless.
    pub fn complete_dial(&mut self, session_id: &SessionId, note: Option<String>) -> bool {
        let lead_ref = match &self.in_flight {
            Some(flight) if &flight.session_id == session_id => flight.lead_ref.clone(),
            _ => return false,
        };

        let now = Utc::now();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.lead_ref == lead_ref) {
            entry.attempted = true;
            entry.attempted_at = Some(now);
            entry.last_session_ref = Some(session_id.clone());
            if note.is_some() {
                entry.skip_reason = note;
            }
        }
        self.in_flight = None;

        if self.pause_requested {
            self.pause_requested = false;
            self.status = QueueStatus::Paused;
        }
        self.complete_if_exhausted();
        self.touch();
        true
    }

    /// Mark the current entry attempted without placing a call
    pub fn skip(&mut self, reason: String) -> Result<LeadRef> {
        if self.status == QueueStatus::Completed {
            return Err(DomainError::InvalidOperation(format!(
                "Queue {} is completed",
                self.id
            )));
        }
        if let Some(flight) = &self.in_flight {
            return Err(DomainError::Conflict(format!(
                "Lead {} is being dialled; end the call instead",
                flight.lead_ref
            )));
        }

        let entry = self
            .entries
            .iter_mut()
            .find(|e| !e.attempted)
            .ok_or_else(|| DomainError::NotFound(format!("No lead left in queue {}", self.id)))?;

        entry.attempted = true;
        entry.attempted_at = Some(Utc::now());
        entry.skip_reason = Some(reason);
        let lead_ref = entry.lead_ref.clone();

        self.complete_if_exhausted();
        self.touch();
        Ok(lead_ref)
    }

    pub fn attempted_count(&self) -> usize {
        self.entries.iter().filter(|e| e.attempted).count()
    }

    pub fn is_completed(&self) -> bool {
        self.status == QueueStatus::Completed
    }

    fn complete_if_exhausted(&mut self) {
        if self.status == QueueStatus::Idle || self.in_flight.is_some() {
            return;
        }
        if self.entries.iter().all(|e| e.attempted) {
            self.status = QueueStatus::Completed;
            self.pause_requested = false;
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
