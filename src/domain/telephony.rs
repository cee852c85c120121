//! Telephony provider port
//!
//! Signalling and media belong to the provider; the core only places calls,
//! forwards in-call controls and consumes status reports.

use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{PhoneNumber, ProviderCallId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Call status as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCallStatus {
    Queued,
    Initiated,
    Ringing,
    #[serde(alias = "in-progress", alias = "answered")]
    InProgress,
    Completed,
    Busy,
    #[serde(alias = "no-answer")]
    NoAnswer,
    Failed,
    #[serde(alias = "cancelled")]
    Canceled,
}

impl ProviderCallStatus {
    /// The provider is done with this call
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ProviderCallStatus::Completed
                | ProviderCallStatus::Busy
                | ProviderCallStatus::NoAnswer
                | ProviderCallStatus::Failed
                | ProviderCallStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderCallStatus::Queued => "queued",
            ProviderCallStatus::Initiated => "initiated",
            ProviderCallStatus::Ringing => "ringing",
            ProviderCallStatus::InProgress => "in_progress",
            ProviderCallStatus::Completed => "completed",
            ProviderCallStatus::Busy => "busy",
            ProviderCallStatus::NoAnswer => "no_answer",
            ProviderCallStatus::Failed => "failed",
            ProviderCallStatus::Canceled => "canceled",
        }
    }
}

/// Inbound status change for one provider call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEvent {
    pub provider_call_id: ProviderCallId,
    pub status: ProviderCallStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

impl ProviderEvent {
    pub fn new(
        provider_call_id: ProviderCallId,
        status: ProviderCallStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            provider_call_id,
            status,
            timestamp,
            duration_seconds: None,
        }
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }
}

/// Authoritative answer to a call-status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCallReport {
    pub status: ProviderCallStatus,
    pub duration_seconds: Option<u64>,
    pub checked_at: DateTime<Utc>,
}

/// Provider adapter errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Call rejected: {0}")]
    Rejected(String),

    #[error("Provider did not respond in time")]
    Timeout,

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider call not found: {0}")]
    CallNotFound(ProviderCallId),
}

impl From<ProviderError> for DomainError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected(reason) => DomainError::ProviderRejected(reason),
            ProviderError::Unavailable(reason) => DomainError::ProviderRejected(reason),
            ProviderError::Timeout => {
                DomainError::ProviderTimeout("provider did not respond in time".to_string())
            }
            ProviderError::CallNotFound(id) => {
                DomainError::NotFound(format!("Provider call {}", id))
            }
        }
    }
}

/// Telephony provider adapter
///
/// Retries, if any, are the adapter's business; the core surfaces the
/// first error.
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Dial `callee` from `caller_id`; resolves once the provider accepted the dial
    async fn place_call(
        &self,
        caller_id: &PhoneNumber,
        callee: &PhoneNumber,
    ) -> std::result::Result<ProviderCallId, ProviderError>;

    async fn send_digits(
        &self,
        call: &ProviderCallId,
        digits: &str,
    ) -> std::result::Result<(), ProviderError>;

    async fn set_muted(
        &self,
        call: &ProviderCallId,
        muted: bool,
    ) -> std::result::Result<(), ProviderError>;

    async fn hang_up(&self, call: &ProviderCallId) -> std::result::Result<(), ProviderError>;

    /// Authoritative status; `None` when the provider no longer knows the call
    async fn query_call(
        &self,
        call: &ProviderCallId,
    ) -> std::result::Result<Option<ProviderCallReport>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_event_accepts_hyphenated_status() {
        let json = r#"{
            "providerCallId": "CA123",
            "status": "no-answer",
            "timestamp": "2026-01-05T10:00:00Z"
        }"#;
        let event: ProviderEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.status, ProviderCallStatus::NoAnswer);
        assert_eq!(event.duration_seconds, None);

        let json = r#"{
            "providerCallId": "CA123",
            "status": "completed",
            "timestamp": "2026-01-05T10:02:05Z",
            "durationSeconds": 125
        }"#;
        let event: ProviderEvent = serde_json::from_str(json).unwrap();
        assert!(event.status.is_final());
        assert_eq!(event.duration_seconds, Some(125));
    }

    #[test]
    fn test_provider_error_mapping() {
        assert!(matches!(
            DomainError::from(ProviderError::Rejected("blocked".into())),
            DomainError::ProviderRejected(_)
        ));
        assert!(matches!(
            DomainError::from(ProviderError::Timeout),
            DomainError::ProviderTimeout(_)
        ));
    }
}
