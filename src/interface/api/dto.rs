//! API DTOs and error mapping

use crate::domain::dialer::{DialQueue, QueueStatus};
use crate::domain::disposition::{Disposition, FollowUp};
use crate::domain::ledger::CreditAccount;
use crate::domain::session::{CallSession, FailureReason};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{LeadRef, PhoneNumber, QueueId, SessionId, TenantId};
use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// What every handler returns
pub type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

pub fn ok<T>(data: T) -> ApiResult<T> {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

pub fn created<T>(data: T) -> ApiResult<T> {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

pub fn status_for(err: &DomainError) -> StatusCode {
    match err {
        DomainError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
        DomainError::InvalidStateTransition(_)
        | DomainError::InvalidOperation(_)
        | DomainError::Conflict(_)
        | DomainError::AlreadyExists(_) => StatusCode::CONFLICT,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::ValidationError(_) => StatusCode::BAD_REQUEST,
        DomainError::ProviderRejected(_) => StatusCode::BAD_GATEWAY,
        DomainError::ProviderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        DomainError::Storage(_) | DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn domain_error<T>(err: DomainError) -> ApiResult<T> {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("API: {}", err);
    } else {
        warn!("API: {}", err);
    }
    (status, Json(ApiResponse::error(err.to_string())))
}

/// Turn a use-case result into a response
pub fn respond<T>(result: crate::domain::Result<T>) -> ApiResult<T> {
    match result {
        Ok(data) => ok(data),
        Err(e) => domain_error(e),
    }
}

pub fn parse_number(raw: &str) -> Result<PhoneNumber, DomainError> {
    PhoneNumber::parse(raw).map_err(DomainError::ValidationError)
}

/// Session view returned to operators
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub caller_id: String,
    pub callee_number: String,
    pub lead_ref: Option<LeadRef>,
    pub provider_call_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub reserved_credits: u64,
    pub covered_seconds: u64,
    pub consumed_seconds: u64,
    pub muted: bool,
    pub disposition: Option<Disposition>,
    pub notes: String,
    pub tags: Vec<String>,
}

impl From<&CallSession> for SessionResponse {
    fn from(session: &CallSession) -> Self {
        let failure = match session.state() {
            crate::domain::session::SessionState::Failed(reason) => Some(reason.clone()),
            _ => None,
        };

        SessionResponse {
            session_id: session.id().clone(),
            tenant_id: session.tenant_id(),
            state: session.state().as_str().to_string(),
            failure,
            caller_id: session.caller_id().to_string(),
            callee_number: session.callee_number().to_string(),
            lead_ref: session.lead_ref().cloned(),
            provider_call_id: session.provider_call_id().map(|p| p.to_string()),
            started_at: session.started_at(),
            connected_at: session.connected_at(),
            ended_at: session.ended_at(),
            reserved_credits: session.reserved_credits(),
            covered_seconds: session.covered_seconds(),
            consumed_seconds: session.consumed_seconds(),
            muted: session.is_muted(),
            disposition: session.disposition(),
            notes: session.notes().to_string(),
            tags: session.tags().to_vec(),
        }
    }
}

impl From<CallSession> for SessionResponse {
    fn from(session: CallSession) -> Self {
        SessionResponse::from(&session)
    }
}

#[derive(Debug, Deserialize)]
pub struct StartCallRequestBody {
    pub tenant_id: TenantId,
    pub caller_id: String,
    pub callee_number: String,
    #[serde(default)]
    pub lead_ref: Option<LeadRef>,
    #[serde(default)]
    pub estimated_max_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: TenantId,
}

#[derive(Debug, Deserialize)]
pub struct CallerIdRequest {
    pub tenant_id: TenantId,
    pub number: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MuteResponse {
    pub muted: bool,
}

#[derive(Debug, Deserialize)]
pub struct DigitsRequest {
    pub digits: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SkipDispositionRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DispositionResponse {
    pub session: SessionResponse,
    pub follow_up: Option<FollowUp>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    pub tenant_id: TenantId,
    #[serde(default)]
    pub balance: u64,
    #[serde(default)]
    pub free_allowance: u64,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub credits: u64,
}

/// Balance view; reservations are summarised, not listed
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub tenant_id: TenantId,
    pub balance: u64,
    pub free_allowance_remaining: u64,
    pub free_allowance_quota: u64,
    pub available: u64,
    pub held: u64,
    pub cycle_started_at: DateTime<Utc>,
}

impl From<CreditAccount> for AccountResponse {
    fn from(account: CreditAccount) -> Self {
        AccountResponse {
            tenant_id: account.tenant_id,
            balance: account.balance,
            free_allowance_remaining: account.free_allowance_remaining,
            free_allowance_quota: account.free_allowance_quota,
            available: account.available(),
            held: account.held(),
            cycle_started_at: account.cycle_started_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateQueueRequest {
    pub tenant_id: TenantId,
    pub name: String,
    pub caller_id: String,
    #[serde(default)]
    pub leads: Vec<LeadRef>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub leads: Vec<LeadRef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub added: usize,
}

#[derive(Debug, Deserialize)]
pub struct SkipLeadRequest {
    #[serde(default = "default_skip_reason")]
    pub reason: String,
}

pub fn default_skip_reason() -> String {
    "skipped by operator".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SkipLeadResponse {
    pub skipped: LeadRef,
}

/// Queue summary for listings
#[derive(Debug, Serialize, Deserialize)]
pub struct QueueSummary {
    pub queue_id: QueueId,
    pub name: String,
    pub status: QueueStatus,
    pub total: usize,
    pub attempted: usize,
    pub in_flight: Option<SessionId>,
}

impl From<&DialQueue> for QueueSummary {
    fn from(queue: &DialQueue) -> Self {
        QueueSummary {
            queue_id: queue.id,
            name: queue.name.clone(),
            status: queue.status,
            total: queue.entries.len(),
            attempted: queue.attempted_count(),
            in_flight: queue.in_flight.as_ref().map(|f| f.session_id.clone()),
        }
    }
}
