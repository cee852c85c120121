//! Operator call API handlers

use super::dto::{
    created, domain_error, ok, parse_number, respond, ApiResult, CallerIdRequest,
    DigitsRequest, DispositionResponse, MuteResponse, SessionResponse, SkipDispositionRequest,
    StartCallRequestBody, TenantQuery,
};
use super::router::AppState;
use crate::application::disposition::DispositionSubmission;
use crate::application::session::StartCallRequest;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::SessionId;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;

/// Start an outbound call
pub async fn start_call(
    State(state): State<AppState>,
    Json(req): Json<StartCallRequestBody>,
) -> ApiResult<SessionResponse> {
    info!("API: Starting call for tenant {} to {}", req.tenant_id, req.callee_number);

    let (caller_id, callee) = match (parse_number(&req.caller_id), parse_number(&req.callee_number)) {
        (Ok(caller_id), Ok(callee)) => (caller_id, callee),
        (Err(e), _) | (_, Err(e)) => return domain_error(e),
    };

    let mut request = StartCallRequest::new(req.tenant_id, caller_id, callee);
    if let Some(lead_ref) = req.lead_ref {
        request = request.with_lead(lead_ref);
    }
    if let Some(seconds) = req.estimated_max_seconds {
        request = request.with_estimate(seconds);
    }

    match state.sessions.start_call(request).await {
        Ok(session) => created(session.into()),
        Err(e) => domain_error(e),
    }
}

/// Sessions of a tenant, newest first
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> ApiResult<Vec<SessionResponse>> {
    respond(
        state
            .sessions
            .sessions_for_tenant(&query.tenant_id)
            .await
            .map(|sessions| sessions.iter().map(SessionResponse::from).collect()),
    )
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    let session_id = SessionId::from(session_id);
    respond(state.sessions.snapshot(&session_id).await.map(Into::into))
}

pub async fn end_call(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    let session_id = SessionId::from(session_id);
    info!("API: Ending session {}", session_id);

    if let Err(e) = state.sessions.end_call(&session_id).await {
        return domain_error(e);
    }
    respond(state.sessions.snapshot(&session_id).await.map(Into::into))
}

pub async fn toggle_mute(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<MuteResponse> {
    let session_id = SessionId::from(session_id);
    respond(
        state
            .sessions
            .toggle_mute(&session_id)
            .await
            .map(|muted| MuteResponse { muted }),
    )
}

pub async fn send_digits(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<DigitsRequest>,
) -> ApiResult<()> {
    let session_id = SessionId::from(session_id);
    respond(state.sessions.send_digits(&session_id, req.digits).await)
}

pub async fn submit_disposition(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(submission): Json<DispositionSubmission>,
) -> ApiResult<DispositionResponse> {
    let session_id = SessionId::from(session_id);
    info!(
        "API: Disposition {} for session {}",
        submission.disposition, session_id
    );

    respond(
        state
            .sessions
            .submit_disposition(&session_id, submission)
            .await
            .map(|outcome| DispositionResponse {
                session: outcome.session.into(),
                follow_up: outcome.follow_up,
            }),
    )
}

pub async fn skip_disposition(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Option<Json<SkipDispositionRequest>>,
) -> ApiResult<SessionResponse> {
    let session_id = SessionId::from(session_id);
    let notes = body.and_then(|Json(req)| req.notes);
    respond(
        state
            .sessions
            .skip_disposition(&session_id, notes)
            .await
            .map(Into::into),
    )
}

/// Register an outbound number for a tenant
pub async fn register_caller_id(
    State(state): State<AppState>,
    Json(req): Json<CallerIdRequest>,
) -> ApiResult<Vec<String>> {
    let number = match parse_number(&req.number) {
        Ok(number) => number,
        Err(e) => return domain_error(e),
    };

    if !state.sessions.register_caller_id(req.tenant_id, number).await {
        return domain_error(DomainError::AlreadyExists(format!("Caller id {}", req.number)));
    }
    let numbers = state.sessions.caller_ids(&req.tenant_id).await;
    created(numbers.iter().map(|n| n.to_string()).collect())
}

pub async fn list_caller_ids(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> ApiResult<Vec<String>> {
    let numbers = state.sessions.caller_ids(&query.tenant_id).await;
    ok(numbers.iter().map(|n| n.to_string()).collect())
}

pub async fn unregister_caller_id(
    State(state): State<AppState>,
    Json(req): Json<CallerIdRequest>,
) -> ApiResult<bool> {
    match parse_number(&req.number) {
        Ok(number) => ok(state.sessions.unregister_caller_id(req.tenant_id, &number).await),
        Err(e) => domain_error(e),
    }
}
