//! Power dialer API handlers

use super::dto::{
    created, default_skip_reason, domain_error, parse_number, respond, ApiResult, CreateQueueRequest, EnqueueRequest,
    EnqueueResponse, QueueSummary, SkipLeadRequest, SkipLeadResponse, TenantQuery,
};
use super::router::AppState;
use crate::domain::dialer::DialQueue;
use crate::domain::reporting::SessionReport;
use crate::domain::shared::value_objects::{LeadRef, QueueId};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;
use uuid::Uuid;

/// Create a queue, optionally with its first leads
pub async fn create_queue(
    State(state): State<AppState>,
    Json(req): Json<CreateQueueRequest>,
) -> ApiResult<DialQueue> {
    info!("API: Creating dial queue '{}' for tenant {}", req.name, req.tenant_id);

    let caller_id = match parse_number(&req.caller_id) {
        Ok(number) => number,
        Err(e) => return domain_error(e),
    };

    let queue = match state.dialer.create_queue(req.tenant_id, req.name, caller_id).await {
        Ok(queue) => queue,
        Err(e) => return domain_error(e),
    };

    if !req.leads.is_empty() {
        if let Err(e) = state.dialer.enqueue(&queue.id, req.leads).await {
            return domain_error(e);
        }
    }

    match state.dialer.snapshot(&queue.id).await {
        Ok(queue) => created(queue),
        Err(e) => domain_error(e),
    }
}

pub async fn list_queues(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> ApiResult<Vec<QueueSummary>> {
    respond(
        state
            .dialer
            .queues_for_tenant(&query.tenant_id)
            .await
            .map(|queues| queues.iter().map(QueueSummary::from).collect()),
    )
}

pub async fn get_queue(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> ApiResult<DialQueue> {
    respond(state.dialer.snapshot(&QueueId::from_uuid(queue_id)).await)
}

pub async fn enqueue(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    Json(req): Json<EnqueueRequest>,
) -> ApiResult<EnqueueResponse> {
    respond(
        state
            .dialer
            .enqueue(&QueueId::from_uuid(queue_id), req.leads)
            .await
            .map(|added| EnqueueResponse { added }),
    )
}

pub async fn start(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> ApiResult<DialQueue> {
    info!("API: Starting dial queue {}", queue_id);
    respond(state.dialer.start(&QueueId::from_uuid(queue_id)).await)
}

pub async fn pause(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> ApiResult<DialQueue> {
    info!("API: Pausing dial queue {}", queue_id);
    respond(state.dialer.pause(&QueueId::from_uuid(queue_id)).await)
}

pub async fn resume(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> ApiResult<DialQueue> {
    info!("API: Resuming dial queue {}", queue_id);
    respond(state.dialer.resume(&QueueId::from_uuid(queue_id)).await)
}

pub async fn skip(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
    body: Option<Json<SkipLeadRequest>>,
) -> ApiResult<SkipLeadResponse> {
    let reason = body
        .map(|Json(req)| req.reason)
        .unwrap_or_else(default_skip_reason);
    respond(
        state
            .dialer
            .skip(&QueueId::from_uuid(queue_id), reason)
            .await
            .map(|skipped| SkipLeadResponse { skipped }),
    )
}

pub async fn remove_lead(
    State(state): State<AppState>,
    Path((queue_id, lead_ref)): Path<(Uuid, String)>,
) -> ApiResult<()> {
    respond(
        state
            .dialer
            .remove(&QueueId::from_uuid(queue_id), &LeadRef::new(lead_ref))
            .await,
    )
}

pub async fn report(
    State(state): State<AppState>,
    Path(queue_id): Path<Uuid>,
) -> ApiResult<SessionReport> {
    respond(state.dialer.report(&QueueId::from_uuid(queue_id)).await)
}
