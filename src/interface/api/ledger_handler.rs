//! Credit ledger API handlers

use super::dto::{created, domain_error, respond, AccountResponse, ApiResult, OpenAccountRequest, TopUpRequest};
use super::router::AppState;
use crate::domain::shared::value_objects::TenantId;
use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;
use uuid::Uuid;

pub async fn open_account(
    State(state): State<AppState>,
    Json(req): Json<OpenAccountRequest>,
) -> ApiResult<AccountResponse> {
    info!("API: Opening credit account for tenant {}", req.tenant_id);

    match state
        .ledger
        .open_account(req.tenant_id, req.balance, req.free_allowance)
        .await
    {
        Ok(account) => created(account.into()),
        Err(e) => domain_error(e),
    }
}

pub async fn get_account(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> ApiResult<AccountResponse> {
    let tenant_id = TenantId::from_uuid(tenant_id);
    respond(state.ledger.account(&tenant_id).await.map(Into::into))
}

pub async fn top_up(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<TopUpRequest>,
) -> ApiResult<AccountResponse> {
    let tenant_id = TenantId::from_uuid(tenant_id);
    info!("API: Top-up of {} credits for tenant {}", req.credits, tenant_id);
    respond(state.ledger.top_up(tenant_id, req.credits).await.map(Into::into))
}
