//! API Router configuration

use super::calls_handler::{
    end_call, get_session, list_caller_ids, list_sessions, register_caller_id, send_digits,
    skip_disposition, start_call, submit_disposition, toggle_mute, unregister_caller_id,
};
use super::dialer_handler::{
    create_queue, enqueue, get_queue, list_queues, pause, remove_lead, report, resume, skip, start,
};
use super::dto::ApiResponse;
use super::ledger_handler::{get_account, open_account, top_up};
use super::metrics_handler::{metrics_handler, track_http};
use super::provider_handler::provider_event;
use super::ws_handler::ws_handler;
use crate::application::ledger::CreditLedger;
use crate::application::power_dialer::PowerDialer;
use crate::application::session::CallSessionManager;
use axum::{
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub sessions: CallSessionManager,
    pub dialer: PowerDialer,
    pub ledger: Arc<CreditLedger>,
}

impl AppState {
    pub fn new(sessions: CallSessionManager, dialer: PowerDialer) -> Self {
        let ledger = sessions.ledger().clone();
        Self {
            sessions,
            dialer,
            ledger,
        }
    }
}

/// Health check
pub async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("OK"))
}

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    let events = state.sessions.events().clone();

    // Health check route (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    // Operator call control
    let call_routes = Router::new()
        .route("/calls", post(start_call).get(list_sessions))
        .route("/calls/:session_id", get(get_session))
        .route("/calls/:session_id/end", post(end_call))
        .route("/calls/:session_id/mute", post(toggle_mute))
        .route("/calls/:session_id/digits", post(send_digits))
        .route("/calls/:session_id/disposition", post(submit_disposition))
        .route("/calls/:session_id/disposition/skip", post(skip_disposition))
        .route(
            "/caller-ids",
            post(register_caller_id)
                .get(list_caller_ids)
                .delete(unregister_caller_id),
        );

    // Provider webhook
    let provider_routes = Router::new().route("/provider/events", post(provider_event));

    // Ledger routes
    let ledger_routes = Router::new()
        .route("/accounts", post(open_account))
        .route("/accounts/:tenant_id", get(get_account))
        .route("/accounts/:tenant_id/top-up", post(top_up));

    // Power dialer routes
    let dialer_routes = Router::new()
        .route("/queues", post(create_queue).get(list_queues))
        .route("/queues/:queue_id", get(get_queue))
        .route("/queues/:queue_id/leads", post(enqueue))
        .route("/queues/:queue_id/leads/:lead_ref", delete(remove_lead))
        .route("/queues/:queue_id/start", post(start))
        .route("/queues/:queue_id/pause", post(pause))
        .route("/queues/:queue_id/resume", post(resume))
        .route("/queues/:queue_id/skip", post(skip))
        .route("/queues/:queue_id/report", get(report));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    // WebSocket route (separate state)
    let ws_routes = Router::new().route("/ws", get(ws_handler)).with_state(events);

    Router::new()
        .merge(health_routes)
        .merge(call_routes)
        .merge(provider_routes)
        .merge(ledger_routes)
        .merge(dialer_routes)
        .with_state(state)
        .merge(metrics_routes)
        .merge(ws_routes)
        .layer(middleware::from_fn(track_http))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
