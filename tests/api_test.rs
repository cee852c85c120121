//! REST API Integration Tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Duration as ChronoDuration;
use powerdial::application::{
    CallSessionManager, CreditLedger, DispositionCapture, EventBroadcaster, PowerDialer,
    SessionSettings,
};
use powerdial::domain::ledger::CreditRate;
use powerdial::domain::shared::value_objects::TenantId;
use powerdial::infrastructure::persistence::{
    InMemoryDialQueueRepository, InMemoryFollowUpRepository, InMemoryLeadStore,
    InMemoryLedgerStore, InMemorySessionRepository,
};
use powerdial::infrastructure::telephony::SimulatedProvider;
use powerdial::interface::api::{build_router, init_metrics, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // For `oneshot`

fn setup_api_test() -> Router {
    let ledger = Arc::new(CreditLedger::new(
        Arc::new(InMemoryLedgerStore::new()),
        CreditRate::per_minute(10),
        ChronoDuration::days(30),
    ));
    let leads = Arc::new(InMemoryLeadStore::new());
    let dispositions = Arc::new(DispositionCapture::new(Arc::new(
        InMemoryFollowUpRepository::new(),
    )));

    let sessions = CallSessionManager::new(
        ledger,
        Arc::new(SimulatedProvider::manual()),
        Arc::new(InMemorySessionRepository::new()),
        leads.clone(),
        dispositions.clone(),
        EventBroadcaster::new(),
        SessionSettings::default(),
    );
    let dialer = PowerDialer::new(
        sessions.clone(),
        leads,
        Arc::new(InMemoryDialQueueRepository::new()),
        dispositions,
        300,
    );

    build_router(AppState::new(sessions, dialer), init_metrics())
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn open_account(app: &Router, tenant_id: TenantId, balance: u64, free_allowance: u64) {
    let (status, _) = send(
        app,
        "POST",
        "/accounts",
        Some(json!({
            "tenant_id": tenant_id,
            "balance": balance,
            "free_allowance": free_allowance,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn register_caller_id(app: &Router, tenant_id: TenantId, number: &str) {
    let (status, _) = send(
        app,
        "POST",
        "/caller-ids",
        Some(json!({ "tenant_id": tenant_id, "number": number })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_health_check() {
    let app = setup_api_test();

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"], "OK");
}

#[tokio::test]
async fn test_open_and_top_up_account() {
    let app = setup_api_test();
    let tenant_id = TenantId::new();
    open_account(&app, tenant_id, 20, 100).await;

    let (status, json) = send(&app, "GET", &format!("/accounts/{}", tenant_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["balance"], 20);
    assert_eq!(json["data"]["free_allowance_remaining"], 100);
    assert_eq!(json["data"]["available"], 120);

    let (status, json) = send(
        &app,
        "POST",
        &format!("/accounts/{}/top-up", tenant_id),
        Some(json!({ "credits": 30 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["balance"], 50);

    // Opening twice conflicts
    let (status, json) = send(
        &app,
        "POST",
        "/accounts",
        Some(json!({ "tenant_id": tenant_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["success"], false);
    assert!(json.get("data").is_none());
}

#[tokio::test]
async fn test_unknown_account_is_not_found() {
    let app = setup_api_test();

    let (status, json) = send(&app, "GET", &format!("/accounts/{}", TenantId::new()), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_start_call_without_credits_is_payment_required() {
    let app = setup_api_test();
    let tenant_id = TenantId::new();
    open_account(&app, tenant_id, 0, 5).await;
    register_caller_id(&app, tenant_id, "+14155550100").await;

    let (status, json) = send(
        &app,
        "POST",
        "/calls",
        Some(json!({
            "tenant_id": tenant_id,
            "caller_id": "+14155550100",
            "callee_number": "+14155550123",
            "estimated_max_seconds": 300,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json["success"], false);

    let (_, json) = send(&app, "GET", &format!("/calls?tenant_id={}", tenant_id), None).await;
    assert_eq!(json["data"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_start_and_end_call() {
    let app = setup_api_test();
    let tenant_id = TenantId::new();
    open_account(&app, tenant_id, 0, 100).await;
    register_caller_id(&app, tenant_id, "+14155550100").await;

    let (status, json) = send(
        &app,
        "POST",
        "/calls",
        Some(json!({
            "tenant_id": tenant_id,
            "caller_id": "+14155550100",
            "callee_number": "+14155550123",
            "estimated_max_seconds": 300,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["state"], "connecting");
    assert_eq!(json["data"]["reserved_credits"], 50);

    let session_id = json["data"]["session_id"].as_str().unwrap().to_string();

    // Digits need a connected call
    let (status, _) = send(
        &app,
        "POST",
        &format!("/calls/{}/digits", session_id),
        Some(json!({ "digits": "1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "POST", &format!("/calls/{}/end", session_id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&app, "GET", &format!("/calls/{}", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["session_id"], session_id.as_str());
}

#[tokio::test]
async fn test_invalid_number_is_bad_request() {
    let app = setup_api_test();
    let tenant_id = TenantId::new();

    let (status, json) = send(
        &app,
        "POST",
        "/caller-ids",
        Some(json!({ "tenant_id": tenant_id, "number": "not a number" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = setup_api_test();

    let (status, _) = send(&app, "GET", "/calls/no-such-session", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_provider_event_for_unknown_call_is_accepted() {
    let app = setup_api_test();

    let (status, json) = send(
        &app,
        "POST",
        "/provider/events",
        Some(json!({
            "providerCallId": "SIM-LATE",
            "status": "ringing",
            "timestamp": "2026-01-01T00:00:00Z",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
}

#[tokio::test]
async fn test_create_queue_with_unregistered_caller_id_is_bad_request() {
    let app = setup_api_test();
    let tenant_id = TenantId::new();

    let (status, json) = send(
        &app,
        "POST",
        "/queues",
        Some(json!({
            "tenant_id": tenant_id,
            "name": "Monday list",
            "caller_id": "+14155550100",
            "leads": ["lead-1"],
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_create_and_control_queue() {
    let app = setup_api_test();
    let tenant_id = TenantId::new();
    register_caller_id(&app, tenant_id, "+14155550100").await;

    let (status, json) = send(
        &app,
        "POST",
        "/queues",
        Some(json!({
            "tenant_id": tenant_id,
            "name": "Monday list",
            "caller_id": "+14155550100",
            "leads": ["lead-1", "lead-2"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["status"], "idle");
    assert_eq!(json["data"]["entries"].as_array().map(Vec::len), Some(2));

    let queue_id = json["data"]["id"].as_str().unwrap().to_string();

    let (status, json) = send(
        &app,
        "POST",
        &format!("/queues/{}/leads", queue_id),
        Some(json!({ "leads": ["lead-2", "lead-3"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["added"], 1);

    let (status, json) = send(
        &app,
        "POST",
        &format!("/queues/{}/skip", queue_id),
        Some(json!({ "reason": "do not call" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["skipped"], "lead-1");

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/queues/{}/leads/lead-3", queue_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&app, "GET", &format!("/queues?tenant_id={}", tenant_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"][0]["total"], 2);
    assert_eq!(json["data"][0]["attempted"], 1);

    // Resuming a queue that never started is rejected
    let (status, _) = send(&app, "POST", &format!("/queues/{}/resume", queue_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = send(&app, "GET", &format!("/queues/{}/report", queue_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["attempts"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup_api_test();

    let (status, _) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
