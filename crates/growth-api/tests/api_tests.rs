//! Integration tests for the gateway HTTP endpoints.
//!
//! Tests drive the Axum `Router` directly via `tower::ServiceExt`
//! without binding a TCP port, backed by the in-memory store with
//! pacing disabled unless a test needs it.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use futures::StreamExt;
use growth_api::{AppState, build_router};
use growth_core::SessionConfig;
use growth_db::{CalculationStore, MemoryStore};
use growth_types::{CalculationId, CalculationStatus};
use serde_json::{Value, json};
use tower::ServiceExt;

fn test_state(step_delay_ms: u64) -> (Arc<MemoryStore>, Router) {
    let store = Arc::new(MemoryStore::new());
    let session = SessionConfig {
        step_delay_ms,
        ..SessionConfig::default()
    };
    let state = Arc::new(AppState::new(store.clone(), session));
    (store, build_router(state))
}

async fn post_json(router: &Router, uri: &str, body: &Value) -> Response {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(router: &Router, uri: &str) -> Response {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// Parse every `data:` frame of an event-stream body.
fn sse_messages(body: &str) -> Vec<Value> {
    body.split("\n\n")
        .filter_map(|frame| {
            frame
                .lines()
                .find_map(|line| line.strip_prefix("data:"))
                .map(|data| serde_json::from_str(data.trim()).unwrap())
        })
        .collect()
}

async fn stream(router: &Router, base: f64, exponent: i64) -> Vec<Value> {
    let response = post_json(
        router,
        "/api/calculate/stream",
        &json!({ "base": base, "exponent": exponent }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    sse_messages(&body_text(response).await)
}

fn calculation_id(messages: &[Value]) -> CalculationId {
    messages[0]["calculation_id"].as_str().unwrap().parse().unwrap()
}

// =========================================================================
// POST /api/calculate/stream
// =========================================================================

#[tokio::test]
async fn stream_sets_event_stream_headers() {
    let (_, router) = test_state(0);
    let response = post_json(
        &router,
        "/api/calculate/stream",
        &json!({ "base": 2, "exponent": 3 }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(
        headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
    assert_eq!(headers["x-accel-buffering"], "no");
}

#[tokio::test]
async fn scenario_a_streams_ten_steps_then_complete() {
    let (store, router) = test_state(0);
    let messages = stream(&router, 2.0, 10).await;

    assert_eq!(messages.len(), 12);
    assert_eq!(messages[0]["type"], "start");
    assert_eq!(messages[0]["base"], 2.0);
    assert_eq!(messages[0]["exponent"], 10);

    for (i, message) in messages[1..11].iter().enumerate() {
        assert_eq!(message["type"], "step");
        assert_eq!(message["step"], i + 1);
        assert!(message["timestamp"].is_string());
    }
    assert_eq!(messages[1]["linear"]["operation"], "2 × 1");
    assert_eq!(messages[10]["exponential"]["operation"], "2^10");

    let complete = &messages[11];
    assert_eq!(complete["type"], "complete");
    assert_eq!(complete["linear_result"], 20.0);
    assert_eq!(complete["exponential_result"], 1024.0);
    assert_eq!(complete["total_steps"], 10);
    assert_eq!(complete["calculation_id"], messages[0]["calculation_id"]);

    let stored = store
        .get_calculation(calculation_id(&messages))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, CalculationStatus::Completed);
}

#[tokio::test]
async fn scenario_b_three_to_the_fifth() {
    let (_, router) = test_state(0);
    let messages = stream(&router, 3.0, 5).await;
    let complete = messages.last().unwrap();

    assert_eq!(complete["type"], "complete");
    assert_eq!(complete["linear_result"], 15.0);
    assert_eq!(complete["exponential_result"], 243.0);
    assert_eq!(complete["total_steps"], 5);
}

#[tokio::test]
async fn step_values_follow_both_growth_laws() {
    let (_, router) = test_state(0);
    let base = 1.5;
    let messages = stream(&router, base, 12).await;

    let mut previous = 1.0;
    for message in messages.iter().filter(|m| m["type"] == "step") {
        let step = message["step"].as_f64().unwrap();
        let linear = message["linear"]["result"].as_f64().unwrap();
        let exponential = message["exponential"]["result"].as_f64().unwrap();

        assert!((linear - base * step).abs() < 1e-9);
        assert!((exponential - previous * base).abs() < 1e-9);
        assert!((exponential - base.powf(step)).abs() / exponential < 1e-9);
        previous = exponential;
    }
}

#[tokio::test]
async fn exactly_one_terminal_message_and_it_is_last() {
    let (_, router) = test_state(0);
    for (base, exponent) in [(2.0, 4), (1e10, 100)] {
        let messages = stream(&router, base, exponent).await;
        let terminal: Vec<_> = messages
            .iter()
            .filter(|m| m["type"] == "complete" || m["type"] == "error")
            .collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(&messages.last().unwrap(), terminal.first().unwrap());
    }
}

#[tokio::test]
async fn overflow_ends_with_error_and_failed_status() {
    let (store, router) = test_state(0);
    let messages = stream(&router, 1e10, 100).await;
    let last = messages.last().unwrap();

    assert_eq!(last["type"], "error");
    assert!(last["message"].as_str().unwrap().contains("overflow"));

    let stored = store
        .get_calculation(calculation_id(&messages))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, CalculationStatus::Failed);
    assert!(stored.completed_at.is_some());
    assert!(stored.exponential_result.is_none());
}

#[tokio::test]
async fn scenario_c_invalid_input_is_rejected_before_streaming() {
    let (store, router) = test_state(0);
    let bad = [
        json!({ "base": 0, "exponent": 5 }),
        json!({ "base": -2, "exponent": 5 }),
        json!({ "base": 2, "exponent": 0 }),
        json!({ "base": 2, "exponent": 101 }),
        json!({ "base": 2, "exponent": 2.5 }),
        json!({ "base": 2 }),
        json!({ "base": "two", "exponent": 3 }),
    ];

    for body in &bad {
        let response = post_json(&router, "/api/calculate/stream", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        let json = body_json(response).await;
        assert_eq!(json["status"], 400);
        assert!(json["error"].is_string());
    }

    assert_eq!(store.calculation_count().await, 0);
}

#[tokio::test]
async fn unavailable_store_returns_503() {
    let (store, router) = test_state(0);
    store.set_unavailable(true);

    let response = post_json(
        &router,
        "/api/calculate/stream",
        &json!({ "base": 2, "exponent": 3 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], 503);
}

#[tokio::test]
async fn every_step_has_a_persisted_event() {
    let (store, router) = test_state(0);
    let messages = stream(&router, 2.0, 6).await;
    let events = store.events_for(calculation_id(&messages)).await.unwrap();

    for message in messages.iter().filter(|m| m["type"] == "step") {
        let step = message["step"].as_u64().unwrap();
        assert!(events.iter().any(|e| e.step() == Some(step)), "step {step}");
    }
}

#[tokio::test]
async fn repeated_requests_create_independent_records() {
    let (store, router) = test_state(0);
    let first = stream(&router, 3.0, 5).await;
    let second = stream(&router, 3.0, 5).await;

    assert_ne!(first[0]["calculation_id"], second[0]["calculation_id"]);
    assert_eq!(
        first.last().unwrap()["exponential_result"],
        second.last().unwrap()["exponential_result"]
    );
    assert_eq!(store.calculation_count().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_stay_independent() {
    const SESSIONS: usize = 20;
    const EXPONENT: i64 = 30;
    // start, both `*_started`, two rows per step, three completion rows.
    const EVENTS_PER_CALCULATION: usize = 66;

    let (store, router) = test_state(0);
    let handles: Vec<_> = (0..SESSIONS)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move { stream(&router, 2.0, EXPONENT).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        let messages = handle.await.unwrap();
        assert_eq!(messages.len(), 32);
        assert_eq!(messages.last().unwrap()["type"], "complete");
        ids.push(calculation_id(&messages));
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), SESSIONS);
    assert_eq!(store.calculation_count().await, SESSIONS);

    for id in ids {
        let stored = store.get_calculation(id).await.unwrap().unwrap();
        assert_eq!(stored.status, CalculationStatus::Completed);
        assert_eq!(stored.total_steps, Some(30));

        let events = store.events_for(id).await.unwrap();
        assert_eq!(events.len(), EVENTS_PER_CALCULATION);
        assert!(events.iter().all(|e| e.calculation_id == id));
    }
}

#[tokio::test]
async fn whole_number_float_exponent_is_accepted() {
    let (_, router) = test_state(0);
    let response = post_json(
        &router,
        "/api/calculate/stream",
        &json!({ "base": 2, "exponent": 4.0 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let messages = sse_messages(&body_text(response).await);
    assert_eq!(messages.last().unwrap()["total_steps"], 4);
}

#[tokio::test(start_paused = true)]
async fn scenario_d_disconnect_stops_the_session() {
    let (store, router) = test_state(1000);
    let response = post_json(
        &router,
        "/api/calculate/stream",
        &json!({ "base": 2, "exponent": 10 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let mut received = String::new();
    while received.matches("\"type\":\"step\"").count() < 3 {
        let chunk = body.next().await.unwrap().unwrap();
        received.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    let id = calculation_id(&sse_messages(&received));
    drop(body);

    // Let the session notice the closed channel.
    tokio::time::sleep(Duration::from_secs(5)).await;

    let stored = store.get_calculation(id).await.unwrap().unwrap();
    assert_eq!(stored.status, CalculationStatus::InProgress);

    let events = store.events_for(id).await.unwrap();
    assert!(events.iter().filter_map(|e| e.step()).all(|s| s <= 3));
    assert!(
        events
            .iter()
            .all(|e| e.event_type.as_str() != "calculation_error")
    );
}

// =========================================================================
// POST /api/calculate
// =========================================================================

#[tokio::test]
async fn instant_calculation_returns_logs() {
    let (_, router) = test_state(1000);
    let response = post_json(
        &router,
        "/api/calculate",
        &json!({ "base": 3, "exponent": 5 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["linear_result"], 15.0);
    assert_eq!(json["exponential_result"], 243.0);
    assert_eq!(json["total_steps"], 5);
    assert_eq!(json["linear_logs"].as_array().unwrap().len(), 5);
    assert_eq!(json["exponential_logs"].as_array().unwrap().len(), 5);
    assert_eq!(json["linear_logs"][4]["operation"], "3 × 5");
    assert_eq!(json["exponential_logs"][4]["operation"], "3^5");
    assert_eq!(json["exponential_logs"][4]["result"], 243.0);
}

#[tokio::test]
async fn instant_calculation_failure_is_500() {
    let (_, router) = test_state(0);
    let response = post_json(
        &router,
        "/api/calculate",
        &json!({ "base": 1e10, "exponent": 100 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("overflow"));
}

#[tokio::test]
async fn instant_calculation_validates_input() {
    let (store, router) = test_state(0);
    let response = post_json(
        &router,
        "/api/calculate",
        &json!({ "base": 2, "exponent": 101 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(store.calculation_count().await, 0);
}

// =========================================================================
// Query endpoints
// =========================================================================

#[tokio::test]
async fn list_calculations_newest_first_with_limit() {
    let (_, router) = test_state(0);
    let mut ids = Vec::new();
    for exponent in 1..=3 {
        let messages = stream(&router, 2.0, exponent).await;
        ids.push(messages[0]["calculation_id"].clone());
    }

    let json = body_json(get(&router, "/api/calculations?limit=2").await).await;
    let calculations = json["calculations"].as_array().unwrap();
    assert_eq!(calculations.len(), 2);
    assert_eq!(calculations[0]["id"], ids[2]);
    assert_eq!(calculations[1]["id"], ids[1]);
    assert_eq!(calculations[0]["status"], "completed");

    let json = body_json(get(&router, "/api/calculations").await).await;
    assert_eq!(json["calculations"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn malformed_limit_is_400() {
    let (_, router) = test_state(0);
    let response = get(&router, "/api/calculations?limit=lots").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn events_for_calculation_in_order() {
    let (_, router) = test_state(0);
    let messages = stream(&router, 2.0, 2).await;
    let id = messages[0]["calculation_id"].as_str().unwrap();

    let json = body_json(get(&router, &format!("/api/events/{id}")).await).await;
    let events = json["events"].as_array().unwrap();
    let types: Vec<&str> = events
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();

    assert_eq!(
        types,
        vec![
            "calculation_started",
            "linear_started",
            "exponential_started",
            "linear_step",
            "exponential_step",
            "linear_step",
            "exponential_step",
            "linear_completed",
            "exponential_completed",
            "calculation_completed",
        ]
    );
    assert_eq!(json["count"], events.len());
}

#[tokio::test]
async fn events_for_unknown_calculation_is_empty() {
    let (_, router) = test_state(0);
    let id = CalculationId::new();
    let json = body_json(get(&router, &format!("/api/events/{id}")).await).await;
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn events_for_invalid_uuid_is_400() {
    let (_, router) = test_state(0);
    let response = get(&router, "/api/events/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["status"], 400);
    assert!(json["error"].as_str().unwrap().starts_with("not-a-uuid: "));
}

#[tokio::test]
async fn recent_events_newest_first() {
    let (_, router) = test_state(0);
    stream(&router, 2.0, 3).await;

    let json = body_json(get(&router, "/api/events?limit=3").await).await;
    let events = json["events"].as_array().unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(json["count"], 3);
    assert_eq!(events[0]["event_type"], "calculation_completed");
}

// =========================================================================
// GET /health
// =========================================================================

#[tokio::test]
async fn health_reports_store_status() {
    let (store, router) = test_state(0);

    let json = body_json(get(&router, "/health").await).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "growth-gateway");
    assert_eq!(json["database"], "connected");
    assert!(json["timestamp"].is_string());

    store.set_unavailable(true);
    let response = get(&router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["database"], "disconnected");
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let (_, router) = test_state(0);
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
