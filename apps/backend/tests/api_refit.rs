//! Refit API tests.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use adaptive_core::EngineConfig;
use common::fixtures;
use common::TestContext;

async fn load_calibration_data(server: &axum_test::TestServer, learners: usize) {
    server
        .post("/api/events")
        .json(&fixtures::events_request(fixtures::calibration_records(learners)))
        .await
        .assert_status_ok();
}

/// Test a refit publishes the next snapshot version.
#[tokio::test]
async fn test_refit_publishes_next_version() {
    let ctx = TestContext::new();
    let server = ctx.server();
    load_calibration_data(&server, 20).await;

    let response = server.post("/api/refit").json(&json!({ "seed": 7 })).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["previous_version"], 1);
    assert_eq!(body["version"], 2);
    assert_eq!(body["diagnostics"]["responses_used"], 200);
    assert_eq!(body["diagnostics"]["learners"], 20);

    let snapshot: Value = server.get("/api/snapshot").await.json();
    assert_eq!(snapshot["version"], 2);
    assert_eq!(snapshot["fingerprint"], body["fingerprint"]);
    assert!(snapshot["calibrated_through"].is_string());
    assert_eq!(snapshot["reliability"]["responses_per_item"]["alg-1"], 20);
}

/// Test sparse items are shrunk and unanswered items keep their parameters.
#[tokio::test]
async fn test_refit_diagnostics_per_item() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let before = ctx.state.snapshots.current();
    load_calibration_data(&server, 10).await;

    let body: Value = server.post("/api/refit").json(&json!({})).await.json();

    let items = body["diagnostics"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 10);
    for item in items {
        let weight = item["shrinkage_weight"].as_f64().unwrap();
        assert!(weight > 0.0 && weight < 1.0);
    }
    let after = ctx.state.snapshots.current();
    assert_eq!(after.params("essay-1"), before.params("essay-1"));
}

/// Test two refits over the same log give the same fingerprint.
#[tokio::test]
async fn test_refit_is_deterministic() {
    let records = fixtures::calibration_records(15);
    let mut fingerprints = Vec::new();
    for _ in 0..2 {
        let ctx = TestContext::new();
        let server = ctx.server();
        server
            .post("/api/events")
            .json(&fixtures::events_request(records.clone()))
            .await
            .assert_status_ok();
        let body: Value = server.post("/api/refit").json(&json!({ "seed": 1 })).await.json();
        fingerprints.push(body["fingerprint"].clone());
    }
    assert_eq!(fingerprints[0], fingerprints[1]);
}

/// Test aborting with nothing running reports so.
#[tokio::test]
async fn test_abort_when_idle() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server.post("/api/refit/abort").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["aborting"], false);
    assert!(!ctx.state.refit.is_running());
}

/// Test the refit runs even when no attempts were logged.
#[tokio::test]
async fn test_refit_without_events() {
    let mut config = EngineConfig::default();
    config.refit.max_iterations = 5;
    let ctx = TestContext::with_config(config);
    let server = ctx.server();

    let response = server.post("/api/refit").json(&json!({ "seed": 0 })).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["diagnostics"]["iterations"], 0);
    assert_eq!(body["version"], 2);
}

/// Test a snapshot published out of band turns a stale refit into a conflict.
#[tokio::test]
async fn test_publish_conflict_maps_to_409() {
    let ctx = TestContext::new();
    let current = ctx.state.snapshots.current();
    let result = ctx.state.snapshots.publish((*current).clone());

    let error = adaptive_engine_backend::error::ApiError::from(result.unwrap_err());
    let response = axum::response::IntoResponse::into_response(error);
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
