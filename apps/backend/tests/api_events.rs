//! Event ingestion API tests.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::fixtures;
use common::TestContext;

/// Test current and legacy records are both accepted.
#[tokio::test]
async fn test_ingest_mixed_schema_versions() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/api/events")
        .json(&fixtures::events_request(vec![
            fixtures::attempt_record("ana", "alg-1", 1, fixtures::minutes(0)),
            fixtures::legacy_attempt_record("ana", "alg-2", false, fixtures::minutes(1)),
        ]))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["appended"], 2);
    assert_eq!(body["duplicates"], 0);

    let attempts = ctx.state.events.read().await.effective_attempts_for("ana");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].category, 0);
}

/// Test re-sending a record is idempotent.
#[tokio::test]
async fn test_duplicate_records_are_ignored() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let record = fixtures::attempt_record("ana", "alg-1", 1, fixtures::minutes(0));

    server
        .post("/api/events")
        .json(&fixtures::events_request(vec![record.clone()]))
        .await
        .assert_status_ok();
    let response = server
        .post("/api/events")
        .json(&fixtures::events_request(vec![record]))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["appended"], 0);
    assert_eq!(body["duplicates"], 1);
    assert_eq!(body["total"], 1);
}

/// Test an unknown schema version rejects the whole batch.
#[tokio::test]
async fn test_unknown_schema_version_rejects_batch() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let mut future = fixtures::attempt_record("ana", "alg-1", 1, fixtures::minutes(1));
    future["schema_version"] = json!(7);

    let response = server
        .post("/api/events")
        .json(&fixtures::events_request(vec![
            fixtures::attempt_record("ana", "alg-1", 1, fixtures::minutes(0)),
            future,
        ]))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "validation_error");
    assert_eq!(ctx.event_count().await, 0);
}

/// Test corrections replace the category of the attempt they supersede.
#[tokio::test]
async fn test_correction_applies_to_effective_attempts() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let attempt = fixtures::attempt_record("ben", "geo-1", 0, fixtures::minutes(0));
    let correction = fixtures::correction_record("ben", &attempt["record_id"], 1, fixtures::minutes(5));

    server
        .post("/api/events")
        .json(&fixtures::events_request(vec![attempt, correction]))
        .await
        .assert_status_ok();

    let attempts = ctx.state.events.read().await.effective_attempts_for("ben");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].category, 1);
}

/// Test malformed JSON uses the API error body.
#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server.post("/api/events").json(&json!({ "rows": [] })).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "bad_request");
}
