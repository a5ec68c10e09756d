//! Cross-topic scheduling API tests.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::fixtures;
use common::TestContext;

/// Test a session plan honours the share rails.
#[tokio::test]
async fn test_plan_respects_shares() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/api/topics/plan")
        .json(&json!({
            "arms": [fixtures::arm("angles"), fixtures::arm("fractions"), fixtures::arm("ratios")],
            "budget_minutes": 60.0,
            "seed": 4,
        }))
        .await;

    response.assert_status_ok();
    let plan: Value = response.json();
    let by_topic = plan["minutes_by_topic"].as_object().unwrap();
    assert_eq!(by_topic.len(), 3);
    for minutes in by_topic.values() {
        let minutes = minutes.as_f64().unwrap();
        assert!(minutes >= 6.0 && minutes <= 36.0);
    }
    assert_eq!(plan["slots"].as_array().unwrap().len(), 6);
    assert_eq!(plan["unallocated_minutes"], 0.0);
}

/// Test the same seed gives the same plan.
#[tokio::test]
async fn test_plan_is_seeded() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let request = json!({
        "arms": [fixtures::arm("angles"), fixtures::arm("fractions")],
        "budget_minutes": 40.0,
        "seed": 11,
    });

    let first: Value = server.post("/api/topics/plan").json(&request).await.json();
    let second: Value = server.post("/api/topics/plan").json(&request).await.json();

    assert_eq!(first, second);
}

/// Test a starved topic is served first.
#[tokio::test]
async fn test_select_serves_starved_topic() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/api/topics/select")
        .json(&json!({
            "arms": [fixtures::arm("angles"), fixtures::arm("fractions")],
            "spent": { "angles": 20.0 },
            "budget_minutes": 60.0,
            "seed": 2,
            "now": fixtures::t0(),
        }))
        .await;

    response.assert_status_ok();
    let choice: Value = response.json();
    assert_eq!(choice["topic"], "fractions");
    assert_eq!(choice["min_share_enforced"], true);
    assert_eq!(choice["draws"].as_array().unwrap().len(), 2);
}

/// Test observing a slot updates the arm statistics.
#[tokio::test]
async fn test_observe_updates_arm() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/api/topics/observe")
        .json(&json!({
            "arm": fixtures::arm("angles"),
            "delta_se": 0.12,
            "minutes": 10.0,
            "at": fixtures::t0(),
        }))
        .await;

    response.assert_status_ok();
    let arm: Value = response.json();
    assert_eq!(arm["pulls"], 1);
    assert_eq!(arm["minutes"], 10.0);
    assert!(arm["reward_sum"].as_f64().unwrap() > 0.0);

    let reset: Value = server
        .post("/api/topics/reset")
        .json(&json!({ "arm": arm }))
        .await
        .json();
    assert_eq!(reset["pulls"], 0);
    assert_eq!(reset["topic"], "angles");
}

/// Test a non-positive slot length is rejected.
#[tokio::test]
async fn test_invalid_observation() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/api/topics/observe")
        .json(&json!({ "arm": fixtures::arm("angles"), "delta_se": 0.1, "minutes": 0.0 }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

/// Test planning without arms is an empty pool.
#[tokio::test]
async fn test_plan_without_arms() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/api/topics/plan")
        .json(&json!({ "arms": [], "budget_minutes": 30.0, "seed": 1 }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
}
