//! Retention scheduling API tests.

mod common;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use common::fixtures;
use common::TestContext;

fn due_at(outcome: &Value) -> DateTime<Utc> {
    serde_json::from_value(outcome["next_review_at"].clone()).unwrap()
}

/// Test a first review creates a memory state due in the future.
#[tokio::test]
async fn test_first_review() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/api/review/schedule")
        .json(&json!({
            "learner_id": "ana",
            "objective": "angles",
            "rating": "good",
            "now": fixtures::t0(),
        }))
        .await;

    response.assert_status_ok();
    let outcome: Value = response.json();
    assert_eq!(outcome["state"]["reviews"], 1);
    assert!(due_at(&outcome) > fixtures::t0());
    assert_eq!(outcome["events"].as_array().unwrap().len(), 0);
}

/// Test a successful review lengthens the interval and a lapse emits a
/// forgotten event.
#[tokio::test]
async fn test_review_sequence() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let first: Value = server
        .post("/api/review/schedule")
        .json(&json!({ "learner_id": "ana", "objective": "angles", "rating": "good", "now": fixtures::t0() }))
        .await
        .json();

    let second: Value = server
        .post("/api/review/schedule")
        .json(&json!({
            "learner_id": "ana",
            "objective": "angles",
            "state": first["state"],
            "rating": "good",
            "now": due_at(&first),
        }))
        .await
        .json();
    assert!(second["interval_hours"].as_f64().unwrap() > first["interval_hours"].as_f64().unwrap());

    let lapse: Value = server
        .post("/api/review/schedule")
        .json(&json!({
            "learner_id": "ana",
            "objective": "angles",
            "state": second["state"],
            "rating": "again",
            "now": due_at(&second),
        }))
        .await
        .json();
    assert_eq!(lapse["events"][0]["event"], "objective_forgotten");
    assert_eq!(lapse["state"]["lapses"], 1);
}

/// Test only overdue states are planned, within the minute budget.
#[tokio::test]
async fn test_review_plan_budget() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let mut states = Vec::new();
    for objective in ["angles", "fractions", "ratios"] {
        let outcome: Value = server
            .post("/api/review/schedule")
            .json(&json!({ "learner_id": "ana", "objective": objective, "rating": "hard", "now": fixtures::t0() }))
            .await
            .json();
        states.push(outcome["state"].clone());
    }

    let response = server
        .post("/api/review/plan")
        .json(&json!({
            "states": states,
            "budget_minutes": 4.0,
            "now": fixtures::minutes(60 * 24 * 7),
        }))
        .await;

    response.assert_status_ok();
    let plan: Value = response.json();
    assert_eq!(plan["selected"].as_array().unwrap().len(), 2);
    assert_eq!(plan["deferred"].as_array().unwrap().len(), 1);
    assert_eq!(plan["minutes_used"], 4.0);
}

/// Test mastery seeds a memory state only when none exists.
#[tokio::test]
async fn test_seed_from_mastery() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let event = json!({
        "event": "objective_mastered",
        "learner_id": "ana",
        "objective": "angles",
        "mastery_probability": 0.97,
        "at": fixtures::t0(),
    });

    let seeded: Value = server
        .post("/api/review/seed")
        .json(&json!({ "event": event }))
        .await
        .json();
    assert_eq!(seeded["seeded"], true);
    assert_eq!(seeded["state"]["objective"], "angles");

    let again: Value = server
        .post("/api/review/seed")
        .json(&json!({ "existing": seeded["state"], "event": event }))
        .await
        .json();
    assert_eq!(again["seeded"], false);
    assert!(again.get("state").is_none());
}

/// Test numeric and right/wrong ratings map onto the four-point scale.
#[tokio::test]
async fn test_numeric_and_two_point_ratings() {
    let ctx = TestContext::new();
    let server = ctx.server();

    for (rating, expected) in [
        (json!(3), "good"),
        (json!(4), "easy"),
        (json!(true), "good"),
        (json!(false), "again"),
    ] {
        let response = server
            .post("/api/review/schedule")
            .json(&json!({ "learner_id": "ana", "objective": "angles", "rating": rating, "now": fixtures::t0() }))
            .await;
        response.assert_status_ok();
        let outcome: Value = response.json();
        assert_eq!(outcome["state"]["last_rating"], expected);
    }

    let response = server
        .post("/api/review/schedule")
        .json(&json!({ "learner_id": "ana", "objective": "angles", "rating": 7, "now": fixtures::t0() }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}
