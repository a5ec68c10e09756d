//! Item selection API tests.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use adaptive_core::AbilityUpdater;
use common::fixtures;
use common::TestContext;

fn cold_ability(learner_id: &str) -> Value {
    let updater = AbilityUpdater::new(&Default::default()).unwrap();
    serde_json::to_value(updater.initial_state(learner_id)).unwrap()
}

fn select_request(seed: u64, pool: Option<Vec<&str>>) -> Value {
    let mut request = json!({
        "ability": cold_ability("ana"),
        "session": fixtures::new_session(),
        "seed": seed,
        "now": fixtures::t0(),
    });
    if let Some(pool) = pool {
        request["pool"] = json!(pool);
    }
    request
}

/// Test the same seed selects the same item.
#[tokio::test]
async fn test_selection_is_seeded() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let request = select_request(17, None);

    let first: Value = server.post("/api/select").json(&request).await.json();
    let second: Value = server.post("/api/select").json(&request).await.json();

    assert_eq!(first["selection"]["item"]["id"], second["selection"]["item"]["id"]);
    assert_eq!(first["snapshot_version"], 1);
}

/// Test the returned session and exposure record the selected item.
#[tokio::test]
async fn test_selection_updates_session_and_exposure() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server.post("/api/select").json(&select_request(5, None)).await;

    response.assert_status_ok();
    let body: Value = response.json();
    let item_id = body["selection"]["item"]["id"].as_str().unwrap();
    assert_eq!(body["session"]["items_answered"], 1);
    assert_eq!(body["exposure"]["items"][item_id]["shown_count"], 1);
    assert_eq!(body["selection"]["times_shown_to_learner"], 0);
    assert_eq!(body["times_shown"], 1);
    assert!(body["selection"]["breakdown"]["utility"].as_f64().unwrap() > 0.0);
}

/// Test exposure history from an earlier session still applies in a new one.
#[tokio::test]
async fn test_exposure_carries_across_sessions() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let first: Value = server
        .post("/api/select")
        .json(&select_request(3, Some(vec!["geo-2"])))
        .await
        .json();

    let mut request = select_request(3, Some(vec!["geo-2"]));
    request["exposure"] = first["exposure"].clone();
    request["now"] = json!(fixtures::minutes(120));
    let second: Value = server.post("/api/select").json(&request).await.json();

    assert_eq!(second["session"]["items_answered"], 1);
    assert_eq!(second["selection"]["times_shown_to_learner"], 1);
    assert!(second["selection"]["breakdown"]["exposure_multiplier"].as_f64().unwrap() < 1.0);
    assert_eq!(second["exposure"]["items"]["geo-2"]["shown_count"], 2);
    assert_eq!(second["times_shown"], 2);
}

/// Test an explicit pool restricts the candidates.
#[tokio::test]
async fn test_explicit_pool() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let body: Value = server
        .post("/api/select")
        .json(&select_request(9, Some(vec!["geo-2"])))
        .await
        .json();

    assert_eq!(body["selection"]["item"]["id"], "geo-2");
    assert_eq!(body["selection"]["candidates_considered"], 1);
}

/// Test an empty pool is a conflict, not a server error.
#[tokio::test]
async fn test_empty_pool() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server.post("/api/select").json(&select_request(1, Some(vec![]))).await;

    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"], "empty_pool");
}

/// Test unknown pool ids are rejected.
#[tokio::test]
async fn test_unknown_pool_item() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/api/select")
        .json(&select_request(1, Some(vec!["alg-1", "nope"])))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}
