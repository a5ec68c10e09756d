//! Test fixtures and factory functions for creating test data.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use adaptive_core::ItemParameters;
use adaptive_engine_backend::models::SessionState;
use adaptive_engine_backend::services::bootstrap::{Bootstrap, BootstrapItem};

/// Fixed reference time so tests do not depend on the clock.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn minutes(n: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(n)
}

fn item(id: &str, objective: &str, domain: &str, params: ItemParameters) -> BootstrapItem {
    BootstrapItem {
        id: id.to_string(),
        objectives: vec![objective.to_string()],
        domain: domain.to_string(),
        params,
    }
}

/// Six algebra items, four geometry items and one three-category essay item.
pub fn sample_bank() -> Bootstrap {
    let mut items: Vec<BootstrapItem> = (0..6)
        .map(|i| {
            item(
                &format!("alg-{}", i + 1),
                "linear-equations",
                "algebra",
                ItemParameters::rasch(-1.5 + 0.5 * i as f64),
            )
        })
        .collect();
    items.extend((0..4).map(|i| {
        item(
            &format!("geo-{}", i + 1),
            "angles",
            "geometry",
            ItemParameters::rasch(-0.75 + 0.5 * i as f64),
        )
    }));
    items.push(item(
        "essay-1",
        "argument",
        "writing",
        ItemParameters::gpcm(0.2, vec![-0.7, 0.7], 1.0),
    ));
    Bootstrap { items }
}

pub fn new_session() -> SessionState {
    SessionState::new(Uuid::new_v4(), t0())
}

/// Create an ability update request body.
pub fn ability_update_request(learner_id: &str, item_id: &str, category: u8, at: DateTime<Utc>) -> Value {
    json!({
        "learner_id": learner_id,
        "item_id": item_id,
        "category": category,
        "occurred_at": at,
    })
}

/// Same as `ability_update_request`, continuing from a previous state.
pub fn ability_update_from(state: &Value, item_id: &str, category: u8, at: DateTime<Utc>) -> Value {
    json!({
        "learner_id": state["learner_id"],
        "state": state,
        "item_id": item_id,
        "category": category,
        "occurred_at": at,
    })
}

/// Create a current-schema attempt record.
pub fn attempt_record(learner_id: &str, item_id: &str, category: u8, at: DateTime<Utc>) -> Value {
    json!({
        "schema_version": 2,
        "record_id": Uuid::new_v4(),
        "learner_id": learner_id,
        "occurred_at": at,
        "type": "attempt",
        "item_id": item_id,
        "category": category,
    })
}

/// Create a version 1 attempt record with a boolean outcome.
pub fn legacy_attempt_record(learner_id: &str, item_id: &str, correct: bool, at: DateTime<Utc>) -> Value {
    json!({
        "schema_version": 1,
        "record_id": Uuid::new_v4(),
        "learner_id": learner_id,
        "occurred_at": at,
        "type": "attempt",
        "item_id": item_id,
        "correct": correct,
    })
}

pub fn correction_record(learner_id: &str, supersedes: &Value, category: u8, at: DateTime<Utc>) -> Value {
    json!({
        "schema_version": 2,
        "record_id": Uuid::new_v4(),
        "learner_id": learner_id,
        "occurred_at": at,
        "type": "correction",
        "supersedes": supersedes,
        "category": category,
    })
}

pub fn events_request(records: Vec<Value>) -> Value {
    json!({ "records": records })
}

/// Attempts from `learners` learners on every Rasch item; stronger learners
/// (higher index) answer more items correctly.
pub fn calibration_records(learners: usize) -> Vec<Value> {
    let items: Vec<String> = sample_bank()
        .items
        .into_iter()
        .filter(|i| i.id != "essay-1")
        .map(|i| i.id)
        .collect();
    let mut records = Vec::new();
    for learner in 0..learners {
        for (k, item_id) in items.iter().enumerate() {
            let correct = (learner + k) % 3 != 0 || learner >= learners / 2;
            records.push(attempt_record(
                &format!("cal-{:03}", learner),
                item_id,
                u8::from(correct),
                minutes((learner * 20 + k) as i64),
            ));
        }
    }
    records
}

pub fn arm(topic: &str) -> Value {
    json!({
        "topic": topic,
        "pulls": 0,
        "minutes": 0.0,
        "reward_sum": 0.0,
        "reward_sq_sum": 0.0,
    })
}

/// A blueprint with one weighted entry per domain.
pub fn blueprint(length: usize, domains: &[(&str, f64)]) -> Value {
    let domains: Vec<Value> = domains
        .iter()
        .map(|(domain, weight)| json!({ "domain": domain, "weight": weight, "tolerance": 0 }))
        .collect();
    json!({ "length": length, "domains": domains })
}
