//! Ability tracking endpoints

use adaptive_core::{EventBody, EventRecord, Response};
use axum::{extract::rejection::JsonRejection, extract::State, Json};
use chrono::Utc;

use crate::error::{ApiError, Result};
use crate::models::*;
use crate::AppState;

/// POST /api/ability/update
pub async fn update(
    State(state): State<AppState>,
    payload: std::result::Result<Json<AbilityUpdateRequest>, JsonRejection>,
) -> Result<Json<AbilityUpdateResponse>> {
    let Json(payload) = payload?;
    let snapshot = state.snapshots.current();
    let item = state.catalog.resolve(&payload.item_id, &snapshot)?;

    let current = match payload.state {
        Some(current) if current.learner_id != payload.learner_id => {
            return Err(ApiError::BadRequest(format!(
                "state belongs to learner {}, not {}",
                current.learner_id, payload.learner_id
            )));
        }
        Some(current) => current,
        None => state.engine.updater.initial_state(payload.learner_id.clone()),
    };

    let at = payload.occurred_at.unwrap_or_else(Utc::now);
    let response = Response::new(payload.category);
    let update = state.engine.updater.update(&current, &item, response, at)?;

    // Only a response the updater accepted is recorded.
    let mut record = EventRecord::attempt(payload.learner_id, item.id, item.objectives, response, at);
    if let EventBody::Attempt {
        duration_ms,
        session_id,
        ..
    } = &mut record.body
    {
        *duration_ms = payload.duration_ms;
        *session_id = payload.session_id;
    }
    let record_id = record.record_id;
    state.events.write().await.append(record)?;

    let warning = payload
        .snapshot_version
        .and_then(|version| state.snapshots.check_stale(version));

    Ok(Json(AbilityUpdateResponse {
        record_id,
        state: update.state,
        progress: update.progress,
        events: update.events,
        snapshot_version: snapshot.version(),
        warning,
    }))
}

/// POST /api/ability/replay
pub async fn replay(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ReplayRequest>, JsonRejection>,
) -> Result<Json<ReplayResponse>> {
    let Json(payload) = payload?;
    let attempts = state.events.read().await.effective_attempts_for(&payload.learner_id);
    let snapshot = state.snapshots.current();
    let ability = state
        .engine
        .updater
        .replay(&payload.learner_id, &attempts, &state.catalog, &snapshot)?;

    Ok(Json(ReplayResponse {
        attempts: attempts.len(),
        state: ability,
        snapshot_version: snapshot.version(),
    }))
}

/// POST /api/ability/lane
pub async fn lane(
    State(state): State<AppState>,
    payload: std::result::Result<Json<AbilityLaneRequest>, JsonRejection>,
) -> Result<Json<AbilityState>> {
    let Json(payload) = payload?;
    if payload.event.learner_id() != payload.state.learner_id {
        return Err(ApiError::BadRequest("lane event is for a different learner".to_string()));
    }
    Ok(Json(state.engine.updater.apply_lane_event(&payload.state, &payload.event)))
}
