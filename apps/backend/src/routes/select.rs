//! Item selection endpoint

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use chrono::Utc;

use crate::error::Result;
use crate::models::{SelectRequest, SelectResponse};
use crate::AppState;

/// POST /api/select
pub async fn select(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SelectRequest>, JsonRejection>,
) -> Result<Json<SelectResponse>> {
    let Json(payload) = payload?;
    let snapshot = state.snapshots.current();
    let pool = match &payload.pool {
        Some(ids) => state.catalog.resolve_all(ids.iter().map(String::as_str), &snapshot)?,
        None => state.catalog.calibrated_items(&snapshot),
    };

    let now = payload.now.unwrap_or_else(Utc::now);
    let selector = &state.engine.selector;
    let selection = selector.select_next_item(
        &payload.ability,
        &pool,
        &payload.session,
        &payload.exposure,
        payload.seed,
        now,
    )?;
    let session = payload.session.record_item(&selection.item);
    let exposure = payload
        .exposure
        .record_item(&selection.item, now, selector.exposure().cooldown());

    let times_shown = {
        let mut shown = state.shown.write().await;
        let count = shown.entry(selection.item.id.clone()).or_insert(0);
        *count += 1;
        *count
    };

    Ok(Json(SelectResponse {
        selection,
        session,
        exposure,
        times_shown,
        snapshot_version: snapshot.version(),
    }))
}
