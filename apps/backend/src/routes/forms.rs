//! Form assembly endpoint

use adaptive_core::build_form;
use axum::{extract::rejection::JsonRejection, extract::State, Json};

use crate::error::Result;
use crate::models::{FormBuildRequest, FormBuildResponse};
use crate::AppState;

/// POST /api/forms/build
pub async fn build(
    State(state): State<AppState>,
    payload: std::result::Result<Json<FormBuildRequest>, JsonRejection>,
) -> Result<Json<FormBuildResponse>> {
    let Json(payload) = payload?;
    let snapshot = state.snapshots.current();
    let pool = match &payload.pool {
        Some(ids) => state.catalog.resolve_all(ids.iter().map(String::as_str), &snapshot)?,
        None => state.catalog.calibrated_items(&snapshot),
    };
    let form = build_form(&payload.blueprint, &pool)?;

    Ok(Json(FormBuildResponse {
        form,
        snapshot_version: snapshot.version(),
    }))
}
