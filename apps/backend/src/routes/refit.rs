//! Refit endpoints

use axum::{extract::rejection::JsonRejection, extract::State, Json};

use crate::error::Result;
use crate::models::{RefitAbortResponse, RefitRequest, RefitResponse};
use crate::services::refit;
use crate::AppState;

/// POST /api/refit
pub async fn start(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RefitRequest>, JsonRejection>,
) -> Result<Json<RefitResponse>> {
    let Json(payload) = payload?;
    Ok(Json(refit::run(&state, payload.seed).await?))
}

/// POST /api/refit/abort
pub async fn abort(State(state): State<AppState>) -> Json<RefitAbortResponse> {
    Json(RefitAbortResponse {
        aborting: state.refit.request_abort(),
    })
}
