//! Retention scheduling endpoints

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use chrono::Utc;

use crate::error::{ApiError, Result};
use crate::models::*;
use crate::AppState;

/// POST /api/review/schedule
pub async fn schedule(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ReviewScheduleRequest>, JsonRejection>,
) -> Result<Json<ReviewOutcome>> {
    let Json(payload) = payload?;
    let now = payload.now.unwrap_or_else(Utc::now);
    let retention = &state.engine.retention;
    let rating = payload.rating.resolve()?;

    let outcome = match &payload.state {
        Some(memory) if memory.learner_id != payload.learner_id || memory.objective != payload.objective => {
            return Err(ApiError::BadRequest(format!(
                "memory state is for {}/{}, not {}/{}",
                memory.learner_id, memory.objective, payload.learner_id, payload.objective
            )));
        }
        Some(memory) => retention.schedule_review(memory, rating, now)?,
        None => retention.first_review(payload.learner_id, payload.objective, rating, now),
    };
    Ok(Json(outcome))
}

/// POST /api/review/plan
pub async fn plan(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ReviewPlanRequest>, JsonRejection>,
) -> Result<Json<ReviewPlan>> {
    let Json(payload) = payload?;
    if let Some(budget) = payload.budget_minutes {
        if !budget.is_finite() || budget < 0.0 {
            return Err(ApiError::BadRequest(format!("invalid review budget {}", budget)));
        }
    }
    let now = payload.now.unwrap_or_else(Utc::now);
    Ok(Json(state.engine.retention.plan_reviews(&payload.states, payload.budget_minutes, now)))
}

/// POST /api/review/seed
pub async fn seed(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ReviewSeedRequest>, JsonRejection>,
) -> Result<Json<ReviewSeedResponse>> {
    let Json(payload) = payload?;
    let seeded = state
        .engine
        .retention
        .seed_from_mastery(payload.existing.as_ref(), &payload.event);
    Ok(Json(ReviewSeedResponse {
        seeded: seeded.is_some(),
        state: seeded,
    }))
}
