//! Cross-topic scheduling endpoints

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use chrono::Utc;

use crate::error::Result;
use crate::models::*;
use crate::AppState;

/// POST /api/topics/plan
pub async fn plan(
    State(state): State<AppState>,
    payload: std::result::Result<Json<TopicPlanRequest>, JsonRejection>,
) -> Result<Json<SessionPlan>> {
    let Json(payload) = payload?;
    let plan = state
        .engine
        .topics
        .plan_session(&payload.arms, payload.budget_minutes, payload.seed)?;
    Ok(Json(plan))
}

/// POST /api/topics/select
pub async fn select(
    State(state): State<AppState>,
    payload: std::result::Result<Json<TopicSelectRequest>, JsonRejection>,
) -> Result<Json<TopicChoice>> {
    let Json(payload) = payload?;
    let choice = state.engine.topics.select_arm(
        &payload.arms,
        &payload.spent,
        payload.budget_minutes,
        payload.seed,
        payload.now.unwrap_or_else(Utc::now),
    )?;
    Ok(Json(choice))
}

/// POST /api/topics/observe
pub async fn observe(payload: std::result::Result<Json<TopicObserveRequest>, JsonRejection>) -> Result<Json<Arm>> {
    let Json(payload) = payload?;
    let mut arm = payload.arm;
    arm.observe(payload.delta_se, payload.minutes, payload.at.unwrap_or_else(Utc::now))?;
    Ok(Json(arm))
}

/// POST /api/topics/reset
pub async fn reset(payload: std::result::Result<Json<TopicResetRequest>, JsonRejection>) -> Result<Json<Arm>> {
    let Json(payload) = payload?;
    let mut arm = payload.arm;
    arm.reset();
    Ok(Json(arm))
}
