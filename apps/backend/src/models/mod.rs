//! API request and response types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

// Re-export shared types from adaptive-core
pub use adaptive_core::algorithm::ability::ObjectiveProgress;
pub use adaptive_core::algorithm::topics::{Arm, SessionPlan, TopicChoice};
pub use adaptive_core::algorithm::{MemoryState, ReviewOutcome, ReviewPlan, Selection};
pub use adaptive_core::form::{Blueprint, Form};
pub use adaptive_core::refit::RefitDiagnostics;
pub use adaptive_core::snapshot::{ReliabilitySummary, StaleSnapshotWarning};
pub use adaptive_core::{
    AbilityState, ExposureState, ItemId, LaneEvent, LearnerId, ObjectiveId, Rating, SessionState,
};

// === Snapshot ===

/// Summary of the active parameter snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub version: u64,
    pub fingerprint: String,
    pub items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibrated_through: Option<DateTime<Utc>>,
    pub reliability: ReliabilitySummary,
}

// === Events ===

/// Batch of raw event records, any supported schema version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEventsRequest {
    pub records: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEventsResponse {
    pub appended: usize,
    pub duplicates: usize,
    pub total: usize,
}

// === Ability ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityUpdateRequest {
    pub learner_id: LearnerId,
    /// Current state; a cold-start state is used when absent.
    #[serde(default)]
    pub state: Option<AbilityState>,
    pub item_id: ItemId,
    pub category: u8,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Snapshot version `state` was computed against.
    #[serde(default)]
    pub snapshot_version: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityUpdateResponse {
    pub record_id: Uuid,
    pub state: AbilityState,
    pub progress: Vec<ObjectiveProgress>,
    pub events: Vec<LaneEvent>,
    pub snapshot_version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<StaleSnapshotWarning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRequest {
    pub learner_id: LearnerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResponse {
    pub attempts: usize,
    pub state: AbilityState,
    pub snapshot_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityLaneRequest {
    pub state: AbilityState,
    pub event: LaneEvent,
}

// === Selection ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectRequest {
    pub ability: AbilityState,
    pub session: SessionState,
    /// The learner's exposure history across sessions; empty when absent.
    #[serde(default)]
    pub exposure: ExposureState,
    /// Eligible item ids; every calibrated catalog item when absent.
    #[serde(default)]
    pub pool: Option<Vec<ItemId>>,
    pub seed: u64,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectResponse {
    pub selection: Selection,
    /// Session state with the selected item recorded as answered.
    pub session: SessionState,
    /// Exposure history with the selected item recorded as shown.
    pub exposure: ExposureState,
    /// Times the selected item has been shown to any learner by this host.
    pub times_shown: u64,
    pub snapshot_version: u64,
}

// === Topics ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicPlanRequest {
    pub arms: Vec<Arm>,
    pub budget_minutes: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSelectRequest {
    pub arms: Vec<Arm>,
    #[serde(default)]
    pub spent: BTreeMap<ObjectiveId, f64>,
    pub budget_minutes: f64,
    pub seed: u64,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicObserveRequest {
    pub arm: Arm,
    /// Reduction in ability SE achieved by the slot.
    pub delta_se: f64,
    pub minutes: f64,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicResetRequest {
    pub arm: Arm,
}

// === Review ===

/// A review rating as a name (`"good"`), a 1-4 value, or a right/wrong flag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RatingInput {
    Named(Rating),
    Value(u8),
    Correct(bool),
}

impl RatingInput {
    pub fn resolve(self) -> Result<Rating, ApiError> {
        match self {
            Self::Named(rating) => Ok(rating),
            Self::Value(value) => Rating::from_value(value)
                .ok_or_else(|| ApiError::BadRequest(format!("rating {} outside 1-4", value))),
            Self::Correct(correct) => Ok(Rating::from_2point(correct)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewScheduleRequest {
    pub learner_id: LearnerId,
    pub objective: ObjectiveId,
    /// Absent for the first review of an objective.
    #[serde(default)]
    pub state: Option<MemoryState>,
    pub rating: RatingInput,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewPlanRequest {
    pub states: Vec<MemoryState>,
    #[serde(default)]
    pub budget_minutes: Option<f64>,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSeedRequest {
    #[serde(default)]
    pub existing: Option<MemoryState>,
    pub event: LaneEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSeedResponse {
    pub seeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<MemoryState>,
}

// === Forms ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormBuildRequest {
    pub blueprint: Blueprint,
    /// Candidate item ids; every calibrated catalog item when absent.
    #[serde(default)]
    pub pool: Option<Vec<ItemId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormBuildResponse {
    pub form: Form,
    pub snapshot_version: u64,
}

// === Refit ===

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefitRequest {
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefitResponse {
    pub previous_version: u64,
    pub version: u64,
    pub fingerprint: String,
    pub diagnostics: RefitDiagnostics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefitAbortResponse {
    pub aborting: bool,
}
