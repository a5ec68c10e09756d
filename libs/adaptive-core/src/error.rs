//! Error types for adaptive-core.

use thiserror::Error;

use crate::form::InfeasibilityReport;

/// Result type alias using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Malformed input, always rejected before any state is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("item {item_id}: {categories} response categories, at least 2 required")]
    TooFewCategories { item_id: String, categories: usize },

    #[error("item {item_id}: declared {declared} categories but parameters describe {actual}")]
    CategoryMismatch {
        item_id: String,
        declared: usize,
        actual: usize,
    },

    #[error("item {item_id}: thresholds must be finite and non-decreasing")]
    MalformedThresholds { item_id: String },

    #[error("item {item_id}: difficulty {value} is not finite")]
    InvalidDifficulty { item_id: String, value: f64 },

    #[error("item {item_id}: discrimination {value} must be finite and positive")]
    InvalidDiscrimination { item_id: String, value: f64 },

    #[error("item {item_id}: response category {category} outside 0..{categories}")]
    ResponseOutOfRange {
        item_id: String,
        category: u8,
        categories: usize,
    },

    #[error("ability value {0} is not finite")]
    NonFiniteAbility(f64),

    #[error("learner {learner_id} already tracks the maximum of {max} objectives")]
    TooManyObjectives { learner_id: String, max: usize },

    #[error("unrecognized schema version {version}")]
    UnknownSchemaVersion { version: u64 },

    #[error("malformed event record: {0}")]
    MalformedRecord(String),

    #[error("malformed blueprint: {0}")]
    MalformedBlueprint(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid observation: {0}")]
    InvalidObservation(String),
}

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("blueprint cannot be satisfied: {0}")]
    Infeasible(InfeasibilityReport),

    #[error("no eligible {context} after cooldown relaxation")]
    EmptyPool { context: String },

    #[error("item {0} is not present in the catalog or active snapshot")]
    UnknownItem(String),

    #[error("refit aborted after {iterations} EM iterations")]
    RefitAborted { iterations: usize },

    #[error("snapshot version {proposed} does not supersede active version {active}")]
    VersionConflict { active: u64, proposed: u64 },
}

impl EngineError {
    pub(crate) fn empty_pool(context: impl Into<String>) -> Self {
        Self::EmptyPool {
            context: context.into(),
        }
    }
}
