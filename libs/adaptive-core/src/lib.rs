//! Adaptive item-scheduling engine shared by the host service.
//!
//! Provides:
//! - GPCM/Rasch measurement with EAP ability tracking per objective
//! - Exposure-controlled randomesque item selection
//! - Thompson-sampling topic allocation under share rails
//! - Half-life retention scheduling and review planning
//! - Blueprint-constrained form assembly
//! - Versioned event records and offline parameter refits

pub mod algorithm;
pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod form;
pub mod lane;
pub mod refit;
pub mod snapshot;
pub mod types;

pub use algorithm::{
    AbilityState, AbilityUpdate, AbilityUpdater, ItemSelector, MemoryState, RetentionScheduler, Selection,
    StopReason, ThetaEstimate, TopicScheduler,
};
pub use catalog::{CatalogEntry, ItemCatalog};
pub use config::{EngineConfig, ObjectiveOverrides};
pub use error::{EngineError, Result, ValidationError};
pub use event::{AttemptEvent, EventBody, EventLog, EventRecord};
pub use form::{build_form, check_feasibility, Blueprint, Form, InfeasibilityReport};
pub use lane::LaneEvent;
pub use refit::{AbortSignal, NeverAbort, RefitDiagnostics, RefitJob, RefitOutcome};
pub use snapshot::{ParameterSnapshot, SnapshotStore};
pub use types::{
    DomainId, ExposureState, Item, ItemId, ItemParameters, LearnerId, ObjectiveId, Rating, Response,
    SessionState,
};
