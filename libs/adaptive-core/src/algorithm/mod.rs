//! Measurement and scheduling algorithms.
//!
//! Every operation here is a pure function of its inputs: learner state is
//! passed in and a new state is returned. Randomised steps take an explicit
//! seed so the host can reproduce any decision.

pub mod ability;
pub mod elo;
pub mod exposure;
pub mod measurement;
pub mod retention;
pub mod selector;
pub mod topics;

pub use ability::{
    mastery_probability, stop_reason, AbilityState, AbilityUpdate, AbilityUpdater, ObjectiveAbility,
    ObjectiveProgress, QuadratureGrid, StopReason, ThetaEstimate,
};
pub use exposure::{exposure_multiplier, ExposureController};
pub use measurement::ResponseModel;
pub use retention::{retrievability, MemoryState, RetentionScheduler, ReviewOutcome, ReviewPlan, ReviewPriority};
pub use selector::{ItemSelector, ScoreBreakdown, Selection};
pub use topics::{Arm, SessionPlan, TopicChoice, TopicScheduler};
