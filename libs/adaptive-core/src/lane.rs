//! One-directional handoff events between the training and retention lanes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{LearnerId, ObjectiveId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LaneEvent {
    /// Training reached mastery; the retention lane seeds a memory state.
    ObjectiveMastered {
        learner_id: LearnerId,
        objective: ObjectiveId,
        mastery_probability: f64,
        at: DateTime<Utc>,
    },
    /// A review lapsed; the objective re-enters the training pool.
    ObjectiveForgotten {
        learner_id: LearnerId,
        objective: ObjectiveId,
        overdue_hours: f64,
        at: DateTime<Utc>,
    },
}

impl LaneEvent {
    pub fn objective(&self) -> &str {
        match self {
            Self::ObjectiveMastered { objective, .. } | Self::ObjectiveForgotten { objective, .. } => {
                objective
            }
        }
    }

    pub fn learner_id(&self) -> &str {
        match self {
            Self::ObjectiveMastered { learner_id, .. }
            | Self::ObjectiveForgotten { learner_id, .. } => learner_id,
        }
    }
}
