//! Retention lane: half-life memory model with spaced reviews.
//!
//! Recall decays as R(t) = 2^(-t / h) for half-life h (hours). A review with
//! rating g updates h' = h * m_g^(1 / (1 + damping * reviews)), so early
//! reviews move the half-life most. Successful reviews of a partly forgotten
//! objective earn a spacing bonus of (1 + spacing_bonus * (1 - R)).
//! The next review is due when R falls to the target retention:
//! interval = h * log2(1 / target).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, RatingTable, RetentionConfig};
use crate::error::ValidationError;
use crate::lane::LaneEvent;
use crate::types::{LearnerId, ObjectiveId, Rating};

/// Per learner and objective memory state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryState {
    pub learner_id: LearnerId,
    pub objective: ObjectiveId,
    pub half_life_hours: f64,
    pub last_reviewed_at: DateTime<Utc>,
    /// `None` while the state was seeded by training and never reviewed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rating: Option<Rating>,
    pub reviews: u32,
    pub lapses: u32,
    pub due_at: DateTime<Utc>,
}

impl MemoryState {
    fn hours_since_review(&self, now: DateTime<Utc>) -> f64 {
        (now.signed_duration_since(self.last_reviewed_at).num_seconds() as f64 / 3600.0).max(0.0)
    }

    /// Probability of recall at `now`.
    pub fn retrievability(&self, now: DateTime<Utc>) -> f64 {
        retrievability(self.hours_since_review(now), self.half_life_hours)
    }

    pub fn overdue_hours(&self, now: DateTime<Utc>) -> f64 {
        (now.signed_duration_since(self.due_at).num_seconds() as f64 / 3600.0).max(0.0)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now >= self.due_at
    }
}

/// R = 2^(-t/h)
pub fn retrievability(elapsed_hours: f64, half_life_hours: f64) -> f64 {
    if half_life_hours <= 0.0 {
        return 0.0;
    }
    (-elapsed_hours.max(0.0) / half_life_hours).exp2()
}

fn rating_value(table: &RatingTable, rating: Rating) -> f64 {
    match rating {
        Rating::Again => table.again,
        Rating::Hard => table.hard,
        Rating::Good => table.good,
        Rating::Easy => table.easy,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub state: MemoryState,
    pub next_review_at: DateTime<Utc>,
    pub interval_hours: f64,
    /// Recall probability at the moment of this review.
    pub retrievability: f64,
    pub events: Vec<LaneEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPriority {
    pub learner_id: LearnerId,
    pub objective: ObjectiveId,
    pub priority: f64,
    pub overdue_hours: f64,
    pub retrievability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPlan {
    pub selected: Vec<ReviewPriority>,
    pub deferred: Vec<ReviewPriority>,
    pub minutes_used: f64,
}

#[derive(Debug, Clone)]
pub struct RetentionScheduler {
    config: EngineConfig,
}

impl RetentionScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn retention(&self) -> &RetentionConfig {
        &self.config.retention
    }

    fn clamp_half_life(&self, hours: f64) -> f64 {
        hours.clamp(self.retention().min_half_life_hours, self.retention().max_half_life_hours)
    }

    /// Hours until recall falls to `target_retention`.
    pub fn interval_hours(&self, half_life_hours: f64, target_retention: f64) -> f64 {
        let raw = half_life_hours * (1.0 / target_retention).log2();
        raw.clamp(self.retention().min_interval_hours, self.retention().max_interval_hours)
    }

    fn outcome(&self, state: MemoryState, retrievability: f64, events: Vec<LaneEvent>) -> ReviewOutcome {
        let target = self.config.effective_for(&state.objective).target_retention;
        let interval_hours = self.interval_hours(state.half_life_hours, target);
        let next_review_at = state.last_reviewed_at + Duration::seconds((interval_hours * 3600.0) as i64);
        let state = MemoryState {
            due_at: next_review_at,
            ..state
        };
        ReviewOutcome {
            state,
            next_review_at,
            interval_hours,
            retrievability,
            events,
        }
    }

    /// First review of an objective with no memory state.
    pub fn first_review(
        &self,
        learner_id: impl Into<LearnerId>,
        objective: impl Into<ObjectiveId>,
        rating: Rating,
        now: DateTime<Utc>,
    ) -> ReviewOutcome {
        let half_life = self.clamp_half_life(rating_value(&self.retention().initial_half_life_hours, rating));
        let state = MemoryState {
            learner_id: learner_id.into(),
            objective: objective.into(),
            half_life_hours: half_life,
            last_reviewed_at: now,
            last_rating: Some(rating),
            reviews: 1,
            lapses: u32::from(rating.is_lapse()),
            due_at: now,
        };
        self.outcome(state, 1.0, Vec::new())
    }

    /// Apply a review rating at `now`.
    pub fn schedule_review(
        &self,
        state: &MemoryState,
        rating: Rating,
        now: DateTime<Utc>,
    ) -> Result<ReviewOutcome, ValidationError> {
        if now < state.last_reviewed_at {
            return Err(ValidationError::InvalidObservation(format!(
                "review at {} predates last review at {}",
                now, state.last_reviewed_at
            )));
        }
        let config = self.retention();
        let recall = state.retrievability(now);
        let overdue_hours = state.overdue_hours(now);

        let exponent = 1.0 / (1.0 + config.damping * state.reviews as f64);
        let mut half_life = state.half_life_hours * rating_value(&config.growth, rating).powf(exponent);
        if matches!(rating, Rating::Good | Rating::Easy) {
            half_life *= 1.0 + config.spacing_bonus * (1.0 - recall);
        }

        let mut events = Vec::new();
        if rating.is_lapse() {
            events.push(LaneEvent::ObjectiveForgotten {
                learner_id: state.learner_id.clone(),
                objective: state.objective.clone(),
                overdue_hours,
                at: now,
            });
        }

        let next = MemoryState {
            half_life_hours: self.clamp_half_life(half_life),
            last_reviewed_at: now,
            last_rating: Some(rating),
            reviews: state.reviews.saturating_add(1),
            lapses: state.lapses + u32::from(rating.is_lapse()),
            ..state.clone()
        };
        tracing::debug!(
            learner = %state.learner_id,
            objective = %state.objective,
            rating = rating.to_value(),
            half_life = next.half_life_hours,
            "review scheduled"
        );
        Ok(self.outcome(next, recall, events))
    }

    /// Seed a memory state from a mastered objective. Existing states win;
    /// the retention lane never resets what it already tracks.
    pub fn seed_from_mastery(&self, existing: Option<&MemoryState>, event: &LaneEvent) -> Option<MemoryState> {
        let LaneEvent::ObjectiveMastered {
            learner_id,
            objective,
            at,
            ..
        } = event
        else {
            return None;
        };
        if existing.is_some() {
            return None;
        }
        let state = MemoryState {
            learner_id: learner_id.clone(),
            objective: objective.clone(),
            half_life_hours: self.clamp_half_life(self.retention().initial_half_life_hours.good),
            last_reviewed_at: *at,
            last_rating: None,
            reviews: 0,
            lapses: 0,
            due_at: *at,
        };
        Some(self.outcome(state, 1.0, Vec::new()).state)
    }

    /// (1 - R(now)) plus a boost proportional to overdue time in half-lives.
    pub fn priority(&self, state: &MemoryState, now: DateTime<Utc>) -> ReviewPriority {
        let recall = state.retrievability(now);
        let overdue_hours = state.overdue_hours(now);
        let boost = self.retention().overdue_boost * overdue_hours / state.half_life_hours.max(f64::MIN_POSITIVE);
        ReviewPriority {
            learner_id: state.learner_id.clone(),
            objective: state.objective.clone(),
            priority: (1.0 - recall) + boost,
            overdue_hours,
            retrievability: recall,
        }
    }

    /// Highest-priority overdue reviews that fit in `budget_minutes`
    /// (all overdue reviews when no budget is given).
    pub fn plan_reviews(&self, states: &[MemoryState], budget_minutes: Option<f64>, now: DateTime<Utc>) -> ReviewPlan {
        let mut due: Vec<ReviewPriority> = states
            .iter()
            .filter(|s| s.is_overdue(now))
            .map(|s| self.priority(s, now))
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| a.objective.cmp(&b.objective))
                .then_with(|| a.learner_id.cmp(&b.learner_id))
        });

        let cost = self.retention().review_minutes;
        let mut plan = ReviewPlan {
            selected: Vec::new(),
            deferred: Vec::new(),
            minutes_used: 0.0,
        };
        for review in due {
            let fits = budget_minutes.map_or(true, |budget| plan.minutes_used + cost <= budget + 1e-9);
            if fits {
                plan.minutes_used += cost;
                plan.selected.push(review);
            } else {
                plan.deferred.push(review);
            }
        }
        plan
    }
}
