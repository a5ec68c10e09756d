//! Ability updater: EAP estimation over a fixed quadrature grid.
//!
//! Each response multiplies a normal prior N(theta, se^2) by the item
//! likelihood; the posterior mean and SD become the new estimate. The grid's
//! abscissae are standardised and placed at theta + se * z, so the posterior
//! stays resolved however small the SE gets.
//! The first `bridge_responses` observations go through the rating-style
//! bridge instead, which avoids unstable posteriors from a flat start.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use super::elo::EloBridge;
use super::measurement;
use crate::catalog::ItemCatalog;
use crate::config::{AbilityConfig, EffectiveObjectiveSettings, EngineConfig};
use crate::error::{Result, ValidationError};
use crate::event::AttemptEvent;
use crate::lane::LaneEvent;
use crate::snapshot::ParameterSnapshot;
use crate::types::{Item, ItemId, ItemParameters, LearnerId, ObjectiveId, Response};

/// Fixed abscissae and weights used for numerical integration over theta.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureGrid {
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl QuadratureGrid {
    /// Equally spaced nodes on [min, max] with trapezoid weights summing to 1.
    pub fn uniform(points: usize, min: f64, max: f64) -> std::result::Result<Self, ValidationError> {
        if points < 2 || !min.is_finite() || !max.is_finite() || min >= max {
            return Err(ValidationError::InvalidConfig(format!(
                "quadrature grid of {} points over [{}, {}]",
                points, min, max
            )));
        }
        let step = (max - min) / (points - 1) as f64;
        let nodes: Vec<f64> = (0..points).map(|i| min + step * i as f64).collect();
        let mut weights = vec![1.0; points];
        weights[0] = 0.5;
        weights[points - 1] = 0.5;
        let total: f64 = weights.iter().sum();
        weights.iter_mut().for_each(|w| *w /= total);
        Ok(Self { nodes, weights })
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Normalised posterior weights for an unnormalised log density.
    pub fn posterior<F>(&self, log_density: F) -> Vec<f64>
    where
        F: Fn(f64) -> f64,
    {
        let logs: Vec<f64> = self
            .nodes
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| w.ln() + log_density(*x))
            .collect();
        normalise(&logs)
    }

    /// Mean and SD of a normalised posterior on this grid.
    pub fn moments(&self, posterior: &[f64]) -> (f64, f64) {
        weighted_moments(&self.nodes, posterior)
    }

    /// Posterior mean and SD for a N(mean, sd^2) prior times
    /// `log_likelihood`, with the nodes read as standard scores.
    pub fn normal_update<F>(&self, mean: f64, sd: f64, log_likelihood: F) -> (f64, f64)
    where
        F: Fn(f64) -> f64,
    {
        let points: Vec<f64> = self.nodes.iter().map(|z| mean + sd * z).collect();
        let logs: Vec<f64> = self
            .nodes
            .iter()
            .zip(&self.weights)
            .zip(&points)
            .map(|((z, w), x)| w.ln() - 0.5 * z * z + log_likelihood(*x))
            .collect();
        weighted_moments(&points, &normalise(&logs))
    }
}

fn normalise(logs: &[f64]) -> Vec<f64> {
    let max = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let raw: Vec<f64> = logs.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|r| r / total).collect()
}

fn weighted_moments(points: &[f64], posterior: &[f64]) -> (f64, f64) {
    let mean: f64 = points.iter().zip(posterior).map(|(x, p)| x * p).sum();
    let variance: f64 = points
        .iter()
        .zip(posterior)
        .map(|(x, p)| (x - mean).powi(2) * p)
        .sum();
    (mean, variance.max(0.0).sqrt())
}

pub(crate) fn normal_log_density(x: f64, mean: f64, sd: f64) -> f64 {
    -0.5 * ((x - mean) / sd).powi(2)
}

/// Point estimate and standard error of ability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThetaEstimate {
    pub theta: f64,
    pub se: f64,
    pub responses: u32,
}

/// Per-objective ability estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveAbility {
    pub objective: ObjectiveId,
    pub estimate: ThetaEstimate,
    /// Items administered since the objective was opened (or reopened).
    pub administered: u32,
    pub mastered: bool,
}

/// Diagnostic record of a recent response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentResponse {
    pub item_id: ItemId,
    pub objectives: Vec<ObjectiveId>,
    pub category: u8,
    pub at: DateTime<Utc>,
}

/// A learner's ability state: global estimate plus a bounded set of
/// per-objective estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityState {
    pub learner_id: LearnerId,
    pub global: ThetaEstimate,
    #[serde(default)]
    pub objectives: Vec<ObjectiveAbility>,
    #[serde(default)]
    pub history: VecDeque<RecentResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AbilityState {
    pub fn objective(&self, objective: &str) -> Option<&ObjectiveAbility> {
        self.objectives.iter().find(|o| o.objective == objective)
    }

    /// Estimate used to score an item tagged with `objectives`: the least
    /// certain known objective estimate, falling back to the global one.
    pub fn estimate_for(&self, objectives: &[ObjectiveId]) -> ThetaEstimate {
        objectives
            .iter()
            .filter_map(|o| self.objective(o))
            .filter(|o| o.estimate.responses > 0)
            .map(|o| o.estimate)
            .max_by(|a, b| a.se.total_cmp(&b.se))
            .unwrap_or(self.global)
    }
}

/// Why an objective no longer needs items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    PrecisionReached,
    ItemLimitReached,
}

/// Progress of one objective after an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveProgress {
    pub objective: ObjectiveId,
    pub theta: f64,
    pub se: f64,
    pub mastery_probability: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopReason>,
}

/// Result of applying one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityUpdate {
    pub state: AbilityState,
    pub progress: Vec<ObjectiveProgress>,
    pub events: Vec<LaneEvent>,
}

/// P(theta > threshold) under N(theta_hat, se^2).
pub fn mastery_probability(estimate: &ThetaEstimate, threshold: f64) -> f64 {
    match Normal::new(estimate.theta, estimate.se) {
        Ok(posterior) => 1.0 - posterior.cdf(threshold),
        Err(_) if estimate.theta > threshold => 1.0,
        Err(_) => 0.0,
    }
}

/// Stopping rule for one objective.
pub fn stop_reason(
    ability: &ObjectiveAbility,
    settings: &EffectiveObjectiveSettings,
) -> Option<StopReason> {
    if ability.estimate.responses > 0 && ability.estimate.se <= settings.stop_se {
        Some(StopReason::PrecisionReached)
    } else if ability.administered >= settings.max_items {
        Some(StopReason::ItemLimitReached)
    } else {
        None
    }
}

/// Deterministic ability updater.
#[derive(Debug, Clone)]
pub struct AbilityUpdater {
    config: EngineConfig,
    grid: QuadratureGrid,
    bridge: EloBridge,
}

impl AbilityUpdater {
    pub fn new(config: &EngineConfig) -> std::result::Result<Self, ValidationError> {
        let a = &config.ability;
        let grid = QuadratureGrid::uniform(a.quadrature_points, a.grid_min, a.grid_max)?;
        Ok(Self {
            config: config.clone(),
            grid,
            bridge: EloBridge::new(a.elo_k, a.elo_k_decay),
        })
    }

    fn ability_config(&self) -> &AbilityConfig {
        &self.config.ability
    }

    pub fn grid(&self) -> &QuadratureGrid {
        &self.grid
    }

    pub fn prior(&self) -> ThetaEstimate {
        ThetaEstimate {
            theta: self.ability_config().prior_mean,
            se: self.ability_config().prior_se,
            responses: 0,
        }
    }

    /// State for a learner with no history.
    pub fn initial_state(&self, learner_id: impl Into<LearnerId>) -> AbilityState {
        AbilityState {
            learner_id: learner_id.into(),
            global: self.prior(),
            objectives: Vec::new(),
            history: VecDeque::new(),
            updated_at: None,
        }
    }

    /// One estimation step: bridge while young, quadrature afterwards.
    pub fn step(&self, prior: &ThetaEstimate, params: &ItemParameters, response: Response) -> ThetaEstimate {
        if prior.responses < self.ability_config().bridge_responses {
            return self.bridge.update(prior, params, response);
        }

        let sd = prior.se.max(self.ability_config().min_se);
        let category = response.category as usize;
        let (theta, posterior_sd) = self
            .grid
            .normal_update(prior.theta, sd, |x| measurement::log_probability(params, x, category));

        ThetaEstimate {
            theta,
            se: posterior_sd.max(self.ability_config().min_se),
            responses: prior.responses + 1,
        }
    }

    /// Apply one response to `state`; the input is never modified.
    pub fn update(
        &self,
        state: &AbilityState,
        item: &Item,
        response: Response,
        at: DateTime<Utc>,
    ) -> std::result::Result<AbilityUpdate, ValidationError> {
        item.params.validate(&item.id)?;
        item.params.check_response(&item.id, response)?;
        if let Some(updated_at) = state.updated_at {
            if at < updated_at {
                return Err(ValidationError::InvalidObservation(format!(
                    "response at {} predates learner state at {}",
                    at, updated_at
                )));
            }
        }

        let config = self.ability_config();
        let new_objectives = item
            .objectives
            .iter()
            .filter(|o| state.objective(o).is_none())
            .count();
        if state.objectives.len() + new_objectives > config.max_objectives {
            return Err(ValidationError::TooManyObjectives {
                learner_id: state.learner_id.clone(),
                max: config.max_objectives,
            });
        }

        let mut next = state.clone();
        next.global = self.step(&state.global, &item.params, response);

        let mut progress = Vec::with_capacity(item.objectives.len());
        let mut events = Vec::new();
        for objective in &item.objectives {
            let index = match next.objectives.iter().position(|o| &o.objective == objective) {
                Some(index) => index,
                None => {
                    next.objectives.push(ObjectiveAbility {
                        objective: objective.clone(),
                        estimate: ThetaEstimate {
                            theta: state.global.theta,
                            se: config.prior_se,
                            responses: 0,
                        },
                        administered: 0,
                        mastered: false,
                    });
                    next.objectives.len() - 1
                }
            };

            let settings = self.config.effective_for(objective);
            let entry = &mut next.objectives[index];
            entry.estimate = self.step(&entry.estimate, &item.params, response);
            entry.administered += 1;

            let probability = mastery_probability(&entry.estimate, settings.mastery_threshold);
            if !entry.mastered && probability >= config.mastery_confidence {
                entry.mastered = true;
                events.push(LaneEvent::ObjectiveMastered {
                    learner_id: state.learner_id.clone(),
                    objective: objective.clone(),
                    mastery_probability: probability,
                    at,
                });
            }

            progress.push(ObjectiveProgress {
                objective: objective.clone(),
                theta: entry.estimate.theta,
                se: entry.estimate.se,
                mastery_probability: probability,
                stop: stop_reason(entry, &settings),
            });
        }

        next.history.push_back(RecentResponse {
            item_id: item.id.clone(),
            objectives: item.objectives.clone(),
            category: response.category,
            at,
        });
        while next.history.len() > config.history_len {
            next.history.pop_front();
        }
        next.updated_at = Some(at);

        tracing::debug!(
            learner = %state.learner_id,
            item = %item.id,
            theta = next.global.theta,
            se = next.global.se,
            "ability updated"
        );

        Ok(AbilityUpdate {
            state: next,
            progress,
            events,
        })
    }

    /// Reopen an objective for training after a lapse in review.
    pub fn apply_lane_event(&self, state: &AbilityState, event: &LaneEvent) -> AbilityState {
        let LaneEvent::ObjectiveForgotten { objective, .. } = event else {
            return state.clone();
        };
        let relearn_se = self.ability_config().relearn_se;
        let mut next = state.clone();
        let room = next.objectives.len() < self.ability_config().max_objectives;
        match next.objectives.iter_mut().find(|o| &o.objective == objective) {
            Some(entry) => {
                entry.estimate.se = entry.estimate.se.max(relearn_se);
                entry.administered = 0;
                entry.mastered = false;
            }
            None if room => {
                next.objectives.push(ObjectiveAbility {
                    objective: objective.clone(),
                    estimate: ThetaEstimate {
                        theta: state.global.theta,
                        se: relearn_se.max(self.ability_config().prior_se),
                        responses: 0,
                    },
                    administered: 0,
                    mastered: false,
                });
            }
            None => {}
        }
        next
    }

    /// Progress report for one objective without applying a response.
    pub fn progress(&self, state: &AbilityState, objective: &str) -> Option<ObjectiveProgress> {
        let entry = state.objective(objective)?;
        let settings = self.config.effective_for(objective);
        Some(ObjectiveProgress {
            objective: entry.objective.clone(),
            theta: entry.estimate.theta,
            se: entry.estimate.se,
            mastery_probability: mastery_probability(&entry.estimate, settings.mastery_threshold),
            stop: stop_reason(entry, &settings),
        })
    }

    /// Rebuild a learner's state from scratch by replaying attempts in order.
    pub fn replay(
        &self,
        learner_id: &str,
        attempts: &[AttemptEvent],
        catalog: &ItemCatalog,
        snapshot: &ParameterSnapshot,
    ) -> Result<AbilityState> {
        let mut state = self.initial_state(learner_id);
        for attempt in attempts.iter().filter(|a| a.learner_id == learner_id) {
            let item = catalog.resolve(&attempt.item_id, snapshot)?;
            state = self
                .update(&state, &item, attempt.response(), attempt.occurred_at)?
                .state;
        }
        Ok(state)
    }
}
