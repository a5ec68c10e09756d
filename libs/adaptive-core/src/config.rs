//! Engine configuration.
//!
//! Every tunable constant of the online path and the refit job lives here.
//! All sections default, so a partial JSON document is a valid config.
//! Per-objective overrides merge on top of the global values.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::ObjectiveId;

/// Ability updater settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbilityConfig {
    pub prior_mean: f64,
    pub prior_se: f64,
    pub quadrature_points: usize,
    /// Node range in prior SD units; each update centres the nodes on the
    /// current estimate.
    pub grid_min: f64,
    pub grid_max: f64,
    /// Responses handled by the rating-style bridge before quadrature takes over.
    pub bridge_responses: u32,
    pub elo_k: f64,
    pub elo_k_decay: f64,
    pub min_se: f64,
    pub mastery_threshold: f64,
    /// Mastery probability at which an objective counts as mastered.
    pub mastery_confidence: f64,
    pub stop_se: f64,
    pub max_items_per_objective: u32,
    pub history_len: usize,
    pub max_objectives: usize,
    /// SE an objective is reset to when it re-enters training.
    pub relearn_se: f64,
}

impl Default for AbilityConfig {
    fn default() -> Self {
        Self {
            prior_mean: 0.0,
            prior_se: 1.0,
            quadrature_points: 40,
            grid_min: -5.0,
            grid_max: 5.0,
            bridge_responses: 3,
            elo_k: 0.6,
            elo_k_decay: 0.5,
            min_se: 0.05,
            mastery_threshold: 0.0,
            mastery_confidence: 0.9,
            stop_se: 0.3,
            max_items_per_objective: 30,
            history_len: 20,
            max_objectives: 64,
            relearn_se: 0.8,
        }
    }
}

/// Exposure controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// Penalty added per recent exposure.
    pub count_penalty: f64,
    /// Time constant of the recency decay.
    pub recency_hours: f64,
    pub item_cooldown_minutes: i64,
    /// Items returned when every candidate is cooling down.
    pub fallback_size: usize,
    pub use_objective_exposure: bool,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            count_penalty: 0.25,
            recency_hours: 24.0,
            item_cooldown_minutes: 30,
            fallback_size: 3,
            use_objective_exposure: true,
        }
    }
}

/// Item selector utility weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub information_weight: f64,
    pub blueprint_weight: f64,
    pub fatigue_rate: f64,
    pub top_k: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            information_weight: 1.0,
            blueprint_weight: 0.5,
            fatigue_rate: 0.02,
            top_k: 5,
        }
    }
}

/// Cross-topic Thompson sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicSchedulerConfig {
    pub prior_mean: f64,
    pub prior_strength: f64,
    pub prior_shape: f64,
    pub prior_rate: f64,
    pub min_share: f64,
    pub max_share: f64,
    pub slot_minutes: f64,
    /// Most slots a single planned session may hold.
    pub max_slots: usize,
    pub arm_cooldown_minutes: i64,
}

impl Default for TopicSchedulerConfig {
    fn default() -> Self {
        Self {
            prior_mean: 0.0,
            prior_strength: 1.0,
            prior_shape: 1.0,
            prior_rate: 0.01,
            min_share: 0.1,
            max_share: 0.6,
            slot_minutes: 10.0,
            max_slots: 200,
            arm_cooldown_minutes: 0,
        }
    }
}

/// Half-life per rating, in hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingTable {
    pub again: f64,
    pub hard: f64,
    pub good: f64,
    pub easy: f64,
}

/// Retention scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub target_retention: f64,
    pub initial_half_life_hours: RatingTable,
    /// Multiplicative half-life change per rating before damping.
    pub growth: RatingTable,
    pub damping: f64,
    pub spacing_bonus: f64,
    pub min_half_life_hours: f64,
    pub max_half_life_hours: f64,
    pub min_interval_hours: f64,
    pub max_interval_hours: f64,
    pub overdue_boost: f64,
    pub review_minutes: f64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            target_retention: 0.9,
            initial_half_life_hours: RatingTable {
                again: 6.0,
                hard: 24.0,
                good: 72.0,
                easy: 168.0,
            },
            growth: RatingTable {
                again: 0.35,
                hard: 0.85,
                good: 2.2,
                easy: 3.5,
            },
            damping: 0.15,
            spacing_bonus: 0.5,
            min_half_life_hours: 1.0,
            max_half_life_hours: 24.0 * 3650.0,
            min_interval_hours: 1.0,
            max_interval_hours: 24.0 * 3650.0,
            overdue_boost: 1.0,
            review_minutes: 2.0,
        }
    }
}

/// Offline refit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefitConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Items with fewer responses are blended toward the previous snapshot.
    pub min_responses: usize,
    pub shrinkage_pseudo_count: f64,
    /// SD of the normal prior on step locations, centred on the previous value.
    pub prior_sd: f64,
    pub max_newton_step: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_responses_per_item: Option<usize>,
}

impl Default for RefitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-4,
            min_responses: 30,
            shrinkage_pseudo_count: 20.0,
            prior_sd: 1.0,
            max_newton_step: 1.0,
            max_responses_per_item: None,
        }
    }
}

/// Per-objective overrides (all fields optional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveOverrides {
    pub objective: ObjectiveId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_se: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mastery_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_retention: Option<f64>,
}

impl ObjectiveOverrides {
    /// Create overrides with only the objective set.
    pub fn new(objective: ObjectiveId) -> Self {
        Self {
            objective,
            stop_se: None,
            max_items: None,
            mastery_threshold: None,
            target_retention: None,
        }
    }
}

/// Effective settings for one objective (global merged with overrides).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveObjectiveSettings {
    pub stop_se: f64,
    pub max_items: u32,
    pub mastery_threshold: f64,
    pub target_retention: f64,
}

impl EffectiveObjectiveSettings {
    /// Merge global settings with optional objective overrides.
    pub fn merge(config: &EngineConfig, overrides: Option<&ObjectiveOverrides>) -> Self {
        let ability = &config.ability;
        let retention = &config.retention;
        match overrides {
            Some(o) => Self {
                stop_se: o.stop_se.unwrap_or(ability.stop_se),
                max_items: o.max_items.unwrap_or(ability.max_items_per_objective),
                mastery_threshold: o.mastery_threshold.unwrap_or(ability.mastery_threshold),
                target_retention: o.target_retention.unwrap_or(retention.target_retention),
            },
            None => Self {
                stop_se: ability.stop_se,
                max_items: ability.max_items_per_objective,
                mastery_threshold: ability.mastery_threshold,
                target_retention: retention.target_retention,
            },
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ability: AbilityConfig,
    pub exposure: ExposureConfig,
    pub selector: SelectorConfig,
    pub topics: TopicSchedulerConfig,
    pub retention: RetentionConfig,
    pub refit: RefitConfig,
    pub objectives: Vec<ObjectiveOverrides>,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ValidationError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn effective_for(&self, objective: &str) -> EffectiveObjectiveSettings {
        let overrides = self.objectives.iter().find(|o| o.objective == objective);
        EffectiveObjectiveSettings::merge(self, overrides)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |msg: &str| Err(ValidationError::InvalidConfig(msg.to_string()));

        let a = &self.ability;
        if a.quadrature_points < 2 || !(a.grid_min < a.grid_max) {
            return invalid("ability grid needs at least 2 points over a non-empty range");
        }
        if !(a.prior_se > 0.0) || !(a.min_se > 0.0) || !(a.relearn_se > 0.0) {
            return invalid("ability standard errors must be positive");
        }
        if !(a.mastery_confidence > 0.0 && a.mastery_confidence < 1.0) {
            return invalid("mastery_confidence must lie in (0, 1)");
        }
        if a.max_objectives == 0 {
            return invalid("max_objectives must be positive");
        }

        let e = &self.exposure;
        if !(e.count_penalty >= 0.0) || !(e.recency_hours > 0.0) || e.item_cooldown_minutes < 0 {
            return invalid("exposure penalty and recency must be non-negative");
        }

        let s = &self.selector;
        if s.top_k == 0 || !(s.fatigue_rate >= 0.0) {
            return invalid("selector top_k must be positive and fatigue_rate non-negative");
        }
        if !(s.information_weight >= 0.0) || !(s.blueprint_weight >= 0.0) {
            return invalid("selector weights must be non-negative");
        }

        let t = &self.topics;
        if !(t.prior_strength > 0.0 && t.prior_shape > 0.0 && t.prior_rate > 0.0) {
            return invalid("topic prior parameters must be positive");
        }
        if !(0.0 <= t.min_share && t.min_share <= t.max_share && t.max_share <= 1.0) {
            return invalid("topic shares must satisfy 0 <= min_share <= max_share <= 1");
        }
        if !(t.slot_minutes > 0.0) {
            return invalid("slot_minutes must be positive");
        }
        if t.max_slots == 0 {
            return invalid("max_slots must be positive");
        }

        let r = &self.retention;
        if !(r.target_retention > 0.0 && r.target_retention < 1.0) {
            return invalid("target_retention must lie in (0, 1)");
        }
        if !(r.min_half_life_hours > 0.0 && r.min_half_life_hours <= r.max_half_life_hours) {
            return invalid("half-life bounds are inconsistent");
        }
        if !(r.min_interval_hours > 0.0 && r.min_interval_hours <= r.max_interval_hours) {
            return invalid("interval bounds are inconsistent");
        }
        let g = &r.growth;
        if !(0.0 < g.again && g.again < 1.0 && 0.0 < g.hard && g.hard < 1.0) {
            return invalid("again/hard growth must shorten the half-life");
        }
        if !(1.0 < g.good && g.good <= g.easy) {
            return invalid("good/easy growth must lengthen the half-life");
        }

        let f = &self.refit;
        if f.max_iterations == 0 || !(f.tolerance > 0.0) || !(f.prior_sd > 0.0) {
            return invalid("refit iterations, tolerance and prior_sd must be positive");
        }

        for o in &self.objectives {
            if let Some(target) = o.target_retention {
                if !(target > 0.0 && target < 1.0) {
                    return Err(ValidationError::InvalidConfig(format!(
                        "objective {}: target_retention must lie in (0, 1)",
                        o.objective
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = EngineConfig::from_json_str(r#"{"selector": {"top_k": 3}}"#).unwrap();
        assert_eq!(config.selector.top_k, 3);
        assert_eq!(config.selector.blueprint_weight, 0.5);
        assert_eq!(config.ability.quadrature_points, 40);
    }

    #[test]
    fn invalid_shares_are_rejected() {
        let result = EngineConfig::from_json_str(r#"{"topics": {"min_share": 0.7, "max_share": 0.5}}"#);
        assert!(matches!(result, Err(ValidationError::InvalidConfig(_))));
    }

    #[test]
    fn objective_overrides_merge_over_global() {
        let mut config = EngineConfig::default();
        let mut overrides = ObjectiveOverrides::new("fractions".into());
        overrides.stop_se = Some(0.2);
        config.objectives.push(overrides);

        let effective = config.effective_for("fractions");
        assert_eq!(effective.stop_se, 0.2);
        assert_eq!(effective.max_items, config.ability.max_items_per_objective);

        let other = config.effective_for("decimals");
        assert_eq!(other.stop_se, config.ability.stop_se);
    }
}
