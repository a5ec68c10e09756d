//! Cross-topic scheduling with Thompson sampling.
//!
//! Each topic is an arm whose reward is standard-error reduction per minute
//! of study. Rewards are modelled as Normal with unknown mean and precision,
//! so each arm keeps a Normal-Gamma posterior built from sufficient
//! statistics. A draw samples the precision from Gamma(alpha, beta), then
//! the mean from Normal(mu, 1 / sqrt(kappa * tau)).
//!
//! Hard rails: arms below `min_share` of the session budget are served
//! first, arms that would exceed `max_share` are skipped, and arms pulled
//! within `arm_cooldown_minutes` are ineligible unless nothing else is.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Distribution;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Gamma, Normal};

use crate::config::TopicSchedulerConfig;
use crate::error::{EngineError, Result, ValidationError};
use crate::types::ObjectiveId;

/// Sufficient statistics of one topic's reward history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    pub topic: ObjectiveId,
    pub pulls: u64,
    pub minutes: f64,
    pub reward_sum: f64,
    pub reward_sq_sum: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pulled_at: Option<DateTime<Utc>>,
}

impl Arm {
    pub fn new(topic: impl Into<ObjectiveId>) -> Self {
        Self {
            topic: topic.into(),
            pulls: 0,
            minutes: 0.0,
            reward_sum: 0.0,
            reward_sq_sum: 0.0,
            last_pulled_at: None,
        }
    }

    /// Record `minutes` of study that reduced SE by `delta_se`.
    pub fn observe(&mut self, delta_se: f64, minutes: f64, at: DateTime<Utc>) -> std::result::Result<(), ValidationError> {
        if !delta_se.is_finite() || !minutes.is_finite() || minutes <= 0.0 {
            return Err(ValidationError::InvalidObservation(format!(
                "topic {}: delta_se {} over {} minutes",
                self.topic, delta_se, minutes
            )));
        }
        let reward = delta_se / minutes;
        self.pulls += 1;
        self.minutes += minutes;
        self.reward_sum += reward;
        self.reward_sq_sum += reward * reward;
        self.last_pulled_at = Some(self.last_pulled_at.map_or(at, |last| last.max(at)));
        Ok(())
    }

    /// Administrative reset; statistics are never cleared otherwise.
    pub fn reset(&mut self) {
        tracing::info!(topic = %self.topic, pulls = self.pulls, "arm statistics reset");
        *self = Self::new(std::mem::take(&mut self.topic));
    }

    pub fn mean_reward(&self) -> Option<f64> {
        (self.pulls > 0).then(|| self.reward_sum / self.pulls as f64)
    }

    pub fn posterior(&self, prior: &TopicSchedulerConfig) -> NormalGamma {
        let n = self.pulls as f64;
        if self.pulls == 0 {
            return NormalGamma {
                mu: prior.prior_mean,
                kappa: prior.prior_strength,
                alpha: prior.prior_shape,
                beta: prior.prior_rate,
            };
        }
        let mean = self.reward_sum / n;
        let squares = (self.reward_sq_sum - n * mean * mean).max(0.0);
        let kappa = prior.prior_strength + n;
        NormalGamma {
            mu: (prior.prior_strength * prior.prior_mean + n * mean) / kappa,
            kappa,
            alpha: prior.prior_shape + n / 2.0,
            beta: prior.prior_rate
                + squares / 2.0
                + prior.prior_strength * n * (mean - prior.prior_mean).powi(2) / (2.0 * kappa),
        }
    }

    fn cooling_down(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        cooldown > Duration::zero() && self.last_pulled_at.map_or(false, |at| at + cooldown > now)
    }
}

/// Normal-Gamma posterior over an arm's mean reward and precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalGamma {
    pub mu: f64,
    pub kappa: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl NormalGamma {
    /// One Thompson draw of the mean reward.
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> f64 {
        let tau = match Gamma::new(self.alpha, self.beta) {
            Ok(gamma) => gamma.sample(rng),
            Err(_) => return self.mu,
        };
        let sd = 1.0 / (self.kappa * tau).sqrt();
        match Normal::new(self.mu, sd) {
            Ok(normal) if sd.is_finite() => normal.sample(rng),
            _ => self.mu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmDraw {
    pub topic: ObjectiveId,
    pub sample: f64,
    pub posterior_mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicChoice {
    pub topic: ObjectiveId,
    pub draws: Vec<ArmDraw>,
    /// The choice was restricted to arms below their minimum share.
    pub min_share_enforced: bool,
    pub relaxed_cooldown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSlot {
    pub topic: ObjectiveId,
    pub minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPlan {
    pub slots: Vec<PlannedSlot>,
    pub minutes_by_topic: BTreeMap<ObjectiveId, f64>,
    /// Budget no arm could take without breaking its maximum share.
    pub unallocated_minutes: f64,
}

#[derive(Debug, Clone)]
pub struct TopicScheduler {
    config: TopicSchedulerConfig,
}

impl TopicScheduler {
    pub fn new(config: &TopicSchedulerConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn validate_arms(arms: &[Arm]) -> Result<()> {
        if arms.is_empty() {
            return Err(EngineError::empty_pool("topics"));
        }
        let mut seen = BTreeSet::new();
        for arm in arms {
            if !seen.insert(arm.topic.as_str()) {
                return Err(ValidationError::InvalidObservation(format!("duplicate topic arm {}", arm.topic)).into());
            }
        }
        Ok(())
    }

    fn validate_budget(budget_minutes: f64) -> Result<()> {
        if !budget_minutes.is_finite() || budget_minutes <= 0.0 {
            return Err(ValidationError::InvalidObservation(format!(
                "session budget of {} minutes",
                budget_minutes
            ))
            .into());
        }
        Ok(())
    }

    /// Choose the topic for the next `slot_minutes` of a session whose budget
    /// is `budget_minutes` and which has already spent `spent` per topic.
    pub fn select_arm(
        &self,
        arms: &[Arm],
        spent: &BTreeMap<ObjectiveId, f64>,
        budget_minutes: f64,
        seed: u64,
        now: DateTime<Utc>,
    ) -> Result<TopicChoice> {
        Self::validate_arms(arms)?;
        Self::validate_budget(budget_minutes)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.choose(arms, spent, budget_minutes, self.config.slot_minutes, &mut rng, Some(now))
            .ok_or_else(|| EngineError::empty_pool("topics within their maximum share"))
    }

    fn choose(
        &self,
        arms: &[Arm],
        spent: &BTreeMap<ObjectiveId, f64>,
        budget_minutes: f64,
        slot_minutes: f64,
        rng: &mut ChaCha8Rng,
        now: Option<DateTime<Utc>>,
    ) -> Option<TopicChoice> {
        let spent_on = |arm: &Arm| spent.get(&arm.topic).copied().unwrap_or(0.0);
        let max_minutes = self.config.max_share * budget_minutes;
        let min_minutes = self.config.min_share * budget_minutes;
        let within_cap: Vec<&Arm> = arms
            .iter()
            .filter(|arm| spent_on(arm) + slot_minutes <= max_minutes + 1e-9)
            .collect();
        if within_cap.is_empty() {
            return None;
        }

        let cooldown = Duration::minutes(self.config.arm_cooldown_minutes.max(0));
        let warm: Vec<&Arm> = within_cap
            .iter()
            .copied()
            .filter(|arm| now.map_or(true, |now| !arm.cooling_down(now, cooldown)))
            .collect();
        let relaxed_cooldown = warm.is_empty();
        let eligible = if relaxed_cooldown {
            tracing::warn!(arms = within_cap.len(), "all topics cooling down, relaxing");
            within_cap
        } else {
            warm
        };

        let starved: Vec<&Arm> = eligible
            .iter()
            .copied()
            .filter(|arm| spent_on(arm) < min_minutes)
            .collect();
        let min_share_enforced = !starved.is_empty();
        let candidates = if min_share_enforced { starved } else { eligible };

        // Draw for every arm so the RNG stream does not depend on the rails.
        let draws: Vec<ArmDraw> = arms
            .iter()
            .map(|arm| {
                let posterior = arm.posterior(&self.config);
                ArmDraw {
                    topic: arm.topic.clone(),
                    sample: posterior.sample(rng),
                    posterior_mean: posterior.mu,
                }
            })
            .collect();

        let best = candidates
            .iter()
            .filter_map(|arm| draws.iter().find(|d| d.topic == arm.topic))
            .max_by(|a, b| a.sample.total_cmp(&b.sample).then_with(|| b.topic.cmp(&a.topic)));
        let topic = best.map(|d| d.topic.clone())?;

        Some(TopicChoice {
            topic,
            draws,
            min_share_enforced,
            relaxed_cooldown,
        })
    }

    /// Split a whole session budget into slots by repeated draws.
    pub fn plan_session(&self, arms: &[Arm], budget_minutes: f64, seed: u64) -> Result<SessionPlan> {
        Self::validate_arms(arms)?;
        Self::validate_budget(budget_minutes)?;
        let needed = (budget_minutes / self.config.slot_minutes).ceil();
        if needed > self.config.max_slots as f64 {
            return Err(ValidationError::InvalidObservation(format!(
                "session budget of {} minutes needs {} slots, more than {}",
                budget_minutes, needed, self.config.max_slots
            ))
            .into());
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut spent: BTreeMap<ObjectiveId, f64> = BTreeMap::new();
        let mut slots = Vec::with_capacity(needed as usize);
        let mut remaining = budget_minutes;

        while remaining > 1e-9 {
            let slot = self.config.slot_minutes.min(remaining);
            match self.choose(arms, &spent, budget_minutes, slot, &mut rng, None) {
                Some(choice) => {
                    *spent.entry(choice.topic.clone()).or_insert(0.0) += slot;
                    slots.push(PlannedSlot {
                        topic: choice.topic,
                        minutes: slot,
                    });
                    remaining -= slot;
                }
                None => break,
            }
        }

        if slots.is_empty() {
            return Err(EngineError::empty_pool("topics within their maximum share"));
        }
        tracing::debug!(slots = slots.len(), unallocated = remaining, "session planned");
        Ok(SessionPlan {
            slots,
            minutes_by_topic: spent,
            unallocated_minutes: remaining.max(0.0),
        })
    }
}
