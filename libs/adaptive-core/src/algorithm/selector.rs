//! Randomesque item selection.
//!
//! utility = (w_info * information * fatigue + w_bp * blueprint_priority) * exposure
//!
//! Candidates are ranked by utility (ties by id) and one of the top K is
//! drawn uniformly with a caller-seeded RNG.

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::ability::AbilityState;
use super::exposure::ExposureController;
use super::measurement;
use crate::config::{EngineConfig, SelectorConfig};
use crate::error::{EngineError, Result};
use crate::types::{ExposureState, Item, SessionState};

/// Components of an item's utility, returned for transparency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub theta: f64,
    pub information: f64,
    pub blueprint_priority: f64,
    pub exposure_multiplier: f64,
    pub fatigue: f64,
    pub utility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub item: Item,
    pub breakdown: ScoreBreakdown,
    /// Zero-based rank of the chosen item within the top K.
    pub rank: usize,
    pub candidates_considered: usize,
    pub relaxed_cooldown: bool,
    /// Earlier showings of the chosen item to this learner.
    pub times_shown_to_learner: u32,
}

#[derive(Debug, Clone)]
pub struct ItemSelector {
    config: SelectorConfig,
    exposure: ExposureController,
}

impl ItemSelector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.selector.clone(),
            exposure: ExposureController::new(&config.exposure),
        }
    }

    pub fn exposure(&self) -> &ExposureController {
        &self.exposure
    }

    /// Monotone decreasing discount for items already answered this session.
    pub fn fatigue(&self, answered: u32) -> f64 {
        (-self.config.fatigue_rate * answered as f64).exp()
    }

    /// Relative shortfall of `domain` against its session target share.
    pub fn blueprint_priority(session: &SessionState, domain: &str) -> f64 {
        let target = match session.domain_weights.get(domain) {
            Some(target) if *target > 0.0 => *target,
            _ => return 0.0,
        };
        let share = if session.items_answered == 0 {
            0.0
        } else {
            session.domain_counts.get(domain).copied().unwrap_or(0) as f64 / session.items_answered as f64
        };
        ((target - share).max(0.0) / target).min(1.0)
    }

    pub fn score(
        &self,
        ability: &AbilityState,
        item: &Item,
        session: &SessionState,
        exposure: &ExposureState,
        now: DateTime<Utc>,
    ) -> ScoreBreakdown {
        let theta = ability.estimate_for(&item.objectives).theta;
        let information = measurement::information(&item.params, theta);
        let blueprint_priority = Self::blueprint_priority(session, &item.domain);
        let exposure_multiplier = self.exposure.multiplier(item, exposure, now);
        let fatigue = self.fatigue(session.items_answered);
        let utility = (self.config.information_weight * information * fatigue
            + self.config.blueprint_weight * blueprint_priority)
            * exposure_multiplier;

        ScoreBreakdown {
            theta,
            information,
            blueprint_priority,
            exposure_multiplier,
            fatigue,
            utility,
        }
    }

    /// Eligible candidates scored and sorted best first.
    pub fn rank<'a>(
        &self,
        ability: &AbilityState,
        pool: &'a [Item],
        session: &SessionState,
        exposure: &ExposureState,
        now: DateTime<Utc>,
    ) -> Result<(Vec<(&'a Item, ScoreBreakdown)>, bool)> {
        for item in pool {
            item.params.validate(&item.id)?;
        }
        let eligibility = self.exposure.eligible(pool, exposure, now);
        let mut scored: Vec<(&Item, ScoreBreakdown)> = eligibility
            .candidates
            .into_iter()
            .map(|item| (item, self.score(ability, item, session, exposure, now)))
            .collect();
        scored.sort_by(|(a, sa), (b, sb)| {
            sb.utility
                .total_cmp(&sa.utility)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok((scored, eligibility.relaxed))
    }

    /// Pick the next item for `ability` from `pool`. Fatigue and blueprint
    /// coverage come from `session`; exposure damping and cooldowns come
    /// from the learner's `exposure` history.
    pub fn select_next_item(
        &self,
        ability: &AbilityState,
        pool: &[Item],
        session: &SessionState,
        exposure: &ExposureState,
        seed: u64,
        now: DateTime<Utc>,
    ) -> Result<Selection> {
        let (ranked, relaxed) = self.rank(ability, pool, session, exposure, now)?;
        if ranked.is_empty() {
            return Err(EngineError::empty_pool("items"));
        }

        let k = self.config.top_k.max(1).min(ranked.len());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let rank = rng.gen_range(0..k);
        let (item, breakdown) = ranked[rank];

        tracing::debug!(
            learner = %ability.learner_id,
            item = %item.id,
            rank,
            utility = breakdown.utility,
            "item selected"
        );

        Ok(Selection {
            item: item.clone(),
            breakdown,
            rank,
            candidates_considered: ranked.len(),
            relaxed_cooldown: relaxed,
            times_shown_to_learner: exposure.item(&item.id).shown_count,
        })
    }
}
