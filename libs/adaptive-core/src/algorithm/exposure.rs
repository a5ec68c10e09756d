//! Exposure control: a bounded penalty for recently practised items plus
//! cooldown eligibility.
//!
//! The multiplier is `1 / (1 + penalty * n * exp(-h / recency))` for `n`
//! prior showings, the last one `h` hours ago. It lies in (0, 1], never rises
//! with `n` and never falls with `h`.

use chrono::{DateTime, Duration, Utc};

use crate::config::ExposureConfig;
use crate::types::{ExposureRecord, ExposureState, Item};

/// Multiplier for an item shown `count` times, most recently
/// `hours_since_shown` hours ago (`None` when never shown).
pub fn exposure_multiplier(count: u32, hours_since_shown: Option<f64>, config: &ExposureConfig) -> f64 {
    if count == 0 {
        return 1.0;
    }
    let decay = match hours_since_shown {
        None => return 1.0,
        Some(h) if h.is_nan() => 1.0,
        Some(h) => (-h.max(0.0) / config.recency_hours.max(f64::MIN_POSITIVE)).exp(),
    };
    let penalty = config.count_penalty.max(0.0) * count as f64 * decay;
    1.0 / (1.0 + penalty)
}

/// Candidates left after cooldown filtering.
#[derive(Debug, Clone)]
pub struct Eligibility<'a> {
    pub candidates: Vec<&'a Item>,
    /// Every candidate was cooling down; `candidates` holds the least
    /// recently shown items instead.
    pub relaxed: bool,
}

#[derive(Debug, Clone)]
pub struct ExposureController {
    config: ExposureConfig,
}

impl ExposureController {
    pub fn new(config: &ExposureConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Cooldown applied to an item once it is shown.
    pub fn cooldown(&self) -> Duration {
        Duration::minutes(self.config.item_cooldown_minutes.max(0))
    }

    fn record_multiplier(&self, record: &ExposureRecord, now: DateTime<Utc>) -> f64 {
        exposure_multiplier(record.shown_count, record.hours_since_shown(now), &self.config)
    }

    /// Item multiplier, further damped by its most-exposed objective.
    pub fn multiplier(&self, item: &Item, exposure: &ExposureState, now: DateTime<Utc>) -> f64 {
        let item_multiplier = self.record_multiplier(&exposure.item(&item.id), now);
        if !self.config.use_objective_exposure {
            return item_multiplier;
        }
        let objective_multiplier = item
            .objectives
            .iter()
            .filter_map(|o| exposure.objectives.get(o))
            .map(|record| self.record_multiplier(record, now))
            .fold(1.0, f64::min);
        item_multiplier * objective_multiplier
    }

    /// Items not on cooldown, or the least recently shown ones when every
    /// item is cooling down.
    pub fn eligible<'a>(&self, pool: &'a [Item], exposure: &ExposureState, now: DateTime<Utc>) -> Eligibility<'a> {
        let candidates: Vec<&Item> = pool
            .iter()
            .filter(|item| !exposure.item(&item.id).on_cooldown(now))
            .collect();
        if !candidates.is_empty() || pool.is_empty() {
            return Eligibility {
                candidates,
                relaxed: false,
            };
        }

        let mut fallback: Vec<&Item> = pool.iter().collect();
        fallback.sort_by(|a, b| {
            let a_at = exposure.item(&a.id).last_shown_at;
            let b_at = exposure.item(&b.id).last_shown_at;
            a_at.cmp(&b_at).then_with(|| a.id.cmp(&b.id))
        });
        fallback.truncate(self.config.fallback_size.max(1));

        tracing::warn!(
            pool = pool.len(),
            fallback = fallback.len(),
            "all items on cooldown, relaxing"
        );
        Eligibility {
            candidates: fallback,
            relaxed: true,
        }
    }
}
