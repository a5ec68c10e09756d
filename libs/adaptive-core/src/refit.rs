//! Offline recalibration of item parameters.
//!
//! Marginal maximum likelihood by EM over the ability quadrature grid with a
//! standard normal ability prior. The E-step distributes each learner's
//! posterior over grid nodes into expected category counts per item; the
//! M-step takes one clamped Newton step per step location, regularised by a
//! normal prior centred on the previous snapshot. Items with too few
//! responses are blended back toward their previous parameters, and items
//! whose fit breaks down keep them outright. The active snapshot is only read.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::algorithm::ability::{normal_log_density, QuadratureGrid};
use crate::algorithm::measurement;
use crate::config::{EngineConfig, RefitConfig};
use crate::error::{EngineError, Result, ValidationError};
use crate::event::AttemptEvent;
use crate::snapshot::{ParameterSnapshot, ReliabilitySummary};
use crate::types::{ItemId, ItemParameters};

/// Cooperative cancellation, polled between EM iterations.
pub trait AbortSignal {
    fn should_abort(&self) -> bool;
}

impl AbortSignal for AtomicBool {
    fn should_abort(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// Signal for runs that are never cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverAbort;

impl AbortSignal for NeverAbort {
    fn should_abort(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDiagnostics {
    pub item_id: ItemId,
    pub responses: usize,
    /// Weight of the fitted values against the previous ones (1 = no shrinkage).
    pub shrinkage_weight: f64,
    /// Largest absolute change of any step location.
    pub max_change: f64,
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefitDiagnostics {
    pub iterations: usize,
    pub converged: bool,
    pub log_likelihood: f64,
    pub mean_variance_reduction: f64,
    pub test_information: f64,
    pub learners: usize,
    pub responses_used: usize,
    pub skipped_records: usize,
    pub duplicate_records: usize,
    pub items: Vec<ItemDiagnostics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefitOutcome {
    pub snapshot: ParameterSnapshot,
    pub diagnostics: RefitDiagnostics,
}

/// Responses grouped for fitting.
struct Prepared {
    items: Vec<(ItemId, ItemParameters)>,
    responses_per_item: Vec<usize>,
    /// Per learner: (item index, category).
    learners: Vec<Vec<(usize, usize)>>,
    skipped: usize,
    duplicates: usize,
    calibrated_through: Option<DateTime<Utc>>,
}

struct ExpectationStep {
    /// [item][node][category] expected counts.
    counts: Vec<Vec<Vec<f64>>>,
    log_likelihood: f64,
    mean_variance_reduction: f64,
}

#[derive(Debug, Clone)]
pub struct RefitJob {
    config: RefitConfig,
    grid: QuadratureGrid,
}

impl RefitJob {
    pub fn new(config: &EngineConfig) -> std::result::Result<Self, ValidationError> {
        let a = &config.ability;
        Ok(Self {
            config: config.refit.clone(),
            grid: QuadratureGrid::uniform(a.quadrature_points, a.grid_min, a.grid_max)?,
        })
    }

    /// Fit a new snapshot (version `previous + 1`) from `events`.
    ///
    /// Deterministic for a given event set and `seed`; the seed only drives
    /// per-item subsampling when `max_responses_per_item` is set.
    pub fn run_refit(
        &self,
        events: &[AttemptEvent],
        previous: &ParameterSnapshot,
        seed: u64,
        abort: &dyn AbortSignal,
    ) -> Result<RefitOutcome> {
        let data = self.prepare(events, previous, seed);
        tracing::info!(
            previous = previous.version(),
            items = data.items.len(),
            learners = data.learners.len(),
            skipped = data.skipped,
            "refit started"
        );

        let prior = self.grid.posterior(|x| normal_log_density(x, 0.0, 1.0));
        let log_prior: Vec<f64> = prior.iter().map(|p| p.ln()).collect();
        let prior_variance = self.grid.moments(&prior).1.powi(2);

        let anchors: Vec<ItemParameters> = data.items.iter().map(|(_, p)| p.clone()).collect();
        let mut params = anchors.clone();
        let mut broken = vec![false; params.len()];
        let mut iterations = 0;
        let mut converged = data.items.is_empty();

        while !converged && iterations < self.config.max_iterations {
            if abort.should_abort() {
                tracing::warn!(iterations, "refit aborted");
                return Err(EngineError::RefitAborted { iterations });
            }
            let step = self.expectation(&params, &data.learners, &log_prior, prior_variance);

            let mut max_change: f64 = 0.0;
            for (index, current) in params.iter_mut().enumerate() {
                if broken[index] {
                    continue;
                }
                match self.maximize(current, &anchors[index], &step.counts[index]) {
                    Some(next) => {
                        max_change = max_change.max(step_distance(current, &next));
                        *current = next;
                    }
                    None => {
                        tracing::warn!(item = %data.items[index].0, "non-finite fit, keeping previous parameters");
                        broken[index] = true;
                        *current = anchors[index].clone();
                    }
                }
            }
            iterations += 1;
            converged = max_change < self.config.tolerance;
            tracing::debug!(iterations, log_likelihood = step.log_likelihood, max_change, "EM iteration");
        }

        let fitted = self.expectation(&params, &data.learners, &log_prior, prior_variance);

        let mut items = previous.items().clone();
        let mut diagnostics = Vec::with_capacity(data.items.len());
        let mut responses_per_item = BTreeMap::new();
        let mut shrunk = 0;
        for (index, (id, before)) in data.items.iter().enumerate() {
            let n = data.responses_per_item[index];
            let (after, weight) = if broken[index] {
                (before.clone(), 0.0)
            } else {
                self.shrink(&params[index], before, n)
            };
            if weight < 1.0 && !broken[index] {
                shrunk += 1;
            }
            diagnostics.push(ItemDiagnostics {
                item_id: id.clone(),
                responses: n,
                shrinkage_weight: weight,
                max_change: step_distance(before, &after),
                fallback: broken[index],
            });
            responses_per_item.insert(id.clone(), n as u64);
            items.insert(id.clone(), after);
        }

        let test_information: f64 = items
            .values()
            .map(|p| {
                self.grid
                    .nodes()
                    .iter()
                    .zip(&prior)
                    .map(|(x, w)| w * measurement::information(p, *x))
                    .sum::<f64>()
            })
            .sum();
        let responses_used: usize = data.responses_per_item.iter().sum();
        let fallbacks = broken.iter().filter(|b| **b).count();

        let reliability = ReliabilitySummary {
            mean_variance_reduction: fitted.mean_variance_reduction,
            mean_responses_per_item: if data.items.is_empty() {
                0.0
            } else {
                responses_used as f64 / data.items.len() as f64
            },
            responses_per_item,
            items_shrunk: shrunk,
            items_fallback: fallbacks,
            test_information,
        };
        let snapshot = ParameterSnapshot::new(
            previous.version() + 1,
            items,
            reliability,
            data.calibrated_through.or(previous.calibrated_through()),
        )?;

        tracing::info!(
            version = snapshot.version(),
            iterations,
            converged,
            log_likelihood = fitted.log_likelihood,
            shrunk,
            fallbacks,
            "refit finished"
        );

        Ok(RefitOutcome {
            snapshot,
            diagnostics: RefitDiagnostics {
                iterations,
                converged,
                log_likelihood: fitted.log_likelihood,
                mean_variance_reduction: fitted.mean_variance_reduction,
                test_information,
                learners: data.learners.len(),
                responses_used,
                skipped_records: data.skipped,
                duplicate_records: data.duplicates,
                items: diagnostics,
            },
        })
    }

    fn prepare(&self, events: &[AttemptEvent], previous: &ParameterSnapshot, seed: u64) -> Prepared {
        let mut seen = HashSet::new();
        let mut attempts: Vec<&AttemptEvent> = events.iter().filter(|a| seen.insert(a.record_id)).collect();
        let duplicates = events.len() - attempts.len();
        attempts.sort_by(|a, b| {
            (&a.learner_id, a.occurred_at, a.record_id).cmp(&(&b.learner_id, b.occurred_at, b.record_id))
        });

        let mut skipped = 0;
        let mut per_item: BTreeMap<&str, (&ItemParameters, Vec<&AttemptEvent>)> = BTreeMap::new();
        for attempt in attempts {
            match previous.params(&attempt.item_id) {
                Some(params) if (attempt.category as usize) < params.categories() => {
                    per_item
                        .entry(attempt.item_id.as_str())
                        .or_insert_with(|| (params, Vec::new()))
                        .1
                        .push(attempt);
                }
                _ => skipped += 1,
            }
        }

        if let Some(cap) = self.config.max_responses_per_item {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for (_, list) in per_item.values_mut() {
                if list.len() > cap {
                    let mut keep = rand::seq::index::sample(&mut rng, list.len(), cap).into_vec();
                    keep.sort_unstable();
                    let kept: Vec<&AttemptEvent> = keep.into_iter().map(|i| list[i]).collect();
                    *list = kept;
                }
            }
        }

        let mut learners: BTreeMap<&str, Vec<(usize, usize, &AttemptEvent)>> = BTreeMap::new();
        let mut items = Vec::with_capacity(per_item.len());
        let mut responses_per_item = Vec::with_capacity(per_item.len());
        let mut calibrated_through: Option<DateTime<Utc>> = None;
        for (index, (id, (params, list))) in per_item.into_iter().enumerate() {
            items.push((id.to_string(), params.clone()));
            responses_per_item.push(list.len());
            for attempt in list {
                calibrated_through = calibrated_through.max(Some(attempt.occurred_at));
                learners
                    .entry(attempt.learner_id.as_str())
                    .or_default()
                    .push((index, attempt.category as usize, attempt));
            }
        }
        let learners: Vec<Vec<(usize, usize)>> = learners
            .into_values()
            .map(|mut responses| {
                responses.sort_by(|a, b| (a.2.occurred_at, a.2.record_id).cmp(&(b.2.occurred_at, b.2.record_id)));
                responses.into_iter().map(|(item, category, _)| (item, category)).collect()
            })
            .collect();

        Prepared {
            items,
            responses_per_item,
            learners,
            skipped,
            duplicates,
            calibrated_through,
        }
    }

    fn expectation(
        &self,
        params: &[ItemParameters],
        learners: &[Vec<(usize, usize)>],
        log_prior: &[f64],
        prior_variance: f64,
    ) -> ExpectationStep {
        let nodes = self.grid.nodes();
        let log_probs: Vec<Vec<Vec<f64>>> = params
            .iter()
            .map(|p| {
                nodes
                    .iter()
                    .map(|x| (0..p.categories()).map(|k| measurement::log_probability(p, *x, k)).collect())
                    .collect()
            })
            .collect();
        let mut counts: Vec<Vec<Vec<f64>>> = params
            .iter()
            .map(|p| vec![vec![0.0; p.categories()]; nodes.len()])
            .collect();

        let mut log_likelihood = 0.0;
        let mut reduction = 0.0;
        let mut logs = vec![0.0; nodes.len()];
        for responses in learners {
            logs.copy_from_slice(log_prior);
            for &(item, category) in responses {
                for (q, log) in logs.iter_mut().enumerate() {
                    *log += log_probs[item][q][category];
                }
            }
            let max = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mut posterior: Vec<f64> = logs.iter().map(|l| (l - max).exp()).collect();
            let total: f64 = posterior.iter().sum();
            posterior.iter_mut().for_each(|p| *p /= total);
            log_likelihood += max + total.ln();

            let (_, sd) = self.grid.moments(&posterior);
            reduction += 1.0 - sd.powi(2) / prior_variance;

            for &(item, category) in responses {
                for (q, weight) in posterior.iter().enumerate() {
                    counts[item][q][category] += weight;
                }
            }
        }

        ExpectationStep {
            counts,
            log_likelihood,
            mean_variance_reduction: if learners.is_empty() {
                0.0
            } else {
                reduction / learners.len() as f64
            },
        }
    }

    /// One diagonal Newton step on every step location.
    fn maximize(&self, current: &ItemParameters, anchor: &ItemParameters, counts: &[Vec<f64>]) -> Option<ItemParameters> {
        let a = current.discrimination;
        let precision = 1.0 / self.config.prior_sd.powi(2);
        let limit = self.config.max_newton_step;
        let anchor_steps = anchor.steps();
        let probs: Vec<Vec<f64>> = self
            .grid
            .nodes()
            .iter()
            .map(|x| measurement::probabilities(current, *x))
            .collect();

        let mut next: Vec<f64> = Vec::with_capacity(anchor_steps.len());
        for (index, location) in current.steps().into_iter().enumerate() {
            let v = index + 1;
            let mut gradient = -(location - anchor_steps[index]) * precision;
            let mut curvature = precision;
            for (p, n) in probs.iter().zip(counts) {
                let at_or_above: f64 = p[v..].iter().sum();
                let total: f64 = n.iter().sum();
                let reached: f64 = n[v..].iter().sum();
                gradient -= a * (reached - total * at_or_above);
                curvature += a * a * total * at_or_above * (1.0 - at_or_above);
            }
            next.push(location + (gradient / curvature).clamp(-limit, limit));
        }

        if next.iter().any(|s| !s.is_finite()) {
            return None;
        }
        next.sort_by(f64::total_cmp);
        Some(current.with_steps(&next))
    }

    /// Blend sparse items toward their previous parameters.
    fn shrink(&self, fitted: &ItemParameters, before: &ItemParameters, responses: usize) -> (ItemParameters, f64) {
        if responses >= self.config.min_responses {
            return (fitted.clone(), 1.0);
        }
        let n = responses as f64;
        let weight = n / (n + self.config.shrinkage_pseudo_count.max(f64::MIN_POSITIVE));
        let mut blended: Vec<f64> = fitted
            .steps()
            .iter()
            .zip(before.steps())
            .map(|(f, b)| weight * f + (1.0 - weight) * b)
            .collect();
        blended.sort_by(f64::total_cmp);
        (fitted.with_steps(&blended), weight)
    }
}

fn step_distance(a: &ItemParameters, b: &ItemParameters) -> f64 {
    a.steps()
        .iter()
        .zip(b.steps())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}
