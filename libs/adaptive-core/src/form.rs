//! Blueprint-constrained fixed-form assembly.
//!
//! Every domain first receives its minimum count of the most informative
//! items at the target ability; remaining slots go to the most informative
//! items of domains still below their target count, then to any domain
//! still below its maximum. Feasibility is checked before anything is
//! picked, and constraints are never relaxed here.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::algorithm::measurement;
use crate::error::{EngineError, Result, ValidationError};
use crate::types::{DomainId, Item, ItemId};

/// Coverage target of one content domain, as a share of the form length
/// or as an item count, with a symmetric tolerance in items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainTarget {
    pub domain: DomainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default)]
    pub tolerance: usize,
}

impl DomainTarget {
    pub fn weighted(domain: impl Into<DomainId>, weight: f64, tolerance: usize) -> Self {
        Self {
            domain: domain.into(),
            weight: Some(weight),
            count: None,
            tolerance,
        }
    }

    pub fn counted(domain: impl Into<DomainId>, count: usize, tolerance: usize) -> Self {
        Self {
            domain: domain.into(),
            weight: None,
            count: Some(count),
            tolerance,
        }
    }
}

/// Resolved item-count bounds of one domain for a given form length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainQuota {
    pub domain: DomainId,
    pub target: usize,
    pub min: usize,
    pub max: usize,
}

/// Ability at which information is maximised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThetaTarget {
    Point { theta: f64 },
    /// Information averaged over `points` evenly spaced abilities.
    Range { min: f64, max: f64, points: usize },
}

impl Default for ThetaTarget {
    fn default() -> Self {
        Self::Point { theta: 0.0 }
    }
}

impl ThetaTarget {
    fn abilities(&self) -> Vec<f64> {
        match *self {
            Self::Point { theta } => vec![theta],
            Self::Range { min, max, points } => {
                let points = points.max(2);
                let step = (max - min) / (points - 1) as f64;
                (0..points).map(|i| min + step * i as f64).collect()
            }
        }
    }
}

/// Read-only coverage requirements for a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub length: usize,
    pub domains: Vec<DomainTarget>,
    #[serde(default)]
    pub theta: ThetaTarget,
}

impl Blueprint {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let malformed = |msg: String| Err(ValidationError::MalformedBlueprint(msg));

        if self.length == 0 {
            return malformed("form length must be positive".into());
        }
        if self.domains.is_empty() {
            return malformed("no domains".into());
        }
        let mut seen = BTreeSet::new();
        let mut weight_total = 0.0;
        for target in &self.domains {
            if !seen.insert(target.domain.as_str()) {
                return malformed(format!("domain {} listed twice", target.domain));
            }
            match (target.weight, target.count) {
                (Some(_), Some(_)) | (None, None) => {
                    return malformed(format!("domain {} needs exactly one of weight or count", target.domain));
                }
                (Some(weight), None) if !(weight > 0.0 && weight <= 1.0) => {
                    return malformed(format!("domain {} weight {} outside (0, 1]", target.domain, weight));
                }
                (Some(weight), None) => weight_total += weight,
                (None, Some(_)) => {}
            }
        }
        if weight_total > 1.0 + 1e-6 {
            return malformed(format!("domain weights sum to {}", weight_total));
        }

        let quotas = self.quotas();
        let minimum = quotas
            .iter()
            .try_fold(0usize, |acc, q| acc.checked_add(q.min))
            .unwrap_or(usize::MAX);
        let maximum = quotas
            .iter()
            .try_fold(0usize, |acc, q| acc.checked_add(q.max))
            .unwrap_or(usize::MAX);
        if minimum > self.length {
            return malformed(format!("minimum counts ({}) exceed form length {}", minimum, self.length));
        }
        if maximum < self.length {
            return malformed(format!("maximum counts ({}) cannot fill form length {}", maximum, self.length));
        }

        if let ThetaTarget::Range { min, max, .. } = self.theta {
            if !(min.is_finite() && max.is_finite() && min <= max) {
                return malformed(format!("theta range [{}, {}]", min, max));
            }
        } else if let ThetaTarget::Point { theta } = self.theta {
            if !theta.is_finite() {
                return malformed(format!("theta target {}", theta));
            }
        }
        Ok(())
    }

    /// Per-domain bounds. Weighted shares of the length are apportioned by
    /// largest remainder, so weights summing to 1 give targets summing to
    /// the length. Ties go to the domain listed first.
    pub fn quotas(&self) -> Vec<DomainQuota> {
        let length = self.length as f64;
        let mut targets: Vec<usize> = self.domains.iter().map(|d| d.count.unwrap_or(0)).collect();
        let weighted: Vec<(usize, f64)> = self
            .domains
            .iter()
            .enumerate()
            .filter_map(|(i, d)| match (d.count, d.weight) {
                (None, Some(weight)) => Some((i, weight * length)),
                _ => None,
            })
            .collect();

        let share: f64 = weighted.iter().map(|(_, quota)| quota).sum();
        let mut floors = 0usize;
        for (i, quota) in &weighted {
            targets[*i] = quota.floor() as usize;
            floors = floors.saturating_add(targets[*i]);
        }
        let spare = (share.round() as usize).saturating_sub(floors);

        let mut by_remainder: Vec<&(usize, f64)> = weighted.iter().collect();
        by_remainder.sort_by(|a, b| {
            (b.1 - b.1.floor())
                .total_cmp(&(a.1 - a.1.floor()))
                .then_with(|| a.0.cmp(&b.0))
        });
        for (i, _) in by_remainder.into_iter().take(spare) {
            targets[*i] += 1;
        }

        self.domains
            .iter()
            .zip(targets)
            .map(|(d, target)| DomainQuota {
                domain: d.domain.clone(),
                target,
                min: target.saturating_sub(d.tolerance),
                max: target.saturating_add(d.tolerance),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDeficit {
    pub domain: DomainId,
    pub required: usize,
    pub available: usize,
    pub shortfall: usize,
}

/// Why a blueprint cannot be met by a pool; names every short domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfeasibilityReport {
    pub deficits: Vec<DomainDeficit>,
    /// Items missing to reach the form length once every domain is capped
    /// at its maximum.
    pub length_shortfall: usize,
}

impl fmt::Display for InfeasibilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .deficits
            .iter()
            .map(|d| format!("{} short by {} ({} of {} available)", d.domain, d.shortfall, d.available, d.required))
            .collect();
        if self.length_shortfall > 0 {
            parts.push(format!("form short by {} items", self.length_shortfall));
        }
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormItem {
    pub item_id: ItemId,
    pub domain: DomainId,
    pub information: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub items: Vec<FormItem>,
    pub domain_counts: BTreeMap<DomainId, usize>,
    pub total_information: f64,
}

struct Candidate<'a> {
    item: &'a Item,
    information: f64,
}

/// Domain-by-domain deficits of `pool` against `blueprint`.
pub fn check_feasibility(blueprint: &Blueprint, pool: &[Item]) -> Option<InfeasibilityReport> {
    let mut available: BTreeMap<&str, usize> = BTreeMap::new();
    let mut seen = BTreeSet::new();
    for item in pool.iter().filter(|i| seen.insert(i.id.as_str())) {
        *available.entry(item.domain.as_str()).or_insert(0) += 1;
    }

    let length = blueprint.length;
    let mut deficits = Vec::new();
    let mut fillable = 0usize;
    for quota in blueprint.quotas() {
        let have = available.get(quota.domain.as_str()).copied().unwrap_or(0);
        let required = quota.min;
        if have < required {
            deficits.push(DomainDeficit {
                domain: quota.domain,
                required,
                available: have,
                shortfall: required - have,
            });
        }
        fillable = fillable.saturating_add(have.min(quota.max));
    }
    let length_shortfall = length.saturating_sub(fillable);

    if deficits.is_empty() && length_shortfall == 0 {
        None
    } else {
        Some(InfeasibilityReport {
            deficits,
            length_shortfall,
        })
    }
}

fn take(
    domain: &str,
    by_domain: &mut BTreeMap<&str, Vec<Candidate<'_>>>,
    picked: &mut Vec<FormItem>,
    counts: &mut BTreeMap<DomainId, usize>,
) {
    if let Some(candidate) = by_domain.get_mut(domain).and_then(Vec::pop) {
        *counts.entry(domain.to_string()).or_insert(0) += 1;
        picked.push(FormItem {
            item_id: candidate.item.id.clone(),
            domain: domain.to_string(),
            information: candidate.information,
        });
    }
}

/// Domain whose best remaining item is most informative among domains
/// still under `limit`.
fn best_below(
    quotas: &[DomainQuota],
    limit: impl Fn(&DomainQuota) -> usize,
    counts: &BTreeMap<DomainId, usize>,
    by_domain: &BTreeMap<&str, Vec<Candidate<'_>>>,
) -> Option<DomainId> {
    quotas
        .iter()
        .filter(|t| counts.get(&t.domain).copied().unwrap_or(0) < limit(t))
        .filter_map(|t| {
            let best = by_domain.get(t.domain.as_str())?.last()?;
            Some((t, best))
        })
        .max_by(|(_, a), (_, b)| {
            a.information
                .total_cmp(&b.information)
                .then_with(|| b.item.id.cmp(&a.item.id))
        })
        .map(|(t, _)| t.domain.clone())
}

/// Assemble a form from `pool` honouring `blueprint`.
pub fn build_form(blueprint: &Blueprint, pool: &[Item]) -> Result<Form> {
    blueprint.validate()?;
    for item in pool {
        item.params.validate(&item.id)?;
    }
    if let Some(report) = check_feasibility(blueprint, pool) {
        tracing::warn!(%report, "blueprint infeasible");
        return Err(EngineError::Infeasible(report));
    }

    let abilities = blueprint.theta.abilities();
    let length = blueprint.length;
    let mut seen = BTreeSet::new();
    let mut by_domain: BTreeMap<&str, Vec<Candidate<'_>>> = BTreeMap::new();
    for item in pool.iter().filter(|i| seen.insert(i.id.as_str())) {
        let information = abilities
            .iter()
            .map(|theta| measurement::information(&item.params, *theta))
            .sum::<f64>()
            / abilities.len() as f64;
        by_domain
            .entry(item.domain.as_str())
            .or_default()
            .push(Candidate { item, information });
    }
    for candidates in by_domain.values_mut() {
        // Best last, so picking is a pop.
        candidates.sort_by(|a, b| {
            a.information
                .total_cmp(&b.information)
                .then_with(|| b.item.id.cmp(&a.item.id))
        });
    }

    let mut picked: Vec<FormItem> = Vec::with_capacity(length);
    let mut counts: BTreeMap<DomainId, usize> = BTreeMap::new();

    let quotas = blueprint.quotas();
    for quota in &quotas {
        for _ in 0..quota.min {
            take(&quota.domain, &mut by_domain, &mut picked, &mut counts);
        }
    }

    while picked.len() < length {
        let next = best_below(&quotas, |q| q.target, &counts, &by_domain)
            .or_else(|| best_below(&quotas, |q| q.max, &counts, &by_domain));
        match next {
            Some(domain) => take(&domain, &mut by_domain, &mut picked, &mut counts),
            None => break,
        }
    }

    let total_information = picked.iter().map(|i| i.information).sum();
    tracing::debug!(items = picked.len(), total_information, "form assembled");
    Ok(Form {
        items: picked,
        domain_counts: counts,
        total_information,
    })
}
