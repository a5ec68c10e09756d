//! Measurement model: Rasch and generalized partial-credit (GPCM).
//!
//! For an item with discrimination `a` and step locations `b_1..b_m`:
//! - Category logit: z_k = sum_{v<=k} a * (theta - b_v), z_0 = 0
//! - P(X = k | theta) = exp(z_k) / sum_j exp(z_j)
//! - Information: I(theta) = a^2 * Var(X | theta)
//!
//! The Rasch model is the m = 1 case.

use crate::error::ValidationError;
use crate::types::{ItemParameters, Response};

/// Beyond this |theta| every category distribution is already saturated.
const THETA_BOUND: f64 = 1.0e3;

/// Per-step logit cap; keeps accumulated logits finite for any parameters.
const LOGIT_CAP: f64 = 700.0;

/// A validated item response model.
#[derive(Debug, Clone, Copy)]
pub struct ResponseModel<'a> {
    params: &'a ItemParameters,
}

impl<'a> ResponseModel<'a> {
    /// Validate parameters once; degenerate inputs are rejected, never coerced.
    pub fn new(item_id: &str, params: &'a ItemParameters) -> Result<Self, ValidationError> {
        params.validate(item_id)?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &'a ItemParameters {
        self.params
    }

    pub fn categories(&self) -> usize {
        self.params.categories()
    }

    /// Probability mass over response categories at `theta`.
    pub fn probabilities(&self, theta: f64) -> Result<Vec<f64>, ValidationError> {
        check_theta(theta)?;
        Ok(probabilities(self.params, theta))
    }

    /// Fisher information at `theta`.
    pub fn information(&self, theta: f64) -> Result<f64, ValidationError> {
        check_theta(theta)?;
        Ok(information(self.params, theta))
    }

    /// Expected category score at `theta`.
    pub fn expected_score(&self, theta: f64) -> Result<f64, ValidationError> {
        check_theta(theta)?;
        Ok(expected_score(self.params, theta))
    }

    pub fn log_likelihood(&self, theta: f64, response: Response) -> Result<f64, ValidationError> {
        check_theta(theta)?;
        Ok(log_probability(self.params, theta, response.category as usize))
    }
}

fn check_theta(theta: f64) -> Result<(), ValidationError> {
    if theta.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFiniteAbility(theta))
    }
}

fn category_logits(params: &ItemParameters, theta: f64) -> Vec<f64> {
    let a = params.discrimination;
    let theta = theta.clamp(-THETA_BOUND, THETA_BOUND);
    let steps = params.steps();

    let mut logits = Vec::with_capacity(steps.len() + 1);
    let mut acc = 0.0;
    logits.push(acc);
    for step in steps {
        acc += (a * (theta - step)).clamp(-LOGIT_CAP, LOGIT_CAP);
        logits.push(acc);
    }
    logits
}

fn max_logit(logits: &[f64]) -> f64 {
    logits.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Category probabilities for already-validated parameters.
pub(crate) fn probabilities(params: &ItemParameters, theta: f64) -> Vec<f64> {
    let logits = category_logits(params, theta);
    let max = max_logit(&logits);
    let weights: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// ln P(X = category | theta) via log-sum-exp.
pub(crate) fn log_probability(params: &ItemParameters, theta: f64, category: usize) -> f64 {
    let logits = category_logits(params, theta);
    let max = max_logit(&logits);
    let log_total = max + logits.iter().map(|z| (z - max).exp()).sum::<f64>().ln();
    logits.get(category).copied().unwrap_or(f64::NEG_INFINITY) - log_total
}

pub(crate) fn expected_score(params: &ItemParameters, theta: f64) -> f64 {
    probabilities(params, theta)
        .iter()
        .enumerate()
        .map(|(k, p)| k as f64 * p)
        .sum()
}

pub(crate) fn information(params: &ItemParameters, theta: f64) -> f64 {
    let probs = probabilities(params, theta);
    let (mean, second) = probs
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(m, s), (k, p)| {
            let k = k as f64;
            (m + k * p, s + k * k * p)
        });
    let variance = (second - mean * mean).max(0.0);
    params.discrimination.powi(2) * variance
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn rasch_matches_logistic() {
        let params = ItemParameters::rasch(0.5);
        let model = ResponseModel::new("i1", &params).unwrap();
        let probs = model.probabilities(1.5).unwrap();
        let expected = 1.0 / (1.0 + (-1.0f64).exp());
        assert!(approx(probs[1], expected));
        assert!(approx(probs[0] + probs[1], 1.0));
    }

    #[test]
    fn rasch_information_peaks_at_difficulty() {
        let params = ItemParameters::rasch(0.0);
        let model = ResponseModel::new("i1", &params).unwrap();
        let at_peak = model.information(0.0).unwrap();
        assert!(approx(at_peak, 0.25));
        assert!(model.information(2.0).unwrap() < at_peak);
        assert!(model.information(-2.0).unwrap() < at_peak);
    }

    #[test]
    fn discrimination_scales_information() {
        let flat = ItemParameters::rasch(0.0);
        let mut sharp = ItemParameters::rasch(0.0);
        sharp.discrimination = 2.0;
        assert!(approx(information(&sharp, 0.0), 4.0 * information(&flat, 0.0)));
    }

    #[test]
    fn gpcm_higher_ability_shifts_mass_upward() {
        let params = ItemParameters::gpcm(0.0, vec![-1.0, 0.0, 1.0], 1.0);
        let low = expected_score(&params, -2.0);
        let high = expected_score(&params, 2.0);
        assert!(high > low);
        assert_eq!(probabilities(&params, 0.0).len(), 4);
    }

    #[test]
    fn extreme_theta_stays_finite() {
        let params = ItemParameters::gpcm(0.0, vec![-1.0, 1.0], 3.0);
        let model = ResponseModel::new("i1", &params).unwrap();
        for theta in [f64::MAX, -f64::MAX, 1e12, -1e12] {
            let probs = model.probabilities(theta).unwrap();
            assert!(probs.iter().all(|p| p.is_finite() && *p >= 0.0));
            assert!(approx(probs.iter().sum::<f64>(), 1.0));
            assert!(model.information(theta).unwrap().is_finite());
            let ll = model.log_likelihood(theta, Response::new(1)).unwrap();
            assert!(!ll.is_nan());
        }
    }

    #[test]
    fn non_finite_theta_is_rejected() {
        let params = ItemParameters::rasch(0.0);
        let model = ResponseModel::new("i1", &params).unwrap();
        assert!(model.probabilities(f64::NAN).is_err());
        assert!(model.information(f64::INFINITY).is_err());
    }

    #[test]
    fn malformed_parameters_are_rejected() {
        let params = ItemParameters::gpcm(0.0, vec![1.0, 0.0], 1.0);
        assert!(ResponseModel::new("i1", &params).is_err());
    }

    #[test]
    fn log_probability_matches_probabilities() {
        let params = ItemParameters::gpcm(0.3, vec![-0.7, 0.2, 0.9], 1.4);
        let probs = probabilities(&params, 0.4);
        for (k, p) in probs.iter().enumerate() {
            assert!(approx(log_probability(&params, 0.4, k), p.ln()));
        }
    }

    fn thresholds_strategy() -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(-4.0f64..4.0, 1..6).prop_map(|mut v| {
            v.sort_by(|a, b| a.partial_cmp(b).unwrap());
            v
        })
    }

    proptest! {
        #[test]
        fn probabilities_form_a_simplex(
            thresholds in thresholds_strategy(),
            difficulty in -3.0f64..3.0,
            discrimination in 0.2f64..3.0,
            theta in -1.0e6f64..1.0e6,
        ) {
            let params = ItemParameters::gpcm(difficulty, thresholds, discrimination);
            let model = ResponseModel::new("p", &params).unwrap();
            let probs = model.probabilities(theta).unwrap();
            prop_assert_eq!(probs.len(), params.categories());
            prop_assert!(probs.iter().all(|p| p.is_finite() && *p >= 0.0));
            prop_assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }

        #[test]
        fn information_is_non_negative(
            thresholds in thresholds_strategy(),
            theta in -10.0f64..10.0,
        ) {
            let params = ItemParameters::gpcm(0.0, thresholds, 1.0);
            let info = information(&params, theta);
            prop_assert!(info.is_finite() && info >= 0.0);
        }
    }
}
