//! Cold-start bridge: a rating-style update for the first few responses.
//!
//! theta' = theta + K_n * (actual - expected), with scores normalised to [0, 1]
//! and K_n = K / (1 + decay * n). The SE shrinks by the item information at
//! the pre-update theta, so the quadrature updater inherits a sensible prior.

use super::ability::ThetaEstimate;
use super::measurement;
use crate::types::{ItemParameters, Response};

#[derive(Debug, Clone)]
pub struct EloBridge {
    k: f64,
    k_decay: f64,
}

impl EloBridge {
    pub fn new(k: f64, k_decay: f64) -> Self {
        Self {
            k,
            k_decay: k_decay.max(0.0),
        }
    }

    /// Step size after `responses` prior observations.
    pub fn dynamic_k(&self, responses: u32) -> f64 {
        self.k / (1.0 + self.k_decay * responses as f64)
    }

    pub fn update(
        &self,
        prior: &ThetaEstimate,
        params: &ItemParameters,
        response: Response,
    ) -> ThetaEstimate {
        let max_score = (params.categories() - 1) as f64;
        let expected = measurement::expected_score(params, prior.theta) / max_score;
        let actual = response.category as f64 / max_score;
        let delta = self.dynamic_k(prior.responses) * (actual - expected);

        let info = measurement::information(params, prior.theta);
        let precision = 1.0 / prior.se.powi(2) + info;

        ThetaEstimate {
            theta: prior.theta + delta,
            se: (1.0 / precision).sqrt(),
            responses: prior.responses + 1,
        }
    }
}
