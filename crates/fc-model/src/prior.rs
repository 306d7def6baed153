//! Gaussian priors on the nuisance parameters.
//!
//! The prior table is external input, constant for a run. How it enters the
//! fit is configurable: it always seeds initial guesses, and in
//! [`PriorMode::Penalty`] it additionally contributes Σ((θ−c)/σ)² to λ.

use crate::spectrum::Params;
use fc_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// One Gaussian constraint: center and width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianPrior {
    /// Prior mean.
    pub center: f64,
    /// Prior standard deviation (> 0).
    pub sigma: f64,
}

impl GaussianPrior {
    /// Create a prior; `sigma` must be finite and positive.
    pub fn new(center: f64, sigma: f64) -> Result<Self> {
        if !center.is_finite() || !sigma.is_finite() || sigma <= 0.0 {
            return Err(Error::Validation(format!(
                "invalid prior: center={center}, sigma={sigma}"
            )));
        }
        Ok(Self { center, sigma })
    }

    /// Normalized pull (x − center) / sigma.
    pub fn pull(&self, x: f64) -> f64 {
        (x - self.center) / self.sigma
    }
}

/// Priors for the four nuisance parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorSet {
    /// Prior on the background normalization A.
    pub a: GaussianPrior,
    /// Prior on the background decay length B.
    pub b: GaussianPrior,
    /// Prior on the signal area C.
    pub c: GaussianPrior,
    /// Prior on the flat floor D.
    pub d: GaussianPrior,
}

impl PriorSet {
    /// Gaussian penalty Σ pull², in λ (2·NLL) units.
    pub fn penalty_lambda(&self, params: &Params) -> f64 {
        self.a.pull(params.a).powi(2)
            + self.b.pull(params.b).powi(2)
            + self.c.pull(params.c).powi(2)
            + self.d.pull(params.d).powi(2)
    }

    /// Parameter vector at the prior centers, with the given point of
    /// interest; the canonical initial guess for a fit.
    pub fn seed_params(&self, m: f64, delta: f64) -> Params {
        Params::new(self.a.center, self.b.center, self.c.center, self.d.center, m, delta)
    }
}

/// How the prior table participates in a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PriorMode {
    /// Priors seed initial guesses only; λ carries no penalty term.
    #[default]
    SeedOnly,
    /// Priors additionally enter λ as an additive Gaussian penalty.
    Penalty,
}
