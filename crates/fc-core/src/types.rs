//! Common data types for fcscan.

use serde::{Deserialize, Serialize};

/// A tested coordinate in the (m, Δ) plane of the parameters of interest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Peak location m.
    pub m: f64,
    /// Peak width Δ.
    pub delta: f64,
}

impl GridPoint {
    /// Create a grid point.
    pub fn new(m: f64, delta: f64) -> Self {
        Self { m, delta }
    }
}

/// Result of one constrained minimization.
///
/// Produced by the fitter, consumed once by the caller that requested it.
/// Uncertainties and covariance are populated only for the global fit
/// (profile fits inside the scan skip the Hessian for speed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Best-fit parameter values in flat order `[A, B, C, D, m, Δ]`.
    pub parameters: Vec<f64>,

    /// Minimized test statistic λ = 2·NLL (plus the prior penalty when
    /// penalty mode is active).
    pub lambda: f64,

    /// Whether the minimizer met its stopping criterion.
    pub converged: bool,

    /// Optimizer iterations.
    pub n_iter: u64,

    /// Objective evaluations.
    pub n_fev: usize,

    /// Gradient evaluations.
    pub n_gev: usize,

    /// Optimizer termination message.
    pub message: String,

    /// Per-parameter uncertainties (sqrt of covariance diagonal).
    pub uncertainties: Option<Vec<f64>>,

    /// Covariance matrix (row-major, N×N). `None` if the Hessian was not
    /// computed or could not be inverted.
    pub covariance: Option<Vec<f64>>,
}

impl FitResult {
    /// Create a fit result without uncertainty information.
    pub fn new(
        parameters: Vec<f64>,
        lambda: f64,
        converged: bool,
        n_iter: u64,
        n_fev: usize,
        n_gev: usize,
        message: String,
    ) -> Self {
        Self {
            parameters,
            lambda,
            converged,
            n_iter,
            n_fev,
            n_gev,
            message,
            uncertainties: None,
            covariance: None,
        }
    }

    /// Attach uncertainties and (optionally) a covariance matrix.
    pub fn with_uncertainties(
        mut self,
        uncertainties: Vec<f64>,
        covariance: Option<Vec<f64>>,
    ) -> Self {
        self.uncertainties = Some(uncertainties);
        self.covariance = covariance;
        self
    }

    /// Correlation matrix element (i, j). `None` if covariance is
    /// unavailable or the indices are out of range.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let unc = self.uncertainties.as_ref()?;
        let n = self.parameters.len();
        if i >= n || j >= n {
            return None;
        }
        let sigma_i = unc[i];
        let sigma_j = unc[j];
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov[i * n + j] / (sigma_i * sigma_j))
    }
}
