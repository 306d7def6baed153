//! Parameter vector and mean-spectrum model.
//!
//! The expected bin content is
//!
//! ```text
//! μ_k = |A|·exp(−k/B) + |C/Δ|·exp(−½·((k−m)/Δ)²) + |D|,   k = 1..=n_bins
//! ```
//!
//! an exponential background with a flat floor plus a Gaussian signal peak.
//! Non-negativity of the background normalization, the peak area, and the
//! floor is enforced by the absolute values; the minimizer is free to roam
//! the full real line on those axes. B and Δ appear as denominators, so
//! zero is outside the model domain; the default parameter bounds keep a
//! bounded minimizer strictly away from it.

use fc_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Number of model parameters.
pub const N_PARAMS: usize = 6;

/// Flat-order index of the background normalization A.
pub const IDX_A: usize = 0;
/// Flat-order index of the background decay length B.
pub const IDX_B: usize = 1;
/// Flat-order index of the signal area C.
pub const IDX_C: usize = 2;
/// Flat-order index of the flat floor D.
pub const IDX_D: usize = 3;
/// Flat-order index of the peak location m (parameter of interest).
pub const IDX_M: usize = 4;
/// Flat-order index of the peak width Δ (parameter of interest).
pub const IDX_DELTA: usize = 5;

/// The six model parameters.
///
/// A, B, C, D are nuisance parameters; m and Δ are the parameters of
/// interest. Immutable value type: the fitter returns new vectors, nothing
/// mutates one in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Background normalization.
    pub a: f64,
    /// Background decay length (nonzero).
    pub b: f64,
    /// Signal peak area.
    pub c: f64,
    /// Flat background floor.
    pub d: f64,
    /// Peak location.
    pub m: f64,
    /// Peak width (nonzero).
    pub delta: f64,
}

impl Params {
    /// Create a parameter vector.
    pub fn new(a: f64, b: f64, c: f64, d: f64, m: f64, delta: f64) -> Self {
        Self { a, b, c, d, m, delta }
    }

    /// Flat `[A, B, C, D, m, Δ]` array for the optimizer.
    pub fn to_array(&self) -> [f64; N_PARAMS] {
        [self.a, self.b, self.c, self.d, self.m, self.delta]
    }

    /// Rebuild from the flat optimizer ordering.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        if values.len() != N_PARAMS {
            return Err(Error::Validation(format!(
                "parameter slice length {} != {}",
                values.len(),
                N_PARAMS
            )));
        }
        Ok(Self {
            a: values[IDX_A],
            b: values[IDX_B],
            c: values[IDX_C],
            d: values[IDX_D],
            m: values[IDX_M],
            delta: values[IDX_DELTA],
        })
    }

    /// Copy with the parameters of interest replaced.
    pub fn with_poi(&self, m: f64, delta: f64) -> Self {
        Self { m, delta, ..*self }
    }
}

/// The mean-spectrum model for a fixed number of bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectrumModel {
    n_bins: usize,
}

impl SpectrumModel {
    /// Create a model with `n_bins` energy bins (indexed 1..=n_bins).
    pub fn new(n_bins: usize) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Validation("n_bins must be > 0".to_string()));
        }
        Ok(Self { n_bins })
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Expected bin contents for the given parameters.
    ///
    /// Errors with [`Error::ModelDomain`] on B = 0, Δ = 0, any non-finite
    /// parameter, or a non-finite mean; these indicate a misconfigured grid
    /// or prior table and are never silently clamped.
    pub fn mean_spectrum(&self, params: &Params) -> Result<Vec<f64>> {
        self.check_domain(params)?;

        let mut means = Vec::with_capacity(self.n_bins);
        for k in 1..=self.n_bins {
            let k = k as f64;
            let background = params.a.abs() * (-k / params.b).exp() + params.d.abs();
            let t = (k - params.m) / params.delta;
            let signal = (params.c / params.delta).abs() * (-0.5 * t * t).exp();
            let mu = background + signal;
            if !mu.is_finite() {
                return Err(Error::ModelDomain(format!(
                    "non-finite mean {mu} in bin {k} for parameters {params:?}"
                )));
            }
            means.push(mu);
        }
        Ok(means)
    }

    fn check_domain(&self, params: &Params) -> Result<()> {
        let vals = params.to_array();
        if vals.iter().any(|v| !v.is_finite()) {
            return Err(Error::ModelDomain(format!("non-finite parameter in {params:?}")));
        }
        if params.b == 0.0 {
            return Err(Error::ModelDomain("B must be nonzero (appears as 1/B)".to_string()));
        }
        if params.delta == 0.0 {
            return Err(Error::ModelDomain("Δ must be nonzero (appears as 1/Δ)".to_string()));
        }
        Ok(())
    }

    /// Wide box bounds for the bounded minimizer, flat order.
    ///
    /// A, C, D are unconstrained in sign (the model takes absolute values);
    /// B and Δ carry strictly positive lower bounds so the minimizer can
    /// never probe the division-by-zero manifold.
    pub fn default_parameter_bounds(&self) -> [(f64, f64); N_PARAMS] {
        [
            (-1e4, 1e4),  // A
            (1e-6, 1e6),  // B
            (-1e4, 1e4),  // C
            (-1e4, 1e4),  // D
            (-1e3, 1e3),  // m
            (1e-6, 1e6),  // Δ
        ]
    }
}
