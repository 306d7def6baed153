//! Global and profile fits of the spectrum model.
//!
//! One minimization primitive serves both fit kinds: the global fit leaves
//! all six parameters free, the profile fit pins (m, Δ) to a grid point by
//! degenerating their bounds to `(v, v)`. There is no second code path for
//! profiling.

use crate::optimizer::{BoundedLbfgs, ObjectiveFunction, OptimizationResult, OptimizerConfig};
use fc_core::{Error, FitResult, GridPoint, Result};
use fc_model::{
    likelihood, Params, PriorSet, SpectrumModel, IDX_A, IDX_B, IDX_C, IDX_D, IDX_DELTA, IDX_M,
    N_PARAMS,
};
use nalgebra::DMatrix;

/// The λ objective over the flat parameter vector.
///
/// Evaluates λ = 2·Σ(μ − d·ln μ + ln d!) for the model spectrum at the
/// current parameters, plus the Gaussian prior penalty when one is attached.
struct LambdaObjective<'a> {
    model: &'a SpectrumModel,
    counts: &'a [u64],
    penalty: Option<&'a PriorSet>,
}

// Keeps the gradient finite when the line search probes the μ → 0 boundary
// of a populated bin (where λ itself is +∞).
const MU_FLOOR: f64 = 1e-12;

impl ObjectiveFunction for LambdaObjective<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let p = Params::from_slice(params)?;
        let means = self.model.mean_spectrum(&p)?;
        match self.penalty {
            Some(priors) => likelihood::lambda_with_penalty(&means, self.counts, &p, priors),
            None => likelihood::lambda(&means, self.counts),
        }
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let p = Params::from_slice(params)?;
        let means = self.model.mean_spectrum(&p)?;

        // ∂λ/∂θ = Σ_k 2·(1 − d_k/μ_k)·∂μ_k/∂θ, with
        //   μ_k = |A|·E_k + (|C|/|Δ|)·G_k + |D|,
        //   E_k = e^(−k/B),  G_k = e^(−t²/2),  t = (k − m)/Δ.
        let mut grad = vec![0.0; N_PARAMS];
        let (sa, sc, sd) = (p.a.signum(), p.c.signum(), p.d.signum());
        let s_delta = p.delta.signum();
        let abs_delta = p.delta.abs();

        for (idx, (&mu, &count)) in means.iter().zip(self.counts.iter()).enumerate() {
            let k = (idx + 1) as f64;
            let d = count as f64;
            let w = 2.0 * (1.0 - d / mu.max(MU_FLOOR));

            let e_k = (-k / p.b).exp();
            let t = (k - p.m) / p.delta;
            let g_k = (-0.5 * t * t).exp();
            let sig = (p.c.abs() / abs_delta) * g_k;

            grad[IDX_A] += w * sa * e_k;
            grad[IDX_B] += w * p.a.abs() * e_k * k / (p.b * p.b);
            grad[IDX_C] += w * sc * g_k / abs_delta;
            grad[IDX_D] += w * sd;
            grad[IDX_M] += w * sig * (k - p.m) / (p.delta * p.delta);
            grad[IDX_DELTA] += w * s_delta * sig * (t * t - 1.0) / abs_delta;
        }

        if let Some(priors) = self.penalty {
            grad[IDX_A] += 2.0 * priors.a.pull(p.a) / priors.a.sigma;
            grad[IDX_B] += 2.0 * priors.b.pull(p.b) / priors.b.sigma;
            grad[IDX_C] += 2.0 * priors.c.pull(p.c) / priors.c.sigma;
            grad[IDX_D] += 2.0 * priors.d.pull(p.d) / priors.d.sigma;
        }

        Ok(grad)
    }
}

/// Fits the six-parameter spectrum model to a count spectrum.
#[derive(Debug, Clone)]
pub struct SpectrumFitter {
    model: SpectrumModel,
    config: OptimizerConfig,
    penalty: Option<PriorSet>,
}

impl SpectrumFitter {
    /// Create a fitter with the default optimizer budget.
    pub fn new(model: SpectrumModel) -> Self {
        Self { model, config: OptimizerConfig::default(), penalty: None }
    }

    /// Create a fitter with a custom optimizer budget.
    pub fn with_config(model: SpectrumModel, config: OptimizerConfig) -> Self {
        Self { model, config, penalty: None }
    }

    /// Attach a Gaussian prior penalty to λ (prior-penalty mode).
    pub fn with_prior_penalty(mut self, priors: PriorSet) -> Self {
        self.penalty = Some(priors);
        self
    }

    /// The underlying model.
    pub fn model(&self) -> &SpectrumModel {
        &self.model
    }

    /// Optimizer configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// λ at an explicit parameter point (no minimization).
    pub fn lambda_at(&self, counts: &[u64], params: &Params) -> Result<f64> {
        let means = self.model.mean_spectrum(params)?;
        match &self.penalty {
            Some(priors) => likelihood::lambda_with_penalty(&means, counts, params, priors),
            None => likelihood::lambda(&means, counts),
        }
    }

    /// Unconditional fit: all six parameters free.
    ///
    /// Also computes the Hessian (finite differences of the analytic
    /// gradient), covariance, and per-parameter uncertainties.
    pub fn fit_global(&self, counts: &[u64], init: &Params) -> Result<FitResult> {
        let bounds = self.model.default_parameter_bounds();
        let opt = self.fit_minimum(counts, &init.to_array(), &bounds)?;
        let (unc, cov) = self.uncertainties_at(counts, &opt.parameters)?;
        Ok(FitResult::new(
            opt.parameters,
            opt.fval,
            opt.converged,
            opt.n_iter,
            opt.n_fev,
            opt.n_gev,
            opt.message,
        )
        .with_uncertainties(unc, cov))
    }

    /// Profile fit: (m, Δ) pinned to `point`, nuisance parameters free.
    ///
    /// Fast path for the scan loop, no Hessian.
    pub fn fit_profile(&self, counts: &[u64], point: GridPoint, init: &Params) -> Result<FitResult> {
        if !point.m.is_finite() || !point.delta.is_finite() || point.delta == 0.0 {
            return Err(Error::ModelDomain(format!(
                "invalid grid point (m={}, Δ={})",
                point.m, point.delta
            )));
        }
        let mut bounds = self.model.default_parameter_bounds();
        bounds[IDX_M] = (point.m, point.m);
        bounds[IDX_DELTA] = (point.delta, point.delta);

        let start = init.with_poi(point.m, point.delta);
        let opt = self.fit_minimum(counts, &start.to_array(), &bounds)?;
        Ok(FitResult::new(
            opt.parameters,
            opt.fval,
            opt.converged,
            opt.n_iter,
            opt.n_fev,
            opt.n_gev,
            opt.message,
        ))
    }

    /// Shared minimization primitive.
    fn fit_minimum(
        &self,
        counts: &[u64],
        init: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if counts.len() != self.model.n_bins() {
            return Err(Error::Validation(format!(
                "count spectrum length {} != model bins {}",
                counts.len(),
                self.model.n_bins()
            )));
        }
        let objective =
            LambdaObjective { model: &self.model, counts, penalty: self.penalty.as_ref() };

        // A minimization started from an infinite objective (zero mean in a
        // populated bin at the initial guess) cannot make progress; surface
        // the condition as a typed error instead.
        let clamped: Vec<f64> = init
            .iter()
            .zip(bounds.iter())
            .map(|(&v, &(lo, hi))| v.clamp(lo, hi))
            .collect();
        let start_means = self.model.mean_spectrum(&Params::from_slice(&clamped)?)?;
        likelihood::check_support(&start_means, counts)?;

        BoundedLbfgs::new(self.config.clone()).minimize(&objective, init, bounds)
    }

    /// Uncertainties and covariance from the Hessian of λ at `best`.
    ///
    /// Falls back to the diagonal approximation (and omits the covariance)
    /// when the Hessian cannot be inverted cleanly.
    fn uncertainties_at(
        &self,
        counts: &[u64],
        best: &[f64],
    ) -> Result<(Vec<f64>, Option<Vec<f64>>)> {
        let objective =
            LambdaObjective { model: &self.model, counts, penalty: self.penalty.as_ref() };
        let hessian = compute_hessian(&objective, best)?;
        let n = best.len();

        match invert_hessian(&hessian, n) {
            Some(inv) => {
                // λ is twice the NLL, so the covariance is twice the inverse
                // Hessian of λ.
                let mut uncertainties = Vec::with_capacity(n);
                let mut all_ok = true;
                for i in 0..n {
                    let var = 2.0 * inv[(i, i)];
                    if var.is_finite() && var > 0.0 {
                        uncertainties.push(var.sqrt());
                    } else {
                        all_ok = false;
                        uncertainties.push(diagonal_uncertainty(&hessian, i));
                    }
                }
                let cov = if all_ok {
                    Some(inv.iter().map(|v| 2.0 * v).collect::<Vec<f64>>())
                } else {
                    log::warn!("invalid covariance diagonal; omitting covariance matrix");
                    None
                };
                Ok((uncertainties, cov))
            }
            None => {
                log::warn!("Hessian inversion failed, using diagonal approximation");
                let uncertainties = (0..n).map(|i| diagonal_uncertainty(&hessian, i)).collect();
                Ok((uncertainties, None))
            }
        }
    }
}

/// Hessian via forward differences of the analytic gradient.
///
/// H_{ij} ≈ (g_i(x + ε·e_j) − g_i(x)) / ε, then symmetrised.
fn compute_hessian(objective: &dyn ObjectiveFunction, best: &[f64]) -> Result<DMatrix<f64>> {
    let n = best.len();
    let grad_center = objective.gradient(best)?;
    let mut hessian = DMatrix::zeros(n, n);

    for j in 0..n {
        let eps = 1e-4 * best[j].abs().max(1.0);
        let mut plus = best.to_vec();
        plus[j] += eps;
        let grad_plus = objective.gradient(&plus)?;
        for i in 0..n {
            hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / eps;
        }
    }

    let ht = hessian.transpose();
    Ok((&hessian + &ht) * 0.5)
}

/// Invert the Hessian via damped Cholesky.
///
/// Even at a valid minimum the finite-difference Hessian can be slightly
/// indefinite; geometric diagonal damping avoids negative variances before
/// falling back to an LU inverse.
fn invert_hessian(hessian: &DMatrix<f64>, n: usize) -> Option<DMatrix<f64>> {
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut damped = hessian.clone();
    let mut damping = 0.0_f64;
    let max_attempts = 10;

    for attempt in 0..max_attempts {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(damped.clone()) {
            return Some(chol.solve(&identity));
        }
        if attempt + 1 == max_attempts {
            break;
        }
        let next = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        let add = next - damping;
        for i in 0..n {
            damped[(i, i)] += add;
        }
        damping = next;
    }

    let inv = damped.lu().try_inverse()?;
    for i in 0..n {
        let v = inv[(i, i)];
        if !(v.is_finite() && v > 0.0) {
            return None;
        }
    }
    Some(inv)
}

fn diagonal_uncertainty(hessian: &DMatrix<f64>, i: usize) -> f64 {
    // var ≈ 2 / H_ii for the λ-scale Hessian.
    (2.0 / hessian[(i, i)].abs().max(1e-12)).sqrt()
}
