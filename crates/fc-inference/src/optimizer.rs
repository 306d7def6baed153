//! Bounded quasi-Newton minimization.
//!
//! Thin wrapper around argmin's L-BFGS with box constraints applied by
//! clamping: parameters are clamped into their bounds before every
//! evaluation, and gradient components pointing out of an active bound are
//! zeroed (projected gradient). Pinning a parameter is expressed as a
//! degenerate bound `(v, v)`; the same mechanism serves free, boxed, and
//! frozen dimensions.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use fc_core::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Minimizer budget and stopping criteria.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum iterations before giving up.
    pub max_iter: u64,
    /// Gradient-norm convergence tolerance.
    pub tol: f64,
    /// Number of L-BFGS correction pairs.
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// Raw minimizer output, before interpretation by the fitter.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Parameters at the discovered minimum (clamped into bounds).
    pub parameters: Vec<f64>,
    /// Objective value at the minimum.
    pub fval: f64,
    /// Iterations used.
    pub n_iter: u64,
    /// Objective evaluations.
    pub n_fev: usize,
    /// Gradient evaluations.
    pub n_gev: usize,
    /// Whether a stopping criterion (not the iteration cap) was met.
    pub converged: bool,
    /// Termination message.
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// A minimizable objective.
pub trait ObjectiveFunction: Send + Sync {
    /// Objective value at `params`.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at `params`; the default is central differences.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];
        for i in 0..n {
            let eps = 1e-8 * params[i].abs().max(1.0);
            let mut plus = params.to_vec();
            plus[i] += eps;
            let mut minus = params.to_vec();
            minus[i] -= eps;
            grad[i] = (self.eval(&plus)? - self.eval(&minus)?) / (2.0 * eps);
        }
        Ok(grad)
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct EvalCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

struct BoundedProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    counts: Arc<EvalCounts>,
}

impl CostFunction for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // Projected gradient: at an active bound, a component pushing
        // further outside would stall the line search in the clamped flat
        // region. For a pinned parameter (lo == hi) both rules apply and the
        // component is always zero.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if x <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }
        Ok(g)
    }
}

/// L-BFGS with box constraints via clamping.
pub struct BoundedLbfgs {
    config: OptimizerConfig,
}

impl BoundedLbfgs {
    /// Create an optimizer with the given budget.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` starting from `init_params`, subject to
    /// per-parameter `bounds` (use `(v, v)` to pin a parameter at `v`).
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }

        let init_clamped = clamp_params(init_params, bounds);
        let counts = Arc::new(EvalCounts::default());
        let problem = BoundedProblem { objective, bounds, counts: counts.clone() };

        let linesearch = MoreThuenteLineSearch::new();
        // Argmin's default cost tolerance (~machine epsilon) is too strict
        // for λ-scale objectives and turns clean convergence into max-iter
        // terminations; relax it relative to the gradient tolerance.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Validation(format!("invalid optimizer tolerance: {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| Error::Validation(format!("invalid optimizer cost tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init_clamped).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::NonConvergence(format!("optimization failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::NonConvergence("no best parameters found".to_string()))?
            .clone();
        let parameters = clamp_params(&best, bounds);
        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );

        Ok(OptimizationResult {
            parameters,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: counts.grad.load(Ordering::Relaxed),
            converged,
            message: termination.to_string(),
        })
    }
}

impl Default for BoundedLbfgs {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = (x - 2)² + (y - 3)², minimum at (2, 3).
    struct Quadratic;

    impl ObjectiveFunction for Quadratic {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            Ok((params[0] - 2.0).powi(2) + (params[1] - 3.0).powi(2))
        }

        fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![2.0 * (params[0] - 2.0), 2.0 * (params[1] - 3.0)])
        }
    }

    #[test]
    fn test_unconstrained_quadratic() {
        let result = BoundedLbfgs::default()
            .minimize(&Quadratic, &[0.0, 0.0], &[(-10.0, 10.0), (-10.0, 10.0)])
            .unwrap();
        assert!(result.converged, "{}", result.message);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.fval, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_minimum_outside_bounds_lands_on_boundary() {
        // Constrained to x ∈ [3, 5], y ∈ [1, 2]: optimum at (3, 2).
        let result = BoundedLbfgs::default()
            .minimize(&Quadratic, &[4.0, 1.5], &[(3.0, 5.0), (1.0, 2.0)])
            .unwrap();
        assert!(result.converged, "{}", result.message);
        assert_relative_eq!(result.parameters[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_pinned_parameter_stays_pinned() {
        // y pinned at 1: optimum at (2, 1), f = 4.
        let result = BoundedLbfgs::default()
            .minimize(&Quadratic, &[0.0, 1.0], &[(-10.0, 10.0), (1.0, 1.0)])
            .unwrap();
        assert!(result.converged, "{}", result.message);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-4);
        assert_eq!(result.parameters[1], 1.0);
        assert_relative_eq!(result.fval, 4.0, epsilon = 1e-6);
    }

    // Rosenbrock, default numerical gradient.
    struct Rosenbrock;

    impl ObjectiveFunction for Rosenbrock {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            let (x, y) = (params[0], params[1]);
            Ok((1.0 - x).powi(2) + 100.0 * (y - x * x).powi(2))
        }
    }

    #[test]
    fn test_rosenbrock_with_numerical_gradient() {
        let result = BoundedLbfgs::default()
            .minimize(&Rosenbrock, &[0.0, 0.0], &[(-10.0, 10.0), (-10.0, 10.0)])
            .unwrap();
        assert_relative_eq!(result.parameters[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(result.parameters[1], 1.0, epsilon = 1e-3);
        assert!(result.fval < 1e-4);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        assert!(BoundedLbfgs::default().minimize(&Quadratic, &[0.0], &[(0.0, 1.0); 2]).is_err());
    }
}
