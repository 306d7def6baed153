//! # fc-model
//!
//! The statistical model layer of fcscan: the six-parameter mean-spectrum
//! model of a binned counting experiment (exponential background, Gaussian
//! signal peak, flat floor), its Poisson likelihood, Gaussian nuisance
//! priors, and the bundled reference analysis used by tests and examples.
//!
//! Everything in this crate is pure and deterministic; random sampling and
//! minimization live in `fc-inference`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Poisson negative log-likelihood and the λ test statistic.
pub mod likelihood;
/// Gaussian nuisance priors.
pub mod prior;
/// Bundled reference toy analysis (observed counts + prior table).
pub mod reference;
/// Parameter vector and mean-spectrum model.
pub mod spectrum;

pub use likelihood::{lambda, lambda_with_penalty, poisson_nll};
pub use prior::{GaussianPrior, PriorMode, PriorSet};
pub use spectrum::{Params, SpectrumModel, IDX_A, IDX_B, IDX_C, IDX_D, IDX_DELTA, IDX_M, N_PARAMS};
