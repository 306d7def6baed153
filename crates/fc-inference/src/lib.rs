//! # fc-inference
//!
//! The Profiled Feldman-Cousins engine:
//!
//! - a bounded L-BFGS optimizer wrapper ([`optimizer`]),
//! - the constrained fitter for global and profile fits ([`fitter`]),
//! - the Poisson pseudo-experiment generator with deterministic seed
//!   sub-streams ([`toys`]),
//! - the grid scanner / coverage aggregator ([`scan`]),
//! - σ-level ↔ coverage-probability conversions ([`levels`]).
//!
//! The scanner drives everything; fitter and toy generator both sit on the
//! model layer in `fc-model`. Within one grid point the toy ensemble runs on
//! rayon with per-toy deterministic seeds, so results are bit-identical
//! regardless of thread count.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Global and profile fits of the spectrum model.
pub mod fitter;
/// σ-level to coverage-probability conversions.
pub mod levels;
/// Bounded L-BFGS minimizer wrapper.
pub mod optimizer;
/// Grid scan and coverage aggregation.
pub mod scan;
/// Pseudo-experiment generation and seed sub-streams.
pub mod toys;

pub use fitter::SpectrumFitter;
pub use optimizer::{BoundedLbfgs, ObjectiveFunction, OptimizationResult, OptimizerConfig};
pub use scan::{CoverageEstimate, CoverageSurface, GridScanner, ScanConfig};
pub use toys::NuisanceFluctuation;
