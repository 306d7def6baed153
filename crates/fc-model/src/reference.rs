//! The bundled reference toy analysis.
//!
//! A single fixed dataset and prior table used throughout the tests: a
//! 20-bin spectrum observed once, with externally measured nuisance
//! parameters. Analyses with different binning or priors construct their
//! own [`SpectrumModel`] and [`PriorSet`] directly.

use crate::prior::{GaussianPrior, PriorSet};
use crate::spectrum::SpectrumModel;

/// Number of bins in the reference spectrum.
pub const N_BINS: usize = 20;

/// The observed energy spectrum (one real "experiment", fixed for the run).
pub const OBSERVED: [u64; N_BINS] =
    [7, 4, 4, 3, 4, 6, 5, 3, 6, 5, 4, 1, 3, 0, 1, 1, 2, 0, 1, 0];

/// The reference 20-bin model.
pub fn model() -> SpectrumModel {
    SpectrumModel::new(N_BINS).expect("N_BINS > 0")
}

/// Externally measured nuisance parameters: center ± uncertainty.
pub fn priors() -> PriorSet {
    PriorSet {
        a: GaussianPrior { center: 10.26, sigma: 0.3 },
        b: GaussianPrior { center: 5.16, sigma: 0.1 },
        c: GaussianPrior { center: 3.31, sigma: 0.6 },
        d: GaussianPrior { center: 0.76, sigma: 0.04 },
    }
}
