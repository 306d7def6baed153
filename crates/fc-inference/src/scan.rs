//! Grid scan and coverage aggregation.
//!
//! For every point of a rectangular grid in the (m, Δ) plane: profile-fit
//! the observed spectrum with (m, Δ) pinned, generate and profile-fit an
//! ensemble of pseudo-experiments at that point's best-fit nuisance values,
//! and reduce the ensemble to one coverage probability: the fraction of
//! pseudo-experiments whose profile statistic falls below the real-data
//! value. The assembled probability surface is the scan's product;
//! iso-probability contour tracing is left to the caller (see [`crate::levels`]
//! for the σ-level thresholds).
//!
//! Grid points are processed sequentially with warm-started fits; the toy
//! ensemble inside one point runs on rayon with per-toy deterministic seeds,
//! so the surface is bit-identical for a given configuration and seed no
//! matter how many threads are used.

use crate::fitter::SpectrumFitter;
use crate::optimizer::OptimizerConfig;
use crate::toys::{self, NuisanceFluctuation};
use fc_core::{Error, FitResult, GridPoint, Result};
use fc_model::{Params, PriorMode, PriorSet, SpectrumModel};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Scan configuration: grid geometry, ensemble size, seeding, budgets.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Inclusive m range.
    pub m_range: (f64, f64),
    /// Number of m grid values (≥ 1).
    pub m_steps: usize,
    /// Inclusive Δ range; the lower edge must be > 0.
    pub delta_range: (f64, f64),
    /// Number of Δ grid values (≥ 1).
    pub delta_steps: usize,
    /// Pseudo-experiments per grid point.
    pub n_toys: usize,
    /// Master seed; every grid point derives its own sub-stream.
    pub seed: u64,
    /// Nuisance treatment during toy generation.
    pub fluctuation: NuisanceFluctuation,
    /// Whether the priors penalize λ or only seed initial guesses.
    pub prior_mode: PriorMode,
    /// Ceiling on the fraction of dropped toys (and of excluded grid
    /// points) before the whole scan is declared mis-calibrated.
    pub max_exclusion_rate: f64,
    /// Minimizer budget for every fit in the scan.
    pub optimizer: OptimizerConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            m_range: (4.0, 12.0),
            m_steps: 17,
            delta_range: (0.5, 4.0),
            delta_steps: 15,
            n_toys: 1000,
            seed: 0,
            fluctuation: NuisanceFluctuation::default(),
            prior_mode: PriorMode::default(),
            max_exclusion_rate: 0.01,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl ScanConfig {
    fn validate(&self) -> Result<()> {
        let finite = |r: (f64, f64)| r.0.is_finite() && r.1.is_finite() && r.0 <= r.1;
        if !finite(self.m_range) {
            return Err(Error::Validation(format!("invalid m range {:?}", self.m_range)));
        }
        if !finite(self.delta_range) || self.delta_range.0 <= 0.0 {
            return Err(Error::Validation(format!(
                "invalid Δ range {:?} (lower edge must be > 0)",
                self.delta_range
            )));
        }
        if self.m_steps == 0 || self.delta_steps == 0 {
            return Err(Error::Validation("grid must have at least one point per axis".into()));
        }
        if self.n_toys == 0 {
            return Err(Error::Validation("n_toys must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.max_exclusion_rate) {
            return Err(Error::Validation(format!(
                "max_exclusion_rate {} outside [0, 1]",
                self.max_exclusion_rate
            )));
        }
        Ok(())
    }
}

/// Coverage probability at one grid point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageEstimate {
    /// The tested (m, Δ) point.
    pub point: GridPoint,
    /// Fraction of valid pseudo-experiments with λ below the real-data
    /// profile value; NaN when the point is excluded.
    pub probability: f64,
    /// Real-data profile statistic λ_p; NaN when the point is excluded.
    pub lambda_profile: f64,
    /// Valid pseudo-experiments entering the probability.
    pub n_used: usize,
    /// Pseudo-experiments dropped after a failed retry.
    pub n_dropped: usize,
    /// True when the real-data profile fit failed even after a retry (no
    /// probability is available at this point).
    pub excluded: bool,
}

impl CoverageEstimate {
    /// Monte-Carlo standard error √(p(1−p)/n) of the probability.
    pub fn standard_error(&self) -> f64 {
        if self.excluded || self.n_used == 0 {
            return f64::NAN;
        }
        (self.probability * (1.0 - self.probability) / self.n_used as f64).sqrt()
    }
}

/// The completed probability surface over the (m, Δ) grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageSurface {
    /// Grid values along the m axis.
    pub m_values: Vec<f64>,
    /// Grid values along the Δ axis.
    pub delta_values: Vec<f64>,
    /// Row-major estimates: index = i_m · delta_steps + i_delta.
    pub estimates: Vec<CoverageEstimate>,
    /// The once-per-scan unconditional fit (diagnostics, seeding).
    pub global_fit: FitResult,
    /// Grid points excluded because the real-data profile fit failed.
    pub n_excluded_points: usize,
    /// Scan-wide fraction of dropped pseudo-experiments.
    pub toy_drop_rate: f64,
}

impl CoverageSurface {
    /// Estimate at grid indices (i_m, i_delta).
    pub fn estimate(&self, i_m: usize, i_delta: usize) -> &CoverageEstimate {
        &self.estimates[i_m * self.delta_values.len() + i_delta]
    }
}

#[derive(Default, Clone, Copy)]
struct ToyTally {
    n_below: usize,
    n_valid: usize,
    n_dropped: usize,
}

impl ToyTally {
    fn merge(self, other: Self) -> Self {
        Self {
            n_below: self.n_below + other.n_below,
            n_valid: self.n_valid + other.n_valid,
            n_dropped: self.n_dropped + other.n_dropped,
        }
    }
}

/// Drives the whole construction: one global fit, then per grid point one
/// real-data profile fit and one calibrated toy ensemble.
pub struct GridScanner {
    model: SpectrumModel,
    priors: PriorSet,
    config: ScanConfig,
}

impl GridScanner {
    /// Create a scanner; the configuration is validated once here.
    pub fn new(model: SpectrumModel, priors: PriorSet, config: ScanConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { model, priors, config })
    }

    /// Run the scan over the observed count spectrum.
    pub fn run(&self, counts: &[u64]) -> Result<CoverageSurface> {
        if counts.len() != self.model.n_bins() {
            return Err(Error::Validation(format!(
                "observed spectrum length {} != model bins {}",
                counts.len(),
                self.model.n_bins()
            )));
        }

        let fitter = match self.config.prior_mode {
            PriorMode::SeedOnly => {
                SpectrumFitter::with_config(self.model, self.config.optimizer.clone())
            }
            PriorMode::Penalty => {
                SpectrumFitter::with_config(self.model, self.config.optimizer.clone())
                    .with_prior_penalty(self.priors)
            }
        };

        let m_values = linspace(self.config.m_range, self.config.m_steps);
        let delta_values = linspace(self.config.delta_range, self.config.delta_steps);

        // One unconditional fit per scan: seeds the profile fits and flags
        // any grid point whose λ_p lands below the global minimum.
        let seed_init =
            self.priors.seed_params(midpoint(self.config.m_range), midpoint(self.config.delta_range));
        let global = self.global_fit_with_retry(&fitter, counts, &seed_init)?;
        let lambda_global = global.lambda;
        let global_params = Params::from_slice(&global.parameters)?;

        let n_points = m_values.len() * delta_values.len();
        let mut estimates = Vec::with_capacity(n_points);
        let mut n_excluded_points = 0usize;
        let mut total_attempted = 0usize;
        let mut total_dropped = 0usize;

        for (i_m, &m) in m_values.iter().enumerate() {
            // Warm-start chains along a Δ row; each row restarts from the
            // global optimum so a bad corner cannot poison the whole scan.
            let mut warm = global_params;

            for (i_delta, &delta) in delta_values.iter().enumerate() {
                let point = GridPoint::new(m, delta);
                let point_index = (i_m * delta_values.len() + i_delta) as u64;
                let point_seed = toys::stream_seed(self.config.seed, point_index);

                let data_fit = self.profile_with_retry(
                    &fitter,
                    counts,
                    point,
                    &warm,
                    toys::stream_seed(point_seed, u64::MAX),
                )?;

                let data_fit = match data_fit {
                    Some(fit) => fit,
                    None => {
                        log::warn!(
                            "excluding grid point (m={m}, Δ={delta}): real-data profile fit \
                             failed after retry"
                        );
                        n_excluded_points += 1;
                        estimates.push(CoverageEstimate {
                            point,
                            probability: f64::NAN,
                            lambda_profile: f64::NAN,
                            n_used: 0,
                            n_dropped: 0,
                            excluded: true,
                        });
                        continue;
                    }
                };

                let lambda_p = data_fit.lambda;
                let sanity_tol = 1e-6 * lambda_global.abs().max(1.0);
                if lambda_p < lambda_global - sanity_tol {
                    log::warn!(
                        "profile λ={lambda_p} at (m={m}, Δ={delta}) is below the global \
                         minimum λ={lambda_global}: fitter inconsistency"
                    );
                }

                // Toys are generated at the tested point with the nuisance
                // values that make that point most plausible for the data.
                let gen_params = Params::from_slice(&data_fit.parameters)?;

                let tally = (0..self.config.n_toys)
                    .into_par_iter()
                    .with_min_len(8)
                    .map(|toy_idx| -> Result<ToyTally> {
                        let toy_seed = point_seed.wrapping_add(toy_idx as u64);
                        let toy_counts = toys::generate_toy(
                            &self.model,
                            &gen_params,
                            &self.priors,
                            self.config.fluctuation,
                            toy_seed,
                        )?;

                        let toy_fit = self.profile_with_retry(
                            &fitter,
                            &toy_counts,
                            point,
                            &gen_params,
                            toys::stream_seed(toy_seed, u64::MAX),
                        )?;

                        Ok(match toy_fit {
                            Some(fit) => ToyTally {
                                n_below: usize::from(fit.lambda < lambda_p),
                                n_valid: 1,
                                n_dropped: 0,
                            },
                            None => ToyTally { n_below: 0, n_valid: 0, n_dropped: 1 },
                        })
                    })
                    .try_reduce(ToyTally::default, |a, b| Ok(a.merge(b)))?;

                total_attempted += tally.n_valid + tally.n_dropped;
                total_dropped += tally.n_dropped;

                if tally.n_valid == 0 {
                    log::warn!(
                        "excluding grid point (m={m}, Δ={delta}): all {n} pseudo-experiments \
                         failed to fit",
                        n = self.config.n_toys
                    );
                    n_excluded_points += 1;
                    estimates.push(CoverageEstimate {
                        point,
                        probability: f64::NAN,
                        lambda_profile: lambda_p,
                        n_used: 0,
                        n_dropped: tally.n_dropped,
                        excluded: true,
                    });
                    continue;
                }

                let probability = tally.n_below as f64 / tally.n_valid as f64;
                log::debug!(
                    "grid point (m={m}, Δ={delta}): λ_p={lambda_p:.4}, p={probability:.4} \
                     ({}/{} toys)",
                    tally.n_below,
                    tally.n_valid
                );

                estimates.push(CoverageEstimate {
                    point,
                    probability,
                    lambda_profile: lambda_p,
                    n_used: tally.n_valid,
                    n_dropped: tally.n_dropped,
                    excluded: false,
                });

                warm = gen_params;
            }
        }

        let toy_drop_rate =
            if total_attempted == 0 { 0.0 } else { total_dropped as f64 / total_attempted as f64 };
        if toy_drop_rate > self.config.max_exclusion_rate {
            return Err(Error::NonConvergence(format!(
                "toy exclusion rate {:.2}% exceeds the {:.2}% ceiling: calibration problem",
                100.0 * toy_drop_rate,
                100.0 * self.config.max_exclusion_rate
            )));
        }
        let point_exclusion_rate = n_excluded_points as f64 / n_points as f64;
        if point_exclusion_rate > self.config.max_exclusion_rate {
            return Err(Error::NonConvergence(format!(
                "{n_excluded_points} of {n_points} grid points excluded: calibration problem"
            )));
        }

        Ok(CoverageSurface {
            m_values,
            delta_values,
            estimates,
            global_fit: global,
            n_excluded_points,
            toy_drop_rate,
        })
    }

    /// Unconditional fit with one perturbed retry; failure here is fatal.
    fn global_fit_with_retry(
        &self,
        fitter: &SpectrumFitter,
        counts: &[u64],
        init: &Params,
    ) -> Result<FitResult> {
        match fitter.fit_global(counts, init) {
            Ok(fit) if fit.converged => return Ok(fit),
            Ok(_) | Err(Error::NonConvergence(_)) => {}
            Err(e) => return Err(e),
        }
        let mut rng = StdRng::seed_from_u64(toys::stream_seed(self.config.seed, u64::MAX - 1));
        let perturbed = perturb_nuisances(init, &mut rng);
        match fitter.fit_global(counts, &perturbed) {
            Ok(fit) if fit.converged => Ok(fit),
            Ok(fit) => Err(Error::NonConvergence(format!(
                "global fit did not converge after retry: {}",
                fit.message
            ))),
            Err(e) => Err(e),
        }
    }

    /// Profile fit with one perturbed retry.
    ///
    /// `Ok(None)` means both attempts failed to converge; the caller drops
    /// the pseudo-experiment (or excludes the grid point). Domain and
    /// validation errors propagate: they are configuration bugs, not fit
    /// instability.
    fn profile_with_retry(
        &self,
        fitter: &SpectrumFitter,
        counts: &[u64],
        point: GridPoint,
        init: &Params,
        retry_seed: u64,
    ) -> Result<Option<FitResult>> {
        match fitter.fit_profile(counts, point, init) {
            Ok(fit) if fit.converged => return Ok(Some(fit)),
            Ok(_) | Err(Error::NonConvergence(_)) => {}
            Err(e) => return Err(e),
        }
        let mut rng = StdRng::seed_from_u64(retry_seed);
        let perturbed = perturb_nuisances(init, &mut rng);
        match fitter.fit_profile(counts, point, &perturbed) {
            Ok(fit) if fit.converged => Ok(Some(fit)),
            Ok(_) | Err(Error::NonConvergence(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Nudge the nuisance values by ±10% for a retry from a fresh basin.
fn perturb_nuisances(params: &Params, rng: &mut StdRng) -> Params {
    let mut jitter = |v: f64| {
        let factor: f64 = rng.gen_range(0.9..1.1);
        v * factor
    };
    Params {
        a: jitter(params.a),
        b: jitter(params.b),
        c: jitter(params.c),
        d: jitter(params.d),
        ..*params
    }
}

fn linspace(range: (f64, f64), steps: usize) -> Vec<f64> {
    if steps == 1 {
        return vec![range.0];
    }
    let span = range.1 - range.0;
    (0..steps).map(|i| range.0 + span * i as f64 / (steps - 1) as f64).collect()
}

fn midpoint(range: (f64, f64)) -> f64 {
    0.5 * (range.0 + range.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linspace_endpoints() {
        let v = linspace((4.0, 12.0), 5);
        assert_eq!(v, vec![4.0, 6.0, 8.0, 10.0, 12.0]);
        assert_eq!(linspace((3.0, 9.0), 1), vec![3.0]);
    }

    #[test]
    fn test_config_validation() {
        let mut cfg = ScanConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.delta_range = (0.0, 4.0);
        assert!(cfg.validate().is_err());

        cfg = ScanConfig { n_toys: 0, ..ScanConfig::default() };
        assert!(cfg.validate().is_err());

        cfg = ScanConfig { m_steps: 0, ..ScanConfig::default() };
        assert!(cfg.validate().is_err());

        cfg = ScanConfig { max_exclusion_rate: 1.5, ..ScanConfig::default() };
        assert!(cfg.validate().is_err());

        cfg = ScanConfig { m_range: (12.0, 4.0), ..ScanConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_standard_error_shrinks_with_ensemble_size() {
        let at = |n: usize| CoverageEstimate {
            point: GridPoint::new(8.0, 2.0),
            probability: 0.5,
            lambda_profile: 40.0,
            n_used: n,
            n_dropped: 0,
            excluded: false,
        };
        let se_100 = at(100).standard_error();
        let se_10000 = at(10_000).standard_error();
        assert!((se_100 / se_10000 - 10.0).abs() < 1e-9);
        assert!(at(0).standard_error().is_nan());
    }

    #[test]
    fn test_perturbation_is_bounded_and_keeps_poi() {
        let p = Params::new(10.0, 5.0, 3.0, 0.7, 8.0, 2.0);
        let mut rng = StdRng::seed_from_u64(1);
        let q = perturb_nuisances(&p, &mut rng);
        assert_eq!(q.m, p.m);
        assert_eq!(q.delta, p.delta);
        for (orig, new) in [(p.a, q.a), (p.b, q.b), (p.c, q.c), (p.d, q.d)] {
            assert!((new / orig - 1.0).abs() < 0.1 + 1e-12);
        }
    }

    #[test]
    fn test_surface_indexing() {
        let est = |m: f64, delta: f64| CoverageEstimate {
            point: GridPoint::new(m, delta),
            probability: 0.1,
            lambda_profile: 1.0,
            n_used: 10,
            n_dropped: 0,
            excluded: false,
        };
        let surface = CoverageSurface {
            m_values: vec![1.0, 2.0],
            delta_values: vec![0.5, 1.0, 1.5],
            estimates: vec![
                est(1.0, 0.5),
                est(1.0, 1.0),
                est(1.0, 1.5),
                est(2.0, 0.5),
                est(2.0, 1.0),
                est(2.0, 1.5),
            ],
            global_fit: FitResult::new(vec![0.0; 6], 0.0, true, 0, 0, 0, String::new()),
            n_excluded_points: 0,
            toy_drop_rate: 0.0,
        };
        assert_eq!(surface.estimate(1, 2).point.m, 2.0);
        assert_eq!(surface.estimate(1, 2).point.delta, 1.5);
    }
}
