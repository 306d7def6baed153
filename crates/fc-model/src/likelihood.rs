//! Poisson likelihood of a binned count spectrum.
//!
//! The test statistic is λ = 2·Σ_k (μ_k − d_k·ln μ_k + ln d_k!), twice the
//! Poisson negative log-likelihood up to sign. `ln d!` is evaluated through
//! the log-gamma function, never a Stirling approximation.

use crate::prior::PriorSet;
use crate::spectrum::Params;
use fc_core::{Error, Result};
use statrs::function::gamma::ln_gamma;

#[inline]
fn ln_factorial(d: u64) -> f64 {
    ln_gamma(d as f64 + 1.0)
}

/// Negative log-likelihood contribution of a single bin.
///
/// A zero mean in an empty bin contributes 0; a zero (or negative) mean in a
/// populated bin contributes +∞: an unbounded candidate the minimizer
/// rejects through its line search, never a NaN or a panic. Finite-precision
/// optimizers probe arbitrarily close to μ = 0, so this is a hard guarantee.
#[inline]
pub fn poisson_bin_nll(mu: f64, count: u64) -> f64 {
    if mu <= 0.0 {
        return if count == 0 { 0.0 } else { f64::INFINITY };
    }
    mu - (count as f64) * mu.ln() + ln_factorial(count)
}

/// Poisson negative log-likelihood of `counts` under `means`.
pub fn poisson_nll(means: &[f64], counts: &[u64]) -> Result<f64> {
    if means.len() != counts.len() {
        return Err(Error::Validation(format!(
            "spectrum length mismatch: {} means vs {} counts",
            means.len(),
            counts.len()
        )));
    }
    Ok(means.iter().zip(counts.iter()).map(|(&mu, &d)| poisson_bin_nll(mu, d)).sum())
}

/// The test statistic λ = 2·NLL.
pub fn lambda(means: &[f64], counts: &[u64]) -> Result<f64> {
    Ok(2.0 * poisson_nll(means, counts)?)
}

/// λ plus the Gaussian prior penalty Σ((θ−c)/σ)², in λ units.
///
/// Used when the fitter runs in [`crate::PriorMode::Penalty`]; with
/// [`crate::PriorMode::SeedOnly`] the plain [`lambda`] applies.
pub fn lambda_with_penalty(
    means: &[f64],
    counts: &[u64],
    params: &Params,
    priors: &PriorSet,
) -> Result<f64> {
    Ok(lambda(means, counts)? + priors.penalty_lambda(params))
}

/// Eagerly reject a spectrum that cannot support the observed counts.
///
/// The evaluator itself defends against μ = 0 in a populated bin by
/// returning +∞; this check lets callers surface the condition as a typed
/// error before starting a minimization from an infinite objective.
pub fn check_support(means: &[f64], counts: &[u64]) -> Result<()> {
    if means.len() != counts.len() {
        return Err(Error::Validation(format!(
            "spectrum length mismatch: {} means vs {} counts",
            means.len(),
            counts.len()
        )));
    }
    for (k, (&mu, &d)) in means.iter().zip(counts.iter()).enumerate() {
        if mu <= 0.0 && d > 0 {
            return Err(Error::LikelihoodDomain(format!(
                "bin {} has mean {} but {} observed counts",
                k + 1,
                mu,
                d
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::GaussianPrior;
    use approx::assert_relative_eq;

    #[test]
    fn test_bin_nll_matches_naive_pmf() {
        // -ln P(d; mu) for small d, where ln d! is exact.
        let mu: f64 = 2.5;
        let d = 3u64;
        let pmf = mu.powi(d as i32) * (-mu).exp() / 6.0;
        assert_relative_eq!(poisson_bin_nll(mu, d), -pmf.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_empty_bin_zero_mean_is_defined() {
        assert_eq!(poisson_bin_nll(0.0, 0), 0.0);
    }

    #[test]
    fn test_populated_bin_zero_mean_is_infinite() {
        assert_eq!(poisson_bin_nll(0.0, 3), f64::INFINITY);
        assert_eq!(poisson_bin_nll(-1.0, 3), f64::INFINITY);
        assert!(!poisson_bin_nll(1e-300, 3).is_nan());
    }

    #[test]
    fn test_lambda_is_twice_nll() {
        let means = [3.0, 4.0, 5.0];
        let counts = [2, 4, 7];
        let nll = poisson_nll(&means, &counts).unwrap();
        assert_relative_eq!(lambda(&means, &counts).unwrap(), 2.0 * nll, epsilon = 1e-12);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        assert!(poisson_nll(&[1.0, 2.0], &[1]).is_err());
    }

    #[test]
    fn test_nll_minimized_at_observed_counts() {
        // Per bin, mu = d minimizes mu - d ln mu.
        let counts = [2u64, 5, 9];
        let at_counts: Vec<f64> = counts.iter().map(|&d| d as f64).collect();
        let base = poisson_nll(&at_counts, &counts).unwrap();
        for shift in [-0.5, -0.1, 0.1, 0.5] {
            let shifted: Vec<f64> = at_counts.iter().map(|m| m + shift).collect();
            assert!(poisson_nll(&shifted, &counts).unwrap() > base);
        }
    }

    #[test]
    fn test_penalty_added_in_lambda_units() {
        let priors = PriorSet {
            a: GaussianPrior::new(10.0, 1.0).unwrap(),
            b: GaussianPrior::new(5.0, 0.5).unwrap(),
            c: GaussianPrior::new(3.0, 1.0).unwrap(),
            d: GaussianPrior::new(0.7, 0.1).unwrap(),
        };
        let params = Params::new(11.0, 5.0, 3.0, 0.7, 8.0, 2.0); // A pulled by 1σ
        let means = [3.0, 4.0];
        let counts = [3, 4];
        let plain = lambda(&means, &counts).unwrap();
        let with = lambda_with_penalty(&means, &counts, &params, &priors).unwrap();
        assert_relative_eq!(with - plain, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_check_support() {
        assert!(check_support(&[0.0, 1.0], &[0, 2]).is_ok());
        assert!(matches!(
            check_support(&[0.0, 1.0], &[1, 2]),
            Err(fc_core::Error::LikelihoodDomain(_))
        ));
    }
}
