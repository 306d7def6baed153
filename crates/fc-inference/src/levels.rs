//! σ-level to coverage-probability conversions.
//!
//! The scan produces a probability surface; contours are drawn at the
//! coverage matching a desired significance level. For two parameters of
//! interest the n·σ contour sits at coverage 1 − e^(−n²/2); the 1-dof
//! value erf(n/√2) is provided for one-dimensional profile scans.

use statrs::function::erf::erf;

/// Coverage probability of the n·σ contour for two parameters of interest.
pub fn coverage_two_poi(n_sigma: f64) -> f64 {
    1.0 - (-0.5 * n_sigma * n_sigma).exp()
}

/// Coverage probability of the n·σ interval for one parameter of interest.
pub fn coverage_one_poi(n_sigma: f64) -> f64 {
    erf(n_sigma / std::f64::consts::SQRT_2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_two_poi_levels() {
        assert_relative_eq!(coverage_two_poi(1.0), 0.3934693402873666, epsilon = 1e-12);
        assert_relative_eq!(coverage_two_poi(2.0), 0.8646647167633873, epsilon = 1e-12);
        assert!(coverage_two_poi(4.0) > 0.9996);
        assert_eq!(coverage_two_poi(0.0), 0.0);
    }

    #[test]
    fn test_one_poi_levels() {
        assert_relative_eq!(coverage_one_poi(1.0), 0.6826894921370859, epsilon = 1e-9);
        assert_relative_eq!(coverage_one_poi(2.0), 0.9544997361036416, epsilon = 1e-9);
    }

    #[test]
    fn test_monotone_in_sigma() {
        let mut last = 0.0;
        for i in 1..=8 {
            let p = coverage_two_poi(i as f64 * 0.5);
            assert!(p > last);
            last = p;
        }
    }
}
