//! End-to-end grid scan checks: determinism, surface shape, and the
//! coverage sanity value at the best-fit point.

use fc_inference::{GridScanner, ScanConfig, SpectrumFitter};
use fc_model::{reference, Params};

fn small_config() -> ScanConfig {
    ScanConfig {
        m_range: (7.0, 9.0),
        m_steps: 3,
        delta_range: (1.5, 2.5),
        delta_steps: 3,
        n_toys: 100,
        seed: 137,
        // A handful of hard toys out of 900 fits must not abort the test
        // scan; production scans keep the default 1% ceiling.
        max_exclusion_rate: 0.1,
        ..ScanConfig::default()
    }
}

#[test]
fn scan_is_bit_identical_for_identical_configuration() {
    let scanner =
        GridScanner::new(reference::model(), reference::priors(), small_config()).unwrap();
    let a = scanner.run(&reference::OBSERVED).unwrap();
    let b = scanner.run(&reference::OBSERVED).unwrap();

    assert_eq!(a.estimates.len(), b.estimates.len());
    for (ea, eb) in a.estimates.iter().zip(b.estimates.iter()) {
        assert_eq!(ea.probability.to_bits(), eb.probability.to_bits());
        assert_eq!(ea.lambda_profile.to_bits(), eb.lambda_profile.to_bits());
        assert_eq!(ea.n_used, eb.n_used);
    }
    assert_eq!(a.global_fit.lambda.to_bits(), b.global_fit.lambda.to_bits());
}

#[test]
fn scan_surface_is_well_formed() {
    let cfg = small_config();
    let scanner =
        GridScanner::new(reference::model(), reference::priors(), cfg.clone()).unwrap();
    let surface = scanner.run(&reference::OBSERVED).unwrap();

    assert_eq!(surface.m_values.len(), cfg.m_steps);
    assert_eq!(surface.delta_values.len(), cfg.delta_steps);
    assert_eq!(surface.estimates.len(), cfg.m_steps * cfg.delta_steps);
    assert!(surface.global_fit.converged);
    assert!(surface.toy_drop_rate <= cfg.max_exclusion_rate);

    for est in &surface.estimates {
        if est.excluded {
            continue;
        }
        assert!((0.0..=1.0).contains(&est.probability));
        assert!(est.n_used > 0);
        assert!(est.lambda_profile.is_finite());
        // No grid point may undercut the unconditional minimum.
        assert!(est.lambda_profile >= surface.global_fit.lambda - 1e-6);
        let se = est.standard_error();
        assert!(se.is_finite() && se >= 0.0);
    }
}

#[test]
fn different_seeds_give_different_toy_ensembles() {
    let a = GridScanner::new(reference::model(), reference::priors(), small_config())
        .unwrap()
        .run(&reference::OBSERVED)
        .unwrap();
    let b = GridScanner::new(
        reference::model(),
        reference::priors(),
        ScanConfig { seed: 138, ..small_config() },
    )
    .unwrap()
    .run(&reference::OBSERVED)
    .unwrap();

    // The observed data and grid are unchanged, so the profile statistics
    // agree bit-for-bit; the calibrated probabilities must not all agree.
    let mut any_prob_differs = false;
    for (ea, eb) in a.estimates.iter().zip(b.estimates.iter()) {
        assert_eq!(ea.lambda_profile.to_bits(), eb.lambda_profile.to_bits());
        if ea.probability.to_bits() != eb.probability.to_bits() {
            any_prob_differs = true;
        }
    }
    assert!(any_prob_differs);
}

#[test]
fn coverage_at_best_fit_point_is_central() {
    // Profile at the unconditional optimum: the data is a typical draw of
    // its own best-fit hypothesis, so its coverage probability must land
    // well inside (0, 1): near one half, up to Monte-Carlo error and the
    // single-dataset fluctuation. A probability at either extreme would
    // indicate a broken comparison or a broken toy ensemble.
    let fitter = SpectrumFitter::new(reference::model());
    let init = reference::priors().seed_params(8.0, 2.0);
    let global = fitter.fit_global(&reference::OBSERVED, &init).unwrap();
    let best = Params::from_slice(&global.parameters).unwrap();

    let cfg = ScanConfig {
        m_range: (best.m, best.m),
        m_steps: 1,
        delta_range: (best.delta, best.delta),
        delta_steps: 1,
        n_toys: 400,
        seed: 2718,
        max_exclusion_rate: 0.1,
        ..ScanConfig::default()
    };
    let surface = GridScanner::new(reference::model(), reference::priors(), cfg)
        .unwrap()
        .run(&reference::OBSERVED)
        .unwrap();

    let est = surface.estimate(0, 0);
    assert!(!est.excluded);
    assert!(est.n_used >= 360, "too many dropped toys: {}", est.n_dropped);
    assert!(
        est.probability > 0.05 && est.probability < 0.95,
        "coverage at the best-fit point is {}, expected a central value",
        est.probability
    );
    // λ_p at the unconditional optimum is λ_B itself.
    assert!((est.lambda_profile - surface.global_fit.lambda).abs() < 1e-3);
}
