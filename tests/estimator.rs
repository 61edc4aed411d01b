use lowrank::{
    block_lowrank_estimate, Config, ContinuousEstimator, DiscreteEstimator, Error, EstimateKind,
    FrequencyTables, MassThreshold,
};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// 1000 rows of a deterministic 4-category by 4-category pairing.
fn four_by_four_sample() -> Vec<(u8, u8)> {
    (0..1000u32)
        .map(|i| (((i * 7) % 4) as u8, ((i * i + i / 5) % 4) as u8))
        .collect()
}

#[test]
fn fitted_table_is_a_probability_matrix() {
    let mut estimator = DiscreteEstimator::with_alpha(0.1).unwrap();
    estimator.fit(&four_by_four_sample()).unwrap();

    let table = estimator.probability_matrix().unwrap();
    assert_eq!(table.shape(), (4, 4));
    assert!(table.iter().all(|&cell| cell >= 0.0));
    assert!((table.sum() - 1.0).abs() < 1e-9);
    assert_eq!(estimator.estimate_kind().unwrap(), EstimateKind::Blockwise);
}

#[test]
fn small_sample_averages_the_half_tables() {
    // Six categories per axis and ten rows: n <= d * ln(d), so the estimator
    // must short-circuit to the exact elementwise average.
    let rows: Vec<(u8, u8)> = (0..10).map(|i| (i % 6, i % 6)).collect();

    let mut estimator = DiscreteEstimator::new(Config::default());
    estimator.fit(&rows).unwrap();
    assert_eq!(estimator.estimate_kind().unwrap(), EstimateKind::Averaged);

    let tables = FrequencyTables::from_sample(&rows).unwrap();
    let y1 = &tables.first / tables.first.sum();
    let y2 = &tables.second / tables.second.sum();
    let expected = (&y1 + &y2) * 0.5;
    assert_eq!(estimator.probability_matrix().unwrap(), &expected);
}

#[test]
fn fit_is_deterministic() {
    let rows = four_by_four_sample();

    let mut one = DiscreteEstimator::new(Config::default());
    let mut two = DiscreteEstimator::new(Config::default());
    one.fit(&rows).unwrap();
    two.fit(&rows).unwrap();

    assert_eq!(
        one.probability_matrix().unwrap(),
        two.probability_matrix().unwrap()
    );
}

#[test]
fn degenerate_column_collapses_the_table() {
    let rows: Vec<(u8, u8)> = (0..100).map(|i| (i % 4, 42)).collect();

    let mut estimator = DiscreteEstimator::new(Config::default());
    estimator.fit(&rows).unwrap();

    let table = estimator.probability_matrix().unwrap();
    assert_eq!(table.shape(), (4, 1));
    assert!((table.sum() - 1.0).abs() < 1e-9);
    assert_eq!(estimator.col_labels().unwrap().label(0), 42);
}

#[test]
fn empty_sample_is_rejected() {
    let mut estimator = DiscreteEstimator::<u8>::new(Config::default());
    assert_eq!(estimator.fit(&[]).unwrap_err(), Error::EmptySample);
}

#[test]
fn invalid_alpha_is_rejected() {
    assert_eq!(Config::new(-1.0), Err(Error::InvalidAlpha(-1.0)));
    assert_eq!(Config::new(0.0), Err(Error::InvalidAlpha(0.0)));
    assert!(matches!(
        Config::new(f64::NAN),
        Err(Error::InvalidAlpha(_))
    ));
}

#[test]
fn accessors_fail_before_any_fit() {
    let estimator = DiscreteEstimator::<u8>::new(Config::default());
    assert_eq!(estimator.probability_matrix(), Err(Error::NotFitted));
    assert_eq!(estimator.estimate_kind(), Err(Error::NotFitted));

    let mut rng = StdRng::seed_from_u64(0);
    assert_eq!(estimator.sample(5, &mut rng), Err(Error::NotFitted));
}

#[test]
fn failed_fit_preserves_earlier_state() {
    let mut estimator = DiscreteEstimator::new(Config::default());
    estimator.fit(&four_by_four_sample()).unwrap();
    let before = estimator.probability_matrix().unwrap().clone();

    assert!(estimator.fit(&[]).is_err());
    assert_eq!(estimator.probability_matrix().unwrap(), &before);
}

#[test]
fn samples_come_from_the_observed_labels() {
    let mut estimator = DiscreteEstimator::new(Config::default());
    estimator.fit(&four_by_four_sample()).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    let draws = estimator.sample(1000, &mut rng).unwrap();
    assert_eq!(draws.len(), 1000);
    assert!(draws.iter().all(|&(a, b)| a < 4 && b < 4));
}

#[test]
fn sampled_frequencies_converge_to_the_fitted_table() {
    let mut estimator = DiscreteEstimator::new(Config::default());
    estimator.fit(&four_by_four_sample()).unwrap();
    let table = estimator.probability_matrix().unwrap().clone();

    let draws = 200_000;
    let mut rng = StdRng::seed_from_u64(7);
    let mut counts = [[0u32; 4]; 4];
    for (a, b) in estimator.sample(draws, &mut rng).unwrap() {
        counts[a as usize][b as usize] += 1;
    }

    for i in 0..4 {
        for j in 0..4 {
            let frequency = counts[i][j] as f64 / draws as f64;
            assert!((frequency - table[(i, j)]).abs() < 0.01);
        }
    }
}

#[test]
fn unit_scaling_constant_matches_the_plain_threshold() {
    let rows = four_by_four_sample();

    let mut plain = DiscreteEstimator::new(Config::default());
    let mut scaled =
        DiscreteEstimator::new(Config::default().with_threshold(MassThreshold::Scaled(1.0)));
    plain.fit(&rows).unwrap();
    scaled.fit(&rows).unwrap();

    assert_eq!(
        plain.probability_matrix().unwrap(),
        scaled.probability_matrix().unwrap()
    );
}

#[test]
fn extreme_threshold_keeps_every_block_empirical() {
    // With an enormous sparsity bound every block is "too sparse", so the
    // whole estimate is the renormalized second-half table.
    let rows = four_by_four_sample();
    let config = Config::default().with_threshold(MassThreshold::Scaled(1e9));

    let mut estimator = DiscreteEstimator::new(config);
    estimator.fit(&rows).unwrap();

    let tables = FrequencyTables::from_sample(&rows).unwrap();
    let expected = &tables.second / tables.second.sum();
    let table = estimator.probability_matrix().unwrap();
    for i in 0..4 {
        for j in 0..4 {
            assert!((table[(i, j)] - expected[(i, j)]).abs() < 1e-12);
        }
    }
}

#[test]
fn precomputed_histograms_can_drive_the_core_directly() {
    let first = DMatrix::from_row_slice(2, 2, &[30.0, 0.0, 0.0, 20.0]);
    let second = DMatrix::from_row_slice(2, 2, &[28.0, 2.0, 1.0, 19.0]);

    let (estimate, kind) = block_lowrank_estimate(&first, &second, 100, &Config::default());
    assert_eq!(kind, EstimateKind::Blockwise);
    assert_eq!(estimate.shape(), (2, 2));
    assert!(estimate.iter().all(|&cell| cell >= 0.0));
    assert!((estimate.sum() - 1.0).abs() < 1e-9);
}

/// 512 deterministic points spread over [0, 0.9] x [0, 0.9].
fn spread_sample() -> Vec<(f64, f64)> {
    (0..512u32)
        .map(|i| {
            let x = ((i * 37) % 512) as f64 / 512.0 * 0.9;
            let y = ((i * 101 + 7) % 512) as f64 / 512.0 * 0.9;
            (x, y)
        })
        .collect()
}

#[test]
fn continuous_density_integrates_to_one_over_its_grid() {
    let rows = spread_sample();
    let mut estimator = ContinuousEstimator::new(Config::default());
    estimator.fit(&rows).unwrap();

    // Rebuild the published binning rule to hit every bin center exactly.
    let n = rows.len();
    let head = &rows[..n / 2];
    let x_low = head.iter().map(|&(x, _)| x).fold(f64::INFINITY, f64::min);
    let x_high = head
        .iter()
        .map(|&(x, _)| x)
        .fold(f64::NEG_INFINITY, f64::max);
    let y_low = head.iter().map(|&(_, y)| y).fold(f64::INFINITY, f64::min);
    let y_high = head
        .iter()
        .map(|&(_, y)| y)
        .fold(f64::NEG_INFINITY, f64::max);

    let cube_root = (n as f64).powf(1.0 / 3.0);
    let x_bins = ((x_high - x_low) * cube_root).floor() as usize;
    let y_bins = ((y_high - y_low) * cube_root).floor() as usize;
    let x_step = (x_high - x_low) / x_bins as f64;
    let y_step = (y_high - y_low) / y_bins as f64;

    let mut integral = 0.0;
    for i in 0..x_bins {
        for j in 0..y_bins {
            let x = x_low + (i as f64 + 0.5) * x_step;
            let y = y_low + (j as f64 + 0.5) * y_step;
            let density = estimator.density(x, y).unwrap();
            assert!(density >= 0.0);
            integral += density * x_step * y_step;
        }
    }
    assert!((integral - 1.0).abs() < 1e-9);

    // Inside the unit square but beyond the observed range the density is 0.
    assert_eq!(estimator.density(0.99, 0.45).unwrap(), 0.0);
}

#[test]
fn continuous_rejects_points_outside_the_unit_square() {
    let mut estimator = ContinuousEstimator::new(Config::default());
    estimator.fit(&spread_sample()).unwrap();

    assert!(matches!(
        estimator.density(-0.1, 0.5),
        Err(Error::OutOfRange(_, _))
    ));
    assert!(matches!(
        estimator.density(0.5, 1.01),
        Err(Error::OutOfRange(_, _))
    ));
    assert!(matches!(
        estimator.density(f64::NAN, 0.5),
        Err(Error::OutOfRange(_, _))
    ));
}

#[test]
fn continuous_validation_errors() {
    let mut estimator = ContinuousEstimator::new(Config::default());
    assert_eq!(estimator.density(0.5, 0.5), Err(Error::NotFitted));
    assert_eq!(estimator.fit(&[]).unwrap_err(), Error::EmptySample);
    assert_eq!(
        estimator.fit(&[(0.1, f64::NAN)]).unwrap_err(),
        Error::NonFiniteSample
    );
    assert!(matches!(
        ContinuousEstimator::new(Config::default()).with_smoothness(0.0),
        Err(Error::InvalidSmoothness(_))
    ));
}

#[test]
fn point_mass_sample_fits_a_uniform_patch() {
    let rows = vec![(0.4, 0.6); 50];
    let mut estimator = ContinuousEstimator::new(Config::default());
    estimator.fit(&rows).unwrap();

    // Both axes collapse to the resolution width around the observed point.
    let resolution = (50f64).powf(-1.0 / 3.0);
    let expected = 1.0 / (resolution * resolution);
    assert!((estimator.density(0.4, 0.6).unwrap() - expected).abs() < 1e-9);
    assert_eq!(estimator.density(0.9, 0.9).unwrap(), 0.0);
}

#[test]
fn degenerate_axis_factorizes_the_density() {
    // The first axis never moves; the second spreads over [0, 0.99].
    let rows: Vec<(f64, f64)> = (0..100).map(|i| (0.5, i as f64 / 100.0)).collect();
    let mut estimator = ContinuousEstimator::new(Config::default());
    estimator.fit(&rows).unwrap();

    // The second-half counts land in the upper bins of the first-half grid.
    assert!(estimator.density(0.5, 0.3).unwrap() > 0.0);
    // Far from the degenerate axis support the density vanishes.
    assert_eq!(estimator.density(0.9, 0.3).unwrap(), 0.0);
}

#[test]
fn pdf_evaluates_the_whole_grid() {
    let mut estimator = ContinuousEstimator::new(Config::default());
    estimator.fit(&spread_sample()).unwrap();

    let points: Vec<f64> = (0..10).map(|i| (i as f64 + 0.5) / 10.0).collect();
    let grid = estimator.pdf(&points, &points).unwrap();
    assert_eq!(grid.shape(), (10, 10));
    assert!(grid.iter().all(|&density| density >= 0.0));

    assert!(matches!(
        estimator.pdf(&[0.5, 1.5], &points),
        Err(Error::OutOfRange(_, _))
    ));
}
