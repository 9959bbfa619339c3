use approx::assert_abs_diff_eq;
use msepm::gradient::site_values;
use msepm::{CvConfig, EpmConfig, EpmCv, EpmModel};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

fn cohort(n_samples: usize, seed: u64) -> (Array2<f64>, Array2<f64>) {
    let states = Array2::from_shape_fn((n_samples, 1), |(s, _)| 10.0 + s as f64 * 1.5);
    let coefficients = Array2::from_shape_fn((8, 1), |(f, _)| 0.25 * f as f64 - 0.8);
    let intercepts = Array1::from_shape_fn(8, |f| f as f64 * 3.0);

    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.1).unwrap();
    let mut observations = site_values(coefficients.view(), intercepts.view(), states.view());
    observations.mapv_inplace(|v| v + rng.sample(noise));
    (states, observations)
}

fn epm_config() -> EpmConfig {
    EpmConfig {
        iter_limit: 25,
        learning_rate: 0.05,
        ..EpmConfig::default()
    }
}

#[test]
fn out_of_fold_predictions_match_independent_fold_fits() {
    let (states, observations) = cohort(24, 17);
    let cv = EpmCv::new(CvConfig {
        cv_folds: 4,
        epm: epm_config(),
        ..CvConfig::default()
    });
    let result = cv.fit(states.view(), observations.view()).unwrap();
    assert_eq!(result.folds.len(), 4);
    assert_eq!(result.fold_reports.len(), 4);

    for test_indices in &result.folds {
        let train_indices: Vec<usize> = (0..states.nrows())
            .filter(|s| !test_indices.contains(s))
            .collect();

        let mut model = EpmModel::new(epm_config());
        model
            .fit(
                states.select(Axis(0), &train_indices).view(),
                observations.select(Axis(1), &train_indices).view(),
                None,
            )
            .unwrap();
        let expected = model
            .predict(observations.select(Axis(1), test_indices).view())
            .unwrap();
        let actual = result.out_of_fold.select(Axis(0), test_indices);
        assert_abs_diff_eq!(actual, expected, epsilon = 1e-9);
    }
}

#[test]
fn final_model_matches_a_fit_on_all_samples() {
    let (states, observations) = cohort(18, 3);
    let result = EpmCv::new(CvConfig {
        epm: epm_config(),
        ..CvConfig::default()
    })
    .fit(states.view(), observations.view())
    .unwrap();

    let mut direct = EpmModel::new(epm_config());
    let report = direct
        .fit(states.view(), observations.view(), None)
        .unwrap();
    assert_eq!(result.final_report, report);
    assert_eq!(result.model.coefficients(), direct.coefficients());
    assert_eq!(result.model.intercepts(), direct.intercepts());
}

#[test]
fn every_sample_is_predicted_exactly_once() {
    let (states, observations) = cohort(23, 8);
    let result = EpmCv::new(CvConfig {
        cv_folds: 5,
        randomize_sample_order: true,
        seed: 99,
        epm: epm_config(),
    })
    .fit(states.view(), observations.view())
    .unwrap();

    let mut seen: Vec<usize> = result.folds.concat();
    seen.sort_unstable();
    assert_eq!(seen, (0..23).collect::<Vec<_>>());
    assert_eq!(result.out_of_fold.dim(), (23, 1));
    assert!(result.out_of_fold.iter().all(|v| v.is_finite()));
    // Held-out samples are still tracked closely on well-conditioned data.
    assert_abs_diff_eq!(result.out_of_fold, states, epsilon = 1.0);
}

#[test]
fn seeded_shuffle_is_reproducible() {
    let (states, observations) = cohort(20, 1);
    let config = CvConfig {
        cv_folds: 3,
        randomize_sample_order: true,
        seed: 1234,
        epm: epm_config(),
    };
    let first = EpmCv::new(config.clone())
        .fit(states.view(), observations.view())
        .unwrap();
    let second = EpmCv::new(config)
        .fit(states.view(), observations.view())
        .unwrap();

    assert_eq!(first.folds, second.folds);
    assert_eq!(first.out_of_fold, second.out_of_fold);
}

#[test]
fn flat_states_are_accepted() {
    let (states, observations) = cohort(12, 5);
    let flat = states.index_axis(Axis(1), 0).to_owned();
    let cv = EpmCv::new(CvConfig {
        epm: epm_config(),
        ..CvConfig::default()
    });
    let from_flat = cv.fit_flat(flat.view(), observations.view()).unwrap();
    let from_matrix = cv.fit(states.view(), observations.view()).unwrap();
    assert_eq!(from_flat.out_of_fold, from_matrix.out_of_fold);
}
