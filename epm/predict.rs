//! Recovery of latent states from observations under fixed feature models.
//!
//! This is the reverse of the per-feature fit: the fitted coefficients become the
//! design matrix, and each sample's intercept-adjusted observations are the target.
//! All samples are solved jointly in one least-squares call.

use crate::lstsq::lstsq_multi;
use crate::model::EpmError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Predicted states together with the conditioning of the coefficient matrix.
#[derive(Clone, Debug)]
pub struct StatePrediction {
    /// samples × k
    pub states: Array2<f64>,
    pub rank: usize,
    pub singular_values: Array1<f64>,
}

/// Solves `coefficients · states[s, :]ᵀ ≈ observations[:, s] - intercepts` for every sample.
pub fn predict_states(
    coefficients: ArrayView2<f64>,
    intercepts: ArrayView1<f64>,
    observations: ArrayView2<f64>,
) -> Result<StatePrediction, EpmError> {
    let n_features = coefficients.nrows();
    if intercepts.len() != n_features {
        return Err(EpmError::DimensionMismatch {
            context: "intercepts vs coefficient rows",
            expected: n_features,
            found: intercepts.len(),
        });
    }
    if observations.nrows() != n_features {
        return Err(EpmError::DimensionMismatch {
            context: "observation features vs fitted features",
            expected: n_features,
            found: observations.nrows(),
        });
    }

    let targets = &observations - &intercepts.insert_axis(Axis(1));
    let fit = lstsq_multi(coefficients, targets.view())?;
    if fit.rank < coefficients.ncols() {
        log::warn!(
            "Coefficient matrix is rank deficient ({} of {}); predicted states are not unique",
            fit.rank,
            coefficients.ncols()
        );
    }

    Ok(StatePrediction {
        states: fit.solution.reversed_axes(),
        rank: fit.rank,
        singular_values: fit.singular_values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient::site_values;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn recovers_states_from_exact_observations() {
        let coefficients = array![[0.5], [2.0], [-1.0], [3.0]];
        let intercepts = array![1.0, 0.0, 4.0, -2.0];
        let states = array![[10.0], [20.0], [35.0]];
        let observations = site_values(coefficients.view(), intercepts.view(), states.view());

        let prediction =
            predict_states(coefficients.view(), intercepts.view(), observations.view()).unwrap();
        assert_eq!(prediction.states.dim(), (3, 1));
        assert_abs_diff_eq!(prediction.states, states, epsilon = 1e-9);
        assert_eq!(prediction.rank, 1);
    }

    #[test]
    fn recovers_multidimensional_states() {
        let coefficients = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, -1.0]];
        let intercepts = array![0.0, 1.0, 2.0, 3.0];
        let states = array![[1.0, 2.0], [-1.0, 0.5]];
        let observations = site_values(coefficients.view(), intercepts.view(), states.view());

        let prediction =
            predict_states(coefficients.view(), intercepts.view(), observations.view()).unwrap();
        assert_abs_diff_eq!(prediction.states, states, epsilon = 1e-9);
        assert_eq!(prediction.rank, 2);
    }

    #[test]
    fn rank_deficient_coefficients_are_reported() {
        // Only the first state dimension influences any feature.
        let coefficients = array![[1.0, 0.0], [2.0, 0.0], [-1.5, 0.0]];
        let intercepts = array![0.0, 1.0, 2.0];
        let observations = array![[1.0, 2.0], [3.0, 5.0], [0.5, -1.0]];

        let prediction =
            predict_states(coefficients.view(), intercepts.view(), observations.view()).unwrap();
        assert_eq!(prediction.rank, 1);
        assert_eq!(prediction.singular_values.len(), 2);
        assert_abs_diff_eq!(prediction.singular_values[1], 0.0, epsilon = 1e-12);
        assert_eq!(prediction.states.dim(), (2, 2));
        assert!(prediction.states.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn feature_count_mismatch_is_rejected() {
        let coefficients = array![[1.0], [2.0]];
        let intercepts = array![0.0, 0.0];
        let observations = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let err = predict_states(coefficients.view(), intercepts.view(), observations.view())
            .unwrap_err();
        assert!(matches!(err, EpmError::DimensionMismatch { expected: 2, found: 3, .. }));
    }
}
