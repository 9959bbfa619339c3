//! Gradient of the total squared residual error with respect to the latent states.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

/// Fitted value of every feature for every sample: `intercept + coefficients · statesᵀ`.
///
/// Returns a features × samples matrix.
pub fn site_values(
    coefficients: ArrayView2<f64>,
    intercepts: ArrayView1<f64>,
    states: ArrayView2<f64>,
) -> Array2<f64> {
    coefficients.dot(&states.t()) + &intercepts.insert_axis(Axis(1))
}

/// Gradient of `Σ_f Σ_s (observations[f, s] - fitted[f, s])²` with respect to each state,
/// scaled by `1 / sample_count`.
///
/// For state dimension `p` this is `-2 · Σ_f coefficients[f, p] · residuals[f, :] / n_samples`.
/// The result has the shape of `states` (samples × k).
pub fn state_gradient(
    coefficients: ArrayView2<f64>,
    intercepts: ArrayView1<f64>,
    states: ArrayView2<f64>,
    observations: ArrayView2<f64>,
) -> Array2<f64> {
    let residuals = &observations - &site_values(coefficients, intercepts, states);
    let n_samples = states.nrows().max(1) as f64;
    residuals.t().dot(&coefficients) * (-2.0 / n_samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn total_error(
        coefficients: ArrayView2<f64>,
        intercepts: ArrayView1<f64>,
        states: ArrayView2<f64>,
        observations: ArrayView2<f64>,
    ) -> f64 {
        let residuals = &observations - &site_values(coefficients, intercepts, states);
        residuals.mapv(|r| r * r).sum()
    }

    #[test]
    fn site_values_apply_each_feature_model() {
        let coefficients = array![[2.0], [-1.0]];
        let intercepts = array![1.0, 10.0];
        let states = array![[0.0], [1.0], [3.0]];
        let fitted = site_values(coefficients.view(), intercepts.view(), states.view());
        assert_eq!(fitted, array![[1.0, 3.0, 7.0], [10.0, 9.0, 7.0]]);
    }

    #[test]
    fn gradient_vanishes_on_exact_fit() {
        let coefficients = array![[2.0], [0.5]];
        let intercepts = array![1.0, -1.0];
        let states = array![[0.0], [1.0], [2.0], [4.0]];
        let observations = site_values(coefficients.view(), intercepts.view(), states.view());
        let grad = state_gradient(
            coefficients.view(),
            intercepts.view(),
            states.view(),
            observations.view(),
        );
        assert_eq!(grad.dim(), (4, 1));
        assert_abs_diff_eq!(grad, Array2::<f64>::zeros((4, 1)), epsilon = 1e-12);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let coefficients = array![[1.5, -0.2], [0.3, 0.8], [-2.0, 0.1]];
        let intercepts = array![0.5, -1.0, 2.0];
        let states = array![[0.1, 1.0], [0.7, -0.4], [1.3, 0.2], [2.2, 0.9]];
        let observations = array![
            [0.9, 1.3, 2.4, 3.9],
            [-0.2, -1.1, -0.4, 0.5],
            [1.9, 0.6, -0.5, -2.4]
        ];
        let grad = state_gradient(
            coefficients.view(),
            intercepts.view(),
            states.view(),
            observations.view(),
        );

        let n_samples = states.nrows() as f64;
        let h = 1e-6;
        for s in 0..states.nrows() {
            for p in 0..states.ncols() {
                let mut up = states.clone();
                up[[s, p]] += h;
                let mut down = states.clone();
                down[[s, p]] -= h;
                let error_at = |candidate: &Array2<f64>| {
                    total_error(
                        coefficients.view(),
                        intercepts.view(),
                        candidate.view(),
                        observations.view(),
                    )
                };
                let numeric = (error_at(&up) - error_at(&down)) / (2.0 * h) / n_samples;
                assert_abs_diff_eq!(grad[[s, p]], numeric, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn stepping_against_the_gradient_reduces_error() {
        let coefficients = array![[2.0], [4.0], [6.0]];
        let intercepts = array![10.0, 20.0, 30.0];
        let truth = array![[1.0], [2.0], [3.0], [4.0]];
        let observations = site_values(coefficients.view(), intercepts.view(), truth.view());
        let start = array![[1.4], [1.7], [3.5], [3.6]];

        let error_at = |candidate: &Array2<f64>| {
            total_error(
                coefficients.view(),
                intercepts.view(),
                candidate.view(),
                observations.view(),
            )
        };
        let before = error_at(&start);
        let grad = state_gradient(
            coefficients.view(),
            intercepts.view(),
            start.view(),
            observations.view(),
        );
        let stepped = &start - &(grad * 0.01);
        let after = error_at(&stepped);
        assert!(after < before, "descent step increased error: {before} -> {after}");
    }
}
