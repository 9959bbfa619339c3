//! Vectorized Pearson correlation between state columns and feature rows.

use crate::model::EpmError;
use ndarray::{Array2, ArrayView2, Axis};

/// Pearson correlation of every column of `x` (samples × n) with every row of `y`
/// (i × samples).
///
/// Returns an n × i matrix. A column or row without variance has no defined
/// correlation and yields NaN in its entries.
pub fn pearson_correlation(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
) -> Result<Array2<f64>, EpmError> {
    if x.nrows() != y.ncols() {
        return Err(EpmError::DimensionMismatch {
            context: "pearson_correlation samples",
            expected: x.nrows(),
            found: y.ncols(),
        });
    }
    let x_means = x
        .mean_axis(Axis(0))
        .ok_or(EpmError::EmptyInput("pearson_correlation x"))?;
    let y_means = y
        .mean_axis(Axis(1))
        .ok_or(EpmError::EmptyInput("pearson_correlation y"))?;

    let x_centered = &x - &x_means;
    let y_centered = &y - &y_means.insert_axis(Axis(1));

    let covariance = x_centered.t().dot(&y_centered.t());
    let x_norms = x_centered.mapv(|v| v * v).sum_axis(Axis(0)).mapv(f64::sqrt);
    let y_norms = y_centered.mapv(|v| v * v).sum_axis(Axis(1)).mapv(f64::sqrt);

    let denominator = &x_norms.insert_axis(Axis(1)) * &y_norms.insert_axis(Axis(0));
    Ok(covariance / denominator)
}
