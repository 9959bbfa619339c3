//! Closed-form ordinary least squares.
//!
//! Every solve goes through LAPACK's SVD-based driver (`gelsd`) so that the rank and
//! singular values of the design matrix come back with the solution. Callers use them
//! to detect ill-conditioned fits instead of trusting a silently regularized answer.

use crate::model::EpmError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::LeastSquaresSvd;

/// The result of one single-target regression.
#[derive(Clone, Debug)]
pub struct LeastSquaresFit {
    /// Caller-supplied key, returned untouched so parallel results can be reordered.
    pub rid: usize,
    /// One slope per design column.
    pub coefficients: Array1<f64>,
    pub residual_sum_of_squares: f64,
    /// Numerical rank of the (possibly centered) design matrix.
    pub rank: usize,
    /// Singular values of the (possibly centered) design matrix, largest first.
    pub singular_values: Array1<f64>,
    /// Zero when intercept fitting is disabled.
    pub intercept: f64,
}

/// Solution of a regression with many right-hand sides sharing one design matrix.
#[derive(Clone, Debug)]
pub struct MultiTargetFit {
    /// design columns × targets
    pub solution: Array2<f64>,
    pub rank: usize,
    pub singular_values: Array1<f64>,
}

/// Fits `target ≈ design · coefficients + intercept` by least squares.
///
/// With `fit_intercept`, the design columns and the target are mean-centered before
/// solving and the intercept is recovered as `mean(target) - coefficients · mean(design)`.
///
/// `weights` are not applied to the solve. When present they only replace the plain
/// means used for centering with weighted means, and centering then happens even if
/// `fit_intercept` is false.
pub fn lstsq(
    design: ArrayView2<f64>,
    target: ArrayView1<f64>,
    rid: usize,
    fit_intercept: bool,
    weights: Option<ArrayView1<f64>>,
) -> Result<LeastSquaresFit, EpmError> {
    let n_rows = design.nrows();
    let n_cols = design.ncols();
    if target.len() != n_rows {
        return Err(EpmError::DimensionMismatch {
            context: "lstsq target length vs design rows",
            expected: n_rows,
            found: target.len(),
        });
    }
    if let Some(w) = weights {
        if w.len() != n_rows {
            return Err(EpmError::DimensionMismatch {
                context: "lstsq weights length vs design rows",
                expected: n_rows,
                found: w.len(),
            });
        }
    }
    if n_rows == 0 || n_cols == 0 {
        return Err(EpmError::EmptyInput("lstsq design matrix"));
    }

    let mut x = design.as_standard_layout().into_owned();
    let mut y = target.to_owned();

    let (x_offset, y_offset) = if fit_intercept || weights.is_some() {
        let (x_offset, y_offset) = match weights {
            Some(w) => weighted_means(x.view(), y.view(), w)?,
            None => plain_means(x.view(), y.view())?,
        };
        x -= &x_offset;
        y -= y_offset;
        (x_offset, y_offset)
    } else {
        (Array1::zeros(n_cols), 0.0)
    };

    let result = x
        .least_squares(&y)
        .map_err(|source| EpmError::Solver { rid, source })?;
    let coefficients = result.solution;

    // LAPACK only reports the residual for full-rank overdetermined systems.
    let residual_sum_of_squares = match result.residual_sum_of_squares {
        Some(rss) => rss.into_scalar(),
        None => {
            let residual = &y - &x.dot(&coefficients);
            residual.dot(&residual)
        }
    };

    let intercept = if fit_intercept {
        y_offset - x_offset.dot(&coefficients)
    } else {
        0.0
    };

    Ok(LeastSquaresFit {
        rid,
        coefficients,
        residual_sum_of_squares,
        rank: usize::try_from(result.rank).unwrap_or(0),
        singular_values: result.singular_values,
        intercept,
    })
}

/// Solves `design · solution ≈ targets` for every column of `targets` in one call,
/// without intercept handling.
pub fn lstsq_multi(
    design: ArrayView2<f64>,
    targets: ArrayView2<f64>,
) -> Result<MultiTargetFit, EpmError> {
    if targets.nrows() != design.nrows() {
        return Err(EpmError::DimensionMismatch {
            context: "lstsq_multi target rows vs design rows",
            expected: design.nrows(),
            found: targets.nrows(),
        });
    }
    if design.is_empty() || targets.ncols() == 0 {
        return Err(EpmError::EmptyInput("lstsq_multi design or targets"));
    }

    let a = design.as_standard_layout().into_owned();
    let b = targets.as_standard_layout().into_owned();
    let result = a
        .least_squares(&b)
        .map_err(|source| EpmError::Solver { rid: 0, source })?;

    Ok(MultiTargetFit {
        solution: result.solution,
        rank: usize::try_from(result.rank).unwrap_or(0),
        singular_values: result.singular_values,
    })
}

fn plain_means(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(Array1<f64>, f64), EpmError> {
    let x_mean = x
        .mean_axis(Axis(0))
        .ok_or(EpmError::EmptyInput("lstsq design matrix"))?;
    let y_mean = y.mean().ok_or(EpmError::EmptyInput("lstsq target"))?;
    Ok((x_mean, y_mean))
}

fn weighted_means(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    weights: ArrayView1<f64>,
) -> Result<(Array1<f64>, f64), EpmError> {
    let total = weights.sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(EpmError::InvalidInput(format!(
            "sample weights must sum to a positive finite value, got {total}"
        )));
    }
    let x_mean = weights.dot(&x) / total;
    let y_mean = weights.dot(&y) / total;
    Ok((x_mean, y_mean))
}
