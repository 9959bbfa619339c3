//! Assembly of one linear model per feature.
//!
//! Every row of the target matrix is regressed independently on the shared design
//! matrix. Rows are split into balanced batches, one per worker, and the results are
//! scattered back into pre-sized arrays by row index, so completion order never
//! affects alignment.

use crate::lstsq::{LeastSquaresFit, lstsq};
use crate::model::EpmError;
use crate::partition::balanced_ranges;
use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;
use std::ops::Range;

/// A fixed-size set of workers for per-feature regressions.
///
/// A degree of one runs everything inline on the calling thread; larger degrees own
/// a dedicated rayon pool so that fits never depend on the global pool's size.
pub struct WorkerPool {
    degree: usize,
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    pub fn new(degree: usize) -> Result<Self, EpmError> {
        if degree == 0 {
            return Err(EpmError::InvalidConfig(
                "parallelism degree must be at least 1".to_string(),
            ));
        }
        if degree == 1 {
            return Ok(Self::sequential());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(degree)
            .thread_name(|index| format!("epm-worker-{index}"))
            .build()?;
        Ok(Self {
            degree,
            pool: Some(pool),
        })
    }

    pub fn sequential() -> Self {
        Self {
            degree: 1,
            pool: None,
        }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }
}

/// Rank and spectrum of the design matrix seen by one regression.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveDiagnostics {
    pub rank: usize,
    pub singular_values: Array1<f64>,
}

/// Per-feature models, aligned with the rows of the target matrix.
#[derive(Clone, Debug)]
pub struct SystemSolution {
    /// features × design columns
    pub coefficients: Array2<f64>,
    pub intercepts: Array1<f64>,
    /// Residual sum of squares per feature.
    pub residuals: Array1<f64>,
    pub diagnostics: Vec<SolveDiagnostics>,
}

impl SystemSolution {
    /// Sum of every feature's residual sum of squares.
    pub fn total_error(&self) -> f64 {
        self.residuals.sum()
    }

    pub fn min_rank(&self) -> usize {
        self.diagnostics.iter().map(|d| d.rank).min().unwrap_or(0)
    }
}

/// Fits `targets[i, :] ≈ design · coefficients[i, :] + intercepts[i]` for every row `i`.
///
/// `design` is samples × k and `targets` is features × samples.
pub fn solve_regression_system(
    design: ArrayView2<f64>,
    targets: ArrayView2<f64>,
    pool: &WorkerPool,
    fit_intercept: bool,
) -> Result<SystemSolution, EpmError> {
    if targets.ncols() != design.nrows() {
        return Err(EpmError::DimensionMismatch {
            context: "observation samples vs state samples",
            expected: design.nrows(),
            found: targets.ncols(),
        });
    }
    let n_features = targets.nrows();
    if n_features == 0 {
        return Err(EpmError::EmptyInput("observation matrix has no features"));
    }

    let fits: Vec<LeastSquaresFit> = match &pool.pool {
        Some(thread_pool) => {
            let batches = balanced_ranges(n_features, pool.degree());
            log::debug!(
                "Solving {} regressions in {} batches across {} workers",
                n_features,
                batches.len(),
                pool.degree()
            );
            let per_batch = thread_pool.install(|| {
                batches
                    .into_par_iter()
                    .map(|rows| solve_batch(design, targets, rows, fit_intercept))
                    .collect::<Result<Vec<_>, _>>()
            })?;
            per_batch.into_iter().flatten().collect()
        }
        None => solve_batch(design, targets, 0..n_features, fit_intercept)?,
    };

    assemble(fits, n_features, design.ncols())
}

fn solve_batch(
    design: ArrayView2<f64>,
    targets: ArrayView2<f64>,
    rows: Range<usize>,
    fit_intercept: bool,
) -> Result<Vec<LeastSquaresFit>, EpmError> {
    rows.map(|rid| lstsq(design, targets.row(rid), rid, fit_intercept, None))
        .collect()
}

/// Writes each fit into the slot named by its `rid`.
pub(crate) fn assemble(
    fits: Vec<LeastSquaresFit>,
    n_features: usize,
    n_dims: usize,
) -> Result<SystemSolution, EpmError> {
    let mut coefficients = Array2::zeros((n_features, n_dims));
    let mut intercepts = Array1::zeros(n_features);
    let mut residuals = Array1::zeros(n_features);
    let mut slots: Vec<Option<SolveDiagnostics>> = vec![None; n_features];

    for fit in fits {
        let rid = fit.rid;
        if rid >= n_features {
            return Err(EpmError::MissingRegression(rid));
        }
        coefficients.row_mut(rid).assign(&fit.coefficients);
        intercepts[rid] = fit.intercept;
        residuals[rid] = fit.residual_sum_of_squares;
        slots[rid] = Some(SolveDiagnostics {
            rank: fit.rank,
            singular_values: fit.singular_values,
        });
    }

    let diagnostics = slots
        .into_iter()
        .enumerate()
        .map(|(rid, slot)| slot.ok_or(EpmError::MissingRegression(rid)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SystemSolution {
        coefficients,
        intercepts,
        residuals,
        diagnostics,
    })
}
