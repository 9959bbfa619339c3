// epm/estimate.rs

//! # Alternating Least Squares
//!
//! The driver that fits a multistate epigenetic pacemaker. It alternates between two
//! sub-problems until the total regression error stops improving:
//!
//! 1.  **Feature models:** with the latent states held fixed, every feature is
//!     regressed on the states in closed form (see [`crate::system`]).
//! 2.  **State update:** with the feature models held fixed, the states take one
//!     fixed-size gradient step on the total squared residual error (see
//!     [`crate::gradient`]), optionally followed by rescaling into the range of the
//!     initial estimate.
//!
//! The loop ends in one of two ways. If an iteration improves the error by less than
//! `error_tolerance`, the fit has **converged** and that iteration's models are kept.
//! If `iter_limit` iterations pass without that happening, the fit is **exhausted**;
//! the last models are kept all the same, and the report says so.

use crate::gradient::state_gradient;
use crate::model::{EpmConfig, EpmError};
use crate::progress::FitProgressObserver;
use crate::scaler::RangeScaler;
use crate::system::{SystemSolution, WorkerPool, solve_regression_system};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the alternating loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The error improved by less than the tolerance at this (1-based) iteration.
    Converged { iteration: usize },
    /// The iteration cap was reached first.
    Exhausted { iterations: usize },
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged { iteration } => write!(f, "converged after {iteration} iterations"),
            Self::Exhausted { iterations } => {
                write!(f, "stopped at the iteration cap of {iterations} without converging")
            }
        }
    }
}

/// Summary of one fit, returned alongside the fitted parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub termination: Termination,
    /// Total error of every iteration, in order.
    pub error_trace: Vec<f64>,
    pub final_error: f64,
    /// Smallest design-matrix rank seen by any regression in any iteration.
    pub min_design_rank: usize,
    pub state_dims: usize,
    /// Sample weights were supplied but have no effect on the fit.
    pub sample_weights_ignored: bool,
}

impl FitReport {
    pub fn iterations(&self) -> usize {
        self.error_trace.len()
    }

    pub fn converged(&self) -> bool {
        matches!(self.termination, Termination::Converged { .. })
    }

    pub fn first_error(&self) -> Option<f64> {
        self.error_trace.first().copied()
    }

    /// At least one regression saw fewer independent state dimensions than it has.
    pub fn rank_deficient(&self) -> bool {
        self.min_design_rank < self.state_dims
    }
}

/// Everything a finished fit produces.
#[derive(Clone, Debug)]
pub struct AlsOutcome {
    /// Feature models of the final iteration.
    pub system: SystemSolution,
    /// The states those models were fitted against (samples × k).
    pub states: Array2<f64>,
    pub report: FitReport,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    Iterating { previous_error: Option<f64> },
    Finished(Termination),
}

/// Driver-owned state of one fit.
struct AlternatingLeastSquares<'c, 'a> {
    config: &'c EpmConfig,
    observations: ArrayView2<'a, f64>,
    states: Array2<f64>,
    scaler: Option<RangeScaler>,
    pool: WorkerPool,
    phase: Phase,
    error_trace: Vec<f64>,
    min_design_rank: usize,
}

impl<'c, 'a> AlternatingLeastSquares<'c, 'a> {
    fn initialize(
        config: &'c EpmConfig,
        initial_states: ArrayView2<f64>,
        observations: ArrayView2<'a, f64>,
    ) -> Result<Self, EpmError> {
        let states = initial_states.to_owned();
        let scaler = config
            .normalize_states
            .then(|| RangeScaler::fit(states.view()));
        let pool = WorkerPool::new(config.n_jobs)?;
        Ok(Self {
            config,
            observations,
            min_design_rank: states.ncols(),
            states,
            scaler,
            pool,
            phase: Phase::Iterating {
                previous_error: None,
            },
            // The cap is unbounded; only reserve for a typical run.
            error_trace: Vec::with_capacity(config.iter_limit.min(1024)),
        })
    }

    fn fit_feature_models(&self) -> Result<SystemSolution, EpmError> {
        solve_regression_system(self.states.view(), self.observations, &self.pool, true)
    }

    /// Moves the phase forward given this iteration's error. Returns true once converged.
    fn record_error(&mut self, iteration: usize, error: f64) -> bool {
        let converged = match self.phase {
            Phase::Iterating {
                previous_error: None,
            } => false,
            Phase::Iterating {
                previous_error: Some(previous),
            } => {
                let improvement = previous - error;
                if improvement < 0.0 {
                    log::warn!(
                        "Iteration {iteration}: error increased from {previous:.6} to {error:.6}; the learning rate may be too large"
                    );
                }
                improvement < self.config.error_tolerance
            }
            Phase::Finished(_) => true,
        };
        self.phase = if converged {
            Phase::Finished(Termination::Converged { iteration })
        } else {
            Phase::Iterating {
                previous_error: Some(error),
            }
        };
        converged
    }

    /// One descent step on the states, then optional rescaling.
    fn update_states(&mut self, system: &SystemSolution) -> Result<(), EpmError> {
        let gradient = state_gradient(
            system.coefficients.view(),
            system.intercepts.view(),
            self.states.view(),
            self.observations,
        );
        self.states.scaled_add(-self.config.learning_rate, &gradient);
        if let Some(scaler) = &self.scaler {
            scaler.transform_in_place(&mut self.states)?;
        }
        Ok(())
    }

    fn run(mut self, observer: &mut dyn FitProgressObserver) -> Result<AlsOutcome, EpmError> {
        let iter_limit = self.config.iter_limit;
        let mut last_system = None;

        for iteration in 1..=iter_limit {
            let system = self.fit_feature_models()?;
            let error = system.total_error();
            if !error.is_finite() {
                return Err(EpmError::NonFiniteError { iteration, error });
            }

            let rank = system.min_rank();
            if rank < self.min_design_rank {
                log::warn!(
                    "Iteration {iteration}: state matrix has rank {rank} of {}; feature models are not unique",
                    self.states.ncols()
                );
                self.min_design_rank = rank;
            }

            log::debug!("Iteration {iteration}: total error {error:.6}");
            self.error_trace.push(error);
            observer.on_iteration(iteration, error);

            let converged = self.record_error(iteration, error);
            // The states fitted against the final models are the ones reported.
            if !converged && iteration < iter_limit {
                self.update_states(&system)?;
            }
            last_system = Some(system);
            if converged {
                break;
            }
        }

        let termination = match self.phase {
            Phase::Finished(termination) => termination,
            Phase::Iterating { .. } => Termination::Exhausted {
                iterations: iter_limit,
            },
        };
        let system = last_system.ok_or_else(|| {
            EpmError::InvalidConfig("iteration limit must be at least 1".to_string())
        })?;

        let report = FitReport {
            termination,
            final_error: system.total_error(),
            error_trace: self.error_trace,
            min_design_rank: self.min_design_rank,
            state_dims: self.states.ncols(),
            sample_weights_ignored: false,
        };
        Ok(AlsOutcome {
            system,
            states: self.states,
            report,
        })
    }
}

/// Fits per-feature models and refines `initial_states` (samples × k) against
/// `observations` (features × samples). Neither input is modified.
pub fn fit_states(
    config: &EpmConfig,
    initial_states: ArrayView2<f64>,
    observations: ArrayView2<f64>,
    observer: &mut dyn FitProgressObserver,
) -> Result<AlsOutcome, EpmError> {
    config.validate()?;
    if initial_states.nrows() != observations.ncols() {
        return Err(EpmError::DimensionMismatch {
            context: "state samples vs observation samples",
            expected: initial_states.nrows(),
            found: observations.ncols(),
        });
    }
    if initial_states.is_empty() {
        return Err(EpmError::EmptyInput("initial state estimate"));
    }
    if observations.nrows() == 0 {
        return Err(EpmError::EmptyInput("observation matrix has no features"));
    }
    if initial_states.iter().any(|v| !v.is_finite()) {
        return Err(EpmError::InvalidInput(
            "initial states contain non-finite values".to_string(),
        ));
    }
    if observations.iter().any(|v| !v.is_finite()) {
        return Err(EpmError::InvalidInput(
            "observations contain non-finite values".to_string(),
        ));
    }

    log::info!(
        "Fitting EPM on {} features x {} samples ({} state dimension(s), {} worker(s))",
        observations.nrows(),
        observations.ncols(),
        initial_states.ncols(),
        config.n_jobs
    );
    observer.on_fit_start(config.iter_limit, observations.nrows(), observations.ncols());

    let driver = AlternatingLeastSquares::initialize(config, initial_states, observations)?;
    let outcome = driver.run(observer)?;

    observer.on_fit_finish(outcome.report.termination);
    log::info!(
        "EPM fit {} with total error {:.6}",
        outcome.report.termination,
        outcome.report.final_error
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient::site_values;
    use crate::progress::NoopFitProgress;
    use ndarray::{Array2, Axis, array};

    fn linear_observations(states: &Array2<f64>) -> Array2<f64> {
        let coefficients = array![[1.0], [2.0], [-0.5]];
        let intercepts = array![0.0, 5.0, 3.0];
        let mut observations = site_values(coefficients.view(), intercepts.view(), states.view());
        // Deterministic, sample-dependent jitter so the fit is not exact.
        for ((f, s), value) in observations.indexed_iter_mut() {
            *value += (((f + 3) * (s + 5)) % 11) as f64 * 0.02 - 0.1;
        }
        observations
    }

    #[test]
    fn converged_fit_stops_before_the_cap() {
        let states = Array2::from_shape_fn((12, 1), |(s, _)| s as f64);
        let observations = linear_observations(&states);
        let config = EpmConfig {
            iter_limit: 100,
            learning_rate: 0.01,
            ..EpmConfig::default()
        };
        let outcome =
            fit_states(&config, states.view(), observations.view(), &mut NoopFitProgress).unwrap();
        assert!(outcome.report.converged());
        assert!(outcome.report.iterations() < 100);
        assert_eq!(outcome.report.final_error, *outcome.report.error_trace.last().unwrap());
    }

    #[test]
    fn single_iteration_cap_is_exhausted_without_update() {
        let states = Array2::from_shape_fn((8, 1), |(s, _)| s as f64 * 2.0);
        let observations = linear_observations(&states);
        let config = EpmConfig {
            iter_limit: 1,
            ..EpmConfig::default()
        };
        let outcome =
            fit_states(&config, states.view(), observations.view(), &mut NoopFitProgress).unwrap();
        assert_eq!(
            outcome.report.termination,
            Termination::Exhausted { iterations: 1 }
        );
        assert_eq!(outcome.states, states);
    }

    #[test]
    fn huge_tolerance_converges_on_second_iteration() {
        let states = Array2::from_shape_fn((8, 1), |(s, _)| s as f64);
        let observations = linear_observations(&states);
        let config = EpmConfig {
            error_tolerance: 1e9,
            ..EpmConfig::default()
        };
        let outcome =
            fit_states(&config, states.view(), observations.view(), &mut NoopFitProgress).unwrap();
        assert_eq!(
            outcome.report.termination,
            Termination::Converged { iteration: 2 }
        );
        assert_eq!(outcome.report.iterations(), 2);
    }

    #[test]
    fn enormous_iteration_cap_is_accepted() {
        let states = Array2::from_shape_fn((8, 1), |(s, _)| s as f64);
        let observations = linear_observations(&states);
        let config = EpmConfig {
            iter_limit: usize::MAX,
            error_tolerance: 1e9,
            ..EpmConfig::default()
        };
        let outcome =
            fit_states(&config, states.view(), observations.view(), &mut NoopFitProgress).unwrap();
        assert_eq!(
            outcome.report.termination,
            Termination::Converged { iteration: 2 }
        );
    }

    #[test]
    fn degenerate_state_column_is_reported_as_rank_loss() {
        // The second dimension has no spread, so every centered design has rank 1.
        let states = Array2::from_shape_fn((10, 2), |(s, d)| if d == 0 { s as f64 } else { 4.0 });
        let observations = linear_observations(&states.column(0).to_owned().insert_axis(Axis(1)));
        let config = EpmConfig {
            iter_limit: 3,
            ..EpmConfig::default()
        };
        let outcome =
            fit_states(&config, states.view(), observations.view(), &mut NoopFitProgress).unwrap();
        assert_eq!(outcome.report.state_dims, 2);
        assert_eq!(outcome.report.min_design_rank, 1);
        assert!(outcome.report.rank_deficient());
        assert!(outcome.system.diagnostics.iter().all(|d| d.singular_values.len() == 2));
    }

    #[test]
    fn caller_states_are_not_mutated() {
        let states = Array2::from_shape_fn((10, 1), |(s, _)| s as f64 + 0.3);
        let snapshot = states.clone();
        let observations = linear_observations(&states);
        let config = EpmConfig {
            iter_limit: 5,
            error_tolerance: 1e-12,
            learning_rate: 0.05,
            ..EpmConfig::default()
        };
        let outcome =
            fit_states(&config, states.view(), observations.view(), &mut NoopFitProgress).unwrap();
        assert_eq!(states, snapshot);
        assert_ne!(outcome.states, snapshot);
    }

    #[test]
    fn normalized_states_keep_initial_range() {
        let states = Array2::from_shape_fn((10, 1), |(s, _)| 20.0 + 3.0 * s as f64);
        let observations = linear_observations(&states);
        let config = EpmConfig {
            iter_limit: 10,
            error_tolerance: 1e-12,
            learning_rate: 0.1,
            normalize_states: true,
            ..EpmConfig::default()
        };
        let outcome =
            fit_states(&config, states.view(), observations.view(), &mut NoopFitProgress).unwrap();
        let min = outcome.states.fold(f64::INFINITY, |a, &b| a.min(b));
        let max = outcome.states.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        approx::assert_abs_diff_eq!(min, 20.0, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(max, 47.0, epsilon = 1e-9);
    }

    #[test]
    fn sample_mismatch_is_rejected() {
        let states = Array2::zeros((5, 1));
        let observations = Array2::zeros((3, 6));
        let err = fit_states(
            &EpmConfig::default(),
            states.view(),
            observations.view(),
            &mut NoopFitProgress,
        )
        .unwrap_err();
        assert!(matches!(err, EpmError::DimensionMismatch { .. }));
    }

    #[test]
    fn non_finite_observations_are_rejected() {
        let states = Array2::from_shape_fn((4, 1), |(s, _)| s as f64);
        let mut observations = Array2::zeros((2, 4));
        observations[[1, 2]] = f64::NAN;
        let err = fit_states(
            &EpmConfig::default(),
            states.view(),
            observations.view(),
            &mut NoopFitProgress,
        )
        .unwrap_err();
        assert!(matches!(err, EpmError::InvalidInput(_)));
    }
}
