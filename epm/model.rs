use crate::correlation::pearson_correlation;
use crate::estimate::{FitReport, fit_states};
use crate::predict::predict_states;
use crate::progress::{ConsoleFitProgress, FitProgressObserver, NoopFitProgress};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::error::LinalgError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Hyperparameters of the alternating-least-squares fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpmConfig {
    /// Maximum number of alternating rounds.
    pub iter_limit: usize,
    /// Number of workers used for the per-feature regressions.
    pub n_jobs: usize,
    /// Minimum error improvement required to keep iterating.
    pub error_tolerance: f64,
    /// Step size of the state update.
    pub learning_rate: f64,
    /// Rescale the states into the range of the initial estimate after every update.
    pub normalize_states: bool,
    /// Draw a progress bar while fitting. No effect on results.
    pub verbose: bool,
}

impl Default for EpmConfig {
    fn default() -> Self {
        Self {
            iter_limit: 100,
            n_jobs: 1,
            error_tolerance: 0.001,
            learning_rate: 0.01,
            normalize_states: false,
            verbose: false,
        }
    }
}

impl EpmConfig {
    pub fn validate(&self) -> Result<(), EpmError> {
        if self.iter_limit == 0 {
            return Err(EpmError::InvalidConfig(
                "iter_limit must be at least 1".to_string(),
            ));
        }
        if self.n_jobs == 0 {
            return Err(EpmError::InvalidConfig(
                "n_jobs must be at least 1".to_string(),
            ));
        }
        if !(self.error_tolerance.is_finite() && self.error_tolerance > 0.0) {
            return Err(EpmError::InvalidConfig(format!(
                "error_tolerance must be positive and finite, got {}",
                self.error_tolerance
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(EpmError::InvalidConfig(format!(
                "learning_rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Errors raised while fitting or applying a model.
#[derive(Error, Debug)]
pub enum EpmError {
    #[error("EPM model is not trained. Run fit before predict or score.")]
    Untrained,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch ({context}): expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Empty input: {0}")]
    EmptyInput(&'static str),

    #[error("Least-squares solve failed for regression {rid}: {source}")]
    Solver {
        rid: usize,
        #[source]
        source: LinalgError,
    },

    #[error("Failed to build the worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error(
        "Iteration {iteration} produced a non-finite total error ({error}). The learning rate may be too large."
    )]
    NonFiniteError { iteration: usize, error: f64 },

    #[error("Internal error: no regression result was assembled for feature {0}")]
    MissingRegression(usize),
}

/// Errors raised while saving or loading a model file.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Model file is inconsistent: {0}")]
    Inconsistent(String),
}

/// The fitted parameters of a pacemaker, as written to a model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedEpm {
    /// Total residual sum of squares of the final iteration.
    pub error: f64,
    pub config: EpmConfig,
    /// features × state dimensions
    pub coefficients: Array2<f64>,
    pub intercepts: Array1<f64>,
}

impl TrainedEpm {
    pub fn n_features(&self) -> usize {
        self.coefficients.nrows()
    }

    pub fn state_dims(&self) -> usize {
        self.coefficients.ncols()
    }

    /// Predicts one state row per sample from `observations` (features × samples).
    pub fn predict(&self, observations: ArrayView2<f64>) -> Result<Array2<f64>, EpmError> {
        Ok(predict_states(self.coefficients.view(), self.intercepts.view(), observations)?.states)
    }

    /// Saves the model to a file in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a model from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: Self = toml::from_str(&toml_string)?;
        if model.intercepts.len() != model.coefficients.nrows() {
            return Err(ModelError::Inconsistent(format!(
                "{} intercepts for {} coefficient rows",
                model.intercepts.len(),
                model.coefficients.nrows()
            )));
        }
        Ok(model)
    }
}

/// A multistate epigenetic pacemaker.
///
/// Holds the configuration and, after a successful [`fit`](Self::fit), the fitted
/// per-feature models. A later fit replaces the previous one wholesale.
#[derive(Debug, Clone, Default)]
pub struct EpmModel {
    config: EpmConfig,
    trained: Option<TrainedEpm>,
    fitted_states: Option<Array2<f64>>,
    report: Option<FitReport>,
}

impl EpmModel {
    pub fn new(config: EpmConfig) -> Self {
        Self {
            config,
            trained: None,
            fitted_states: None,
            report: None,
        }
    }

    pub fn from_trained(trained: TrainedEpm) -> Self {
        Self {
            config: trained.config.clone(),
            trained: Some(trained),
            fitted_states: None,
            report: None,
        }
    }

    pub fn config(&self) -> &EpmConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    pub fn trained(&self) -> Option<&TrainedEpm> {
        self.trained.as_ref()
    }

    pub fn into_trained(self) -> Option<TrainedEpm> {
        self.trained
    }

    pub fn coefficients(&self) -> Option<ArrayView2<'_, f64>> {
        self.trained.as_ref().map(|t| t.coefficients.view())
    }

    pub fn intercepts(&self) -> Option<ArrayView1<'_, f64>> {
        self.trained.as_ref().map(|t| t.intercepts.view())
    }

    pub fn error(&self) -> Option<f64> {
        self.trained.as_ref().map(|t| t.error)
    }

    /// Refined states the final feature models were fitted against.
    pub fn fitted_states(&self) -> Option<ArrayView2<'_, f64>> {
        self.fitted_states.as_ref().map(|s| s.view())
    }

    pub fn report(&self) -> Option<&FitReport> {
        self.report.as_ref()
    }

    /// Fits the model to `states` (samples × k) and `observations` (features × samples).
    ///
    /// `sample_weights` are validated and accepted but have no effect on the fit; the
    /// returned report flags when they were supplied.
    pub fn fit(
        &mut self,
        states: ArrayView2<f64>,
        observations: ArrayView2<f64>,
        sample_weights: Option<ArrayView1<f64>>,
    ) -> Result<FitReport, EpmError> {
        if self.config.verbose {
            let mut progress = ConsoleFitProgress::new("Fitting MSEPM");
            self.fit_with_observer(states, observations, sample_weights, &mut progress)
        } else {
            self.fit_with_observer(states, observations, sample_weights, &mut NoopFitProgress)
        }
    }

    /// Like [`fit`](Self::fit), for a flat state vector with one value per sample.
    pub fn fit_flat(
        &mut self,
        states: ArrayView1<f64>,
        observations: ArrayView2<f64>,
        sample_weights: Option<ArrayView1<f64>>,
    ) -> Result<FitReport, EpmError> {
        self.fit(states.insert_axis(Axis(1)), observations, sample_weights)
    }

    pub fn fit_with_observer(
        &mut self,
        states: ArrayView2<f64>,
        observations: ArrayView2<f64>,
        sample_weights: Option<ArrayView1<f64>>,
        observer: &mut dyn FitProgressObserver,
    ) -> Result<FitReport, EpmError> {
        let weights_supplied = match sample_weights {
            Some(weights) => {
                if weights.len() != states.nrows() {
                    return Err(EpmError::DimensionMismatch {
                        context: "sample weights vs state samples",
                        expected: states.nrows(),
                        found: weights.len(),
                    });
                }
                log::warn!(
                    "Sample weights are accepted but not applied; the fit is unweighted."
                );
                true
            }
            None => false,
        };

        let outcome = fit_states(&self.config, states, observations, observer)?;
        let mut report = outcome.report;
        report.sample_weights_ignored = weights_supplied;

        self.trained = Some(TrainedEpm {
            error: report.final_error,
            config: self.config.clone(),
            coefficients: outcome.system.coefficients,
            intercepts: outcome.system.intercepts,
        });
        self.fitted_states = Some(outcome.states);
        self.report = Some(report.clone());
        Ok(report)
    }

    /// Predicts one state row per sample from `observations` (features × samples).
    pub fn predict(&self, observations: ArrayView2<f64>) -> Result<Array2<f64>, EpmError> {
        self.trained
            .as_ref()
            .ok_or(EpmError::Untrained)?
            .predict(observations)
    }

    /// Pearson correlation between predicted and known states, one value per state
    /// dimension. `known_states` is samples × k.
    pub fn score(
        &self,
        known_states: ArrayView2<f64>,
        observations: ArrayView2<f64>,
    ) -> Result<Array1<f64>, EpmError> {
        let predictions = self.predict(observations)?;
        if known_states.dim() != predictions.dim() {
            return Err(EpmError::DimensionMismatch {
                context: "known states vs predicted states",
                expected: predictions.len(),
                found: known_states.len(),
            });
        }
        let correlations = pearson_correlation(predictions.view(), known_states.t())?;
        Ok(correlations.diag().to_owned())
    }
}
