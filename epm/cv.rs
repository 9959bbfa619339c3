//! Cross-validated fitting.
//!
//! Samples are split into contiguous, balanced folds (after an optional seeded shuffle).
//! Each fold is predicted by a fresh model trained on the remaining samples, which
//! yields one out-of-fold prediction per sample. A final model is then trained on all
//! samples.

use crate::estimate::FitReport;
use crate::model::{EpmConfig, EpmError, EpmModel};
use crate::partition::balanced_ranges;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    pub cv_folds: usize,
    /// Shuffle samples before carving folds.
    pub randomize_sample_order: bool,
    /// Seed for the shuffle; fixed so that repeated runs agree.
    pub seed: u64,
    /// Configuration of every model trained inside the wrapper.
    pub epm: EpmConfig,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            cv_folds: 3,
            randomize_sample_order: false,
            seed: 0,
            epm: EpmConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CvResult {
    /// One predicted state row per sample, in the original sample order.
    pub out_of_fold: Array2<f64>,
    /// Held-out sample indices of each fold.
    pub folds: Vec<Vec<usize>>,
    pub fold_reports: Vec<FitReport>,
    /// Trained on every sample.
    pub model: EpmModel,
    pub final_report: FitReport,
}

pub struct EpmCv {
    config: CvConfig,
}

impl EpmCv {
    pub fn new(config: CvConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CvConfig {
        &self.config
    }

    /// Held-out sample indices for every fold.
    pub fn fold_assignments(&self, n_samples: usize) -> Result<Vec<Vec<usize>>, EpmError> {
        let folds = self.config.cv_folds;
        if folds < 2 {
            return Err(EpmError::InvalidConfig(format!(
                "cv_folds must be at least 2, got {folds}"
            )));
        }
        if n_samples < folds {
            return Err(EpmError::InvalidConfig(format!(
                "cv_folds ({folds}) exceeds the number of samples ({n_samples})"
            )));
        }

        let mut order: Vec<usize> = (0..n_samples).collect();
        if self.config.randomize_sample_order {
            let mut rng = StdRng::seed_from_u64(self.config.seed);
            order.shuffle(&mut rng);
        }
        Ok(balanced_ranges(n_samples, folds)
            .into_iter()
            .map(|range| order[range].to_vec())
            .collect())
    }

    pub fn fit_flat(
        &self,
        states: ArrayView1<f64>,
        observations: ArrayView2<f64>,
    ) -> Result<CvResult, EpmError> {
        self.fit(states.insert_axis(Axis(1)), observations)
    }

    /// Runs every fold, then trains the final model on all samples.
    pub fn fit(
        &self,
        states: ArrayView2<f64>,
        observations: ArrayView2<f64>,
    ) -> Result<CvResult, EpmError> {
        let n_samples = states.nrows();
        if observations.ncols() != n_samples {
            return Err(EpmError::DimensionMismatch {
                context: "state samples vs observation samples",
                expected: n_samples,
                found: observations.ncols(),
            });
        }
        let folds = self.fold_assignments(n_samples)?;
        let mut out_of_fold = Array2::zeros((n_samples, states.ncols()));
        let mut fold_reports = Vec::with_capacity(folds.len());

        for (fold_index, test_indices) in folds.iter().enumerate() {
            let mut held_out = vec![false; n_samples];
            for &sample in test_indices {
                held_out[sample] = true;
            }
            let train_indices: Vec<usize> = (0..n_samples).filter(|&s| !held_out[s]).collect();

            log::info!(
                "CV fold {}/{}: training on {} samples, predicting {}",
                fold_index + 1,
                folds.len(),
                train_indices.len(),
                test_indices.len()
            );

            let mut model = EpmModel::new(self.config.epm.clone());
            let report = model.fit(
                states.select(Axis(0), &train_indices).view(),
                observations.select(Axis(1), &train_indices).view(),
                None,
            )?;
            let predictions = model.predict(observations.select(Axis(1), test_indices).view())?;
            for (row, &sample) in predictions.axis_iter(Axis(0)).zip(test_indices) {
                out_of_fold.row_mut(sample).assign(&row);
            }
            fold_reports.push(report);
        }

        let mut model = EpmModel::new(self.config.epm.clone());
        let final_report = model.fit(states, observations, None)?;

        Ok(CvResult {
            out_of_fold,
            folds,
            fold_reports,
            model,
            final_report,
        })
    }
}
