use crate::estimate::Termination;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;

/// Observer for reporting iteration progress while fitting a model.
pub trait FitProgressObserver {
    fn on_fit_start(&mut self, iter_limit: usize, n_features: usize, n_samples: usize) {
        let _ = (iter_limit, n_features, n_samples);
    }
    fn on_iteration(&mut self, iteration: usize, error: f64) {
        let _ = (iteration, error);
    }
    fn on_fit_finish(&mut self, termination: Termination) {
        let _ = termination;
    }
}

#[derive(Default)]
pub struct NoopFitProgress;

impl FitProgressObserver for NoopFitProgress {}

/// Progress bar over alternating-least-squares iterations, drawn on stderr.
pub struct ConsoleFitProgress {
    bar: Option<ProgressBar>,
    label: String,
}

impl ConsoleFitProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            bar: None,
            label: label.into(),
        }
    }
}

impl FitProgressObserver for ConsoleFitProgress {
    fn on_fit_start(&mut self, iter_limit: usize, n_features: usize, n_samples: usize) {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(iter_limit as u64), draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {prefix} {msg}",
        ) {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        bar.set_prefix(self.label.clone());
        bar.set_message(format!("{n_features} features × {n_samples} samples"));
        self.bar = Some(bar);
    }

    fn on_iteration(&mut self, iteration: usize, error: f64) {
        if let Some(bar) = &self.bar {
            bar.set_position(iteration as u64);
            bar.set_message(format!("error {error:.6}"));
        }
    }

    fn on_fit_finish(&mut self, termination: Termination) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(termination.to_string());
        }
    }
}
