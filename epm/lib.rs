#![deny(unused_variables)]
#![deny(unused_imports)]

//! Multistate epigenetic pacemaker.
//!
//! Jointly estimates per-feature linear models and per-sample latent states from an
//! observation matrix by alternating closed-form least squares with a gradient update
//! of the states.

pub mod correlation;
pub mod cv;
pub mod data;
pub mod estimate;
pub mod gradient;
pub mod lstsq;
pub mod model;
pub mod partition;
pub mod predict;
pub mod progress;
pub mod scaler;
pub mod system;

pub use cv::{CvConfig, CvResult, EpmCv};
pub use estimate::{FitReport, Termination};
pub use model::{EpmConfig, EpmError, EpmModel, ModelError, TrainedEpm};
