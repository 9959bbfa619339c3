//! # Data Loading and Validation Module
//!
//! Reads the tab-separated inputs of the command-line tool and turns them into the
//! `ndarray` structures the estimation core works on.
//!
//! - State files carry a header row, an optional `sample_id` column, and one numeric
//!   column per state dimension (e.g. `age`), one row per sample.
//! - Observation files carry a header row of sample identifiers, an optional leading
//!   `feature_id` column, and one row per feature (e.g. one CpG site), so the matrix
//!   is features × samples.
//!
//! Missing, non-numeric, and non-finite values are rejected up front with a `DataError`
//! that names the offending column.

use ndarray::{Array2, ArrayView2, ShapeBuilder};
use polars::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const SAMPLE_ID_COLUMN: &str = "sample_id";
pub const FEATURE_ID_COLUMN: &str = "feature_id";

/// Per-sample state estimates read from a state file.
#[derive(Debug, Clone)]
pub struct StateTable {
    pub sample_ids: Vec<String>,
    pub state_names: Vec<String>,
    /// samples × state dimensions
    pub states: Array2<f64>,
}

/// Per-feature observations read from an observation file.
#[derive(Debug, Clone)]
pub struct ObservationTable {
    pub feature_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    /// features × samples
    pub observations: Array2<f64>,
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Column lengths do not form a matrix: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("The file '{0}' contains no data columns besides identifiers.")]
    NoDataColumns(String),
    #[error("The file '{0}' contains no data rows.")]
    NoDataRows(String),
    #[error(
        "The state file lists {states} samples but the observation file has {observations} sample columns."
    )]
    SampleCountMismatch { states: usize, observations: usize },
    #[error("Cannot write {rows} state rows for {ids} sample identifiers.")]
    OutputShapeMismatch { rows: usize, ids: usize },
    #[error("Cannot write {columns} state columns under {names} column names.")]
    OutputColumnMismatch { columns: usize, names: usize },
}

/// Loads a state file.
pub fn load_states(path: impl AsRef<Path>) -> Result<StateTable, DataError> {
    let path = path.as_ref();
    let df = internal::read_tsv(path)?;
    let n_samples = df.height();
    if n_samples == 0 {
        return Err(DataError::NoDataRows(path.display().to_string()));
    }

    let names = internal::column_names(&df);
    let has_ids = names.iter().any(|name| name == SAMPLE_ID_COLUMN);
    let state_names: Vec<String> = names
        .into_iter()
        .filter(|name| name != SAMPLE_ID_COLUMN)
        .collect();
    if state_names.is_empty() {
        return Err(DataError::NoDataColumns(path.display().to_string()));
    }

    let mut buffer = Vec::with_capacity(n_samples * state_names.len());
    for name in &state_names {
        buffer.append(&mut internal::extract_numeric_column(&df, name)?);
    }
    let states = Array2::from_shape_vec((n_samples, state_names.len()).f(), buffer)?;

    let sample_ids = if has_ids {
        internal::extract_id_column(&df, SAMPLE_ID_COLUMN)?
    } else {
        (1..=n_samples).map(|i| i.to_string()).collect()
    };

    Ok(StateTable {
        sample_ids,
        state_names,
        states,
    })
}

/// Loads an observation file.
pub fn load_observations(path: impl AsRef<Path>) -> Result<ObservationTable, DataError> {
    let path = path.as_ref();
    let df = internal::read_tsv(path)?;
    let n_features = df.height();
    if n_features == 0 {
        return Err(DataError::NoDataRows(path.display().to_string()));
    }

    let names = internal::column_names(&df);
    let has_ids = names.iter().any(|name| name == FEATURE_ID_COLUMN);
    let sample_ids: Vec<String> = names
        .into_iter()
        .filter(|name| name != FEATURE_ID_COLUMN)
        .collect();
    if sample_ids.is_empty() {
        return Err(DataError::NoDataColumns(path.display().to_string()));
    }

    // Each sample column is contiguous in column-major order.
    let mut buffer = Vec::with_capacity(n_features * sample_ids.len());
    for name in &sample_ids {
        buffer.append(&mut internal::extract_numeric_column(&df, name)?);
    }
    let observations = Array2::from_shape_vec((n_features, sample_ids.len()).f(), buffer)?;

    let feature_ids = if has_ids {
        internal::extract_id_column(&df, FEATURE_ID_COLUMN)?
    } else {
        (1..=n_features).map(|i| format!("feature{i}")).collect()
    };

    Ok(ObservationTable {
        feature_ids,
        sample_ids,
        observations,
    })
}

/// Checks that a state table and an observation table describe the same samples.
///
/// Samples are matched by position. Differing identifiers only produce a warning,
/// since state files without a `sample_id` column get sequential placeholders.
pub fn check_sample_alignment(
    states: &StateTable,
    observations: &ObservationTable,
) -> Result<(), DataError> {
    let n_states = states.states.nrows();
    let n_observed = observations.observations.ncols();
    if n_states != n_observed {
        return Err(DataError::SampleCountMismatch {
            states: n_states,
            observations: n_observed,
        });
    }
    if let Some(index) = states
        .sample_ids
        .iter()
        .zip(&observations.sample_ids)
        .position(|(a, b)| a != b)
    {
        log::warn!(
            "Sample identifiers differ at position {} ('{}' vs '{}'); samples are matched by position.",
            index + 1,
            states.sample_ids[index],
            observations.sample_ids[index]
        );
    }
    Ok(())
}

/// Column names for a k-dimensional state: `state` for one dimension, else `state1..k`.
pub fn default_state_names(k: usize) -> Vec<String> {
    if k == 1 {
        vec!["state".to_string()]
    } else {
        (1..=k).map(|i| format!("state{i}")).collect()
    }
}

/// Writes a samples × k state matrix as a TSV with a `sample_id` column.
pub fn write_states(
    path: impl AsRef<Path>,
    sample_ids: &[String],
    state_names: &[String],
    states: ArrayView2<f64>,
) -> Result<(), DataError> {
    if states.nrows() != sample_ids.len() {
        return Err(DataError::OutputShapeMismatch {
            rows: states.nrows(),
            ids: sample_ids.len(),
        });
    }
    if states.ncols() != state_names.len() {
        return Err(DataError::OutputColumnMismatch {
            columns: states.ncols(),
            names: state_names.len(),
        });
    }

    let mut file = BufWriter::new(File::create(path)?);
    write!(file, "{SAMPLE_ID_COLUMN}")?;
    for name in state_names {
        write!(file, "\t{name}")?;
    }
    writeln!(file)?;

    for (id, row) in sample_ids.iter().zip(states.rows()) {
        write!(file, "{id}")?;
        for value in row {
            write!(file, "\t{value}")?;
        }
        writeln!(file)?;
    }
    file.flush()?;
    Ok(())
}

/// Internal module for shared data loading logic.
mod internal {
    use super::*;

    pub(super) fn read_tsv(path: &Path) -> Result<DataFrame, DataError> {
        log::info!("Loading data from '{}'", path.display());
        let df = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
            )
            .finish()?;
        log::debug!(
            "Read {} rows x {} columns from '{}'",
            df.height(),
            df.width(),
            path.display()
        );
        Ok(df)
    }

    pub(super) fn column_names(df: &DataFrame) -> Vec<String> {
        df.get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    pub(super) fn extract_numeric_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<f64>, DataError> {
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let wrong_type = || DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        };
        let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
        if casted.null_count() > 0 {
            return Err(wrong_type());
        }

        let chunked = casted.f64()?.rechunk();
        let values: Vec<f64> = chunked.into_no_null_iter().collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
        }
        Ok(values)
    }

    pub(super) fn extract_id_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<String>, DataError> {
        let series = df.column(column_name)?;
        let mut ids = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let value = series.get(i)?;
            ids.push(match value {
                AnyValue::Null => (i + 1).to_string(),
                AnyValue::String(text) => text.to_string(),
                AnyValue::StringOwned(text) => text.to_string(),
                other => other.to_string(),
            });
        }
        Ok(ids)
    }
}
