//! Min/max range scaler for the latent-state matrix.
//!
//! The reference range is captured once from the initial state estimate. Every later
//! call rescales its input so that each column spans exactly that reference range,
//! which keeps the states from drifting across iterations.

use crate::model::EpmError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeScaler {
    min: Array1<f64>,
    max: Array1<f64>,
}

impl RangeScaler {
    /// Records the column-wise minimum and maximum of `states` (samples × k).
    pub fn fit(states: ArrayView2<f64>) -> Self {
        let (min, max) = column_extrema(states);
        Self { min, max }
    }

    pub fn reference_min(&self) -> ArrayView1<'_, f64> {
        self.min.view()
    }

    pub fn reference_max(&self) -> ArrayView1<'_, f64> {
        self.max.view()
    }

    /// Min-max normalizes each column of `states` to [0, 1] and maps it onto the
    /// reference range.
    ///
    /// A column with no spread has nothing to stretch; it collapses onto the reference
    /// minimum.
    pub fn transform(&self, states: ArrayView2<f64>) -> Result<Array2<f64>, EpmError> {
        if states.ncols() != self.min.len() {
            return Err(EpmError::DimensionMismatch {
                context: "state columns vs scaler reference range",
                expected: self.min.len(),
                found: states.ncols(),
            });
        }
        let (col_min, col_max) = column_extrema(states);
        let mut out = states.to_owned();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let span = col_max[j] - col_min[j];
            let ref_min = self.min[j];
            let ref_span = self.max[j] - ref_min;
            if span > 0.0 {
                column.mapv_inplace(|v| (v - col_min[j]) / span * ref_span + ref_min);
            } else {
                column.fill(ref_min);
            }
        }
        Ok(out)
    }

    pub fn transform_in_place(&self, states: &mut Array2<f64>) -> Result<(), EpmError> {
        let scaled = self.transform(states.view())?;
        states.assign(&scaled);
        Ok(())
    }
}

fn column_extrema(states: ArrayView2<f64>) -> (Array1<f64>, Array1<f64>) {
    let k = states.ncols();
    let mut min = Array1::from_elem(k, f64::INFINITY);
    let mut max = Array1::from_elem(k, f64::NEG_INFINITY);
    for row in states.axis_iter(Axis(0)) {
        Zip::from(&mut min)
            .and(&mut max)
            .and(&row)
            .for_each(|lo, hi, &v| {
                *lo = lo.min(v);
                *hi = hi.max(v);
            });
    }
    (min, max)
}
