//! Column standardisation.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{check_width, not_fitted};
use crate::error::{PdwellError, Result};

/// Standardises each column to zero mean and unit variance.
///
/// Columns with zero variance keep a scale of 1 so they pass through
/// centred but unchanged in spread. Parameters are frozen after `fit`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit(&mut self, x: ArrayView2<f64>) -> Result<()> {
        if x.nrows() == 0 {
            return Err(PdwellError::InvalidData(
                "cannot fit a scaler on zero rows".to_string(),
            ));
        }
        let n = x.nrows() as f64;
        self.mean = x.axis_iter(Axis(1)).map(|c| c.sum() / n).collect();
        self.scale = x
            .axis_iter(Axis(1))
            .zip(&self.mean)
            .map(|(c, &m)| {
                let std = (c.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n).sqrt();
                if std > f64::EPSILON * m.abs().max(1.0) {
                    std
                } else {
                    1.0
                }
            })
            .collect();
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        !self.mean.is_empty()
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted() {
            return Err(not_fitted("standard_scaler"));
        }
        check_width("standard_scaler", &x, self.mean.len())?;
        let mut out = x.to_owned();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (m, s) = (self.mean[j], self.scale[j]);
            column.mapv_inplace(|v| (v - m) / s);
        }
        Ok(out)
    }

    pub fn fit_transform(&mut self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standardises_columns() {
        let x = array![[1.0, 10.0], [3.0, 10.0], [5.0, 10.0]];
        let mut scaler = StandardScaler::new();
        let z = scaler.fit_transform(x.view()).unwrap();

        assert_eq!(scaler.mean(), &[3.0, 10.0]);
        assert_eq!(scaler.scale()[1], 1.0);
        assert!((z.column(0).sum()).abs() < 1e-12);
        let var: f64 = z.column(0).iter().map(|v| v * v).sum::<f64>() / 3.0;
        assert!((var - 1.0).abs() < 1e-12);
        assert_eq!(z.column(1).to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_frozen_after_fit() {
        let mut scaler = StandardScaler::new();
        scaler.fit(array![[0.0], [2.0]].view()).unwrap();
        let z = scaler.transform(array![[4.0]].view()).unwrap();
        assert_eq!(z[[0, 0]], 3.0);
    }

    #[test]
    fn test_unfitted_and_width_errors() {
        let scaler = StandardScaler::new();
        assert!(scaler.transform(array![[1.0]].view()).is_err());

        let mut scaler = StandardScaler::new();
        scaler.fit(array![[1.0, 2.0], [2.0, 3.0]].view()).unwrap();
        assert!(scaler.transform(array![[1.0]].view()).is_err());
    }
}
