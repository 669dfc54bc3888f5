use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::error::{Result, TradingError};

/// Per-feature standardisation to zero mean and unit variance
///
/// Uses the population variance. Constant columns keep a scale of 1 so
/// they transform to zero instead of dividing by zero.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Fit column statistics on the given rows
    pub fn fit(x: &Array2<f64>) -> Result<Self> {
        let mean = x.mean_axis(Axis(0)).ok_or_else(|| {
            TradingError::InsufficientData("cannot fit scaler on zero rows".to_string())
        })?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|std| if std > f64::EPSILON { std } else { 1.0 });

        Ok(Self { mean, scale })
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.scale
    }

    pub fn transform_row(&self, row: &[f64]) -> Array1<f64> {
        (&ArrayView1::from(row) - &self.mean) / &self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fit_transform_zero_mean_unit_variance() {
        let rows = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]];
        let scaler = StandardScaler::fit(&rows).unwrap();
        let scaled = scaler.transform(&rows);

        for column in scaled.columns() {
            let mean = column.sum() / 3.0;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 3.0;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_constant_column() {
        let rows = array![[5.0, 1.0], [5.0, 3.0]];
        let scaler = StandardScaler::fit(&rows).unwrap();

        assert_eq!(scaler.transform_row(&[5.0, 2.0]).to_vec(), vec![0.0, 0.0]);
        assert_eq!(scaler.transform_row(&[6.0, 3.0]).to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_empty_rows() {
        let rows = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            StandardScaler::fit(&rows),
            Err(TradingError::InsufficientData(_))
        ));
    }
}
