//! k-nearest-neighbours direction classifier backed by smartcore

use ndarray::{Array1, Array2};
use smartcore::algorithm::neighbour::KNNAlgorithmName;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::metrics::accuracy;
use smartcore::metrics::distance::euclidian::Euclidian;
use smartcore::neighbors::knn_classifier::{KNNClassifier, KNNClassifierParameters};

use crate::error::{Result, TradingError};
use crate::models::Direction;

type Model = KNNClassifier<f64, i32, DenseMatrix<f64>, Vec<i32>, Euclidian<f64>>;

// Class encoding handed to the model
fn encode(direction: Direction) -> i32 {
    match direction {
        Direction::Down => 0,
        Direction::Up => 1,
    }
}

fn decode(label: i32) -> Direction {
    if label == 1 {
        Direction::Up
    } else {
        Direction::Down
    }
}

fn to_matrix(x: &Array2<f64>) -> Result<DenseMatrix<f64>> {
    let rows: Vec<Vec<f64>> = x.outer_iter().map(|row| row.to_vec()).collect();
    DenseMatrix::from_2d_vec(&rows)
        .map_err(|e| TradingError::Model(format!("failed to create feature matrix: {:?}", e)))
}

/// Uniform-weight Euclidean kNN with linear neighbour search
pub struct KnnClassifier {
    k: usize,
    model: Option<Model>,
}

impl KnnClassifier {
    pub fn new(k: usize) -> Self {
        Self { k, model: None }
    }

    /// Fit on scaled rows; fewer rows than `k` is insufficient data
    pub fn fit(&mut self, x: &Array2<f64>, y: &[Direction]) -> Result<()> {
        if self.k == 0 {
            return Err(TradingError::InvalidParameter(
                "neighbour count must be at least 1".to_string(),
            ));
        }
        if x.nrows() != y.len() {
            return Err(TradingError::InvalidParameter(format!(
                "{} rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }
        if x.nrows() < self.k {
            return Err(TradingError::InsufficientData(format!(
                "{} training rows, need at least {} neighbours",
                x.nrows(),
                self.k
            )));
        }

        let matrix = to_matrix(x)?;
        let labels: Vec<i32> = y.iter().copied().map(encode).collect();
        let parameters = KNNClassifierParameters::default()
            .with_k(self.k)
            .with_algorithm(KNNAlgorithmName::LinearSearch);

        let model = KNNClassifier::fit(&matrix, &labels, parameters)
            .map_err(|e| TradingError::Model(format!("{:?}", e)))?;
        self.model = Some(model);
        Ok(())
    }

    fn predict_rows(&self, x: &Array2<f64>) -> Result<Vec<i32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| TradingError::InsufficientData("classifier not fitted".to_string()))?;
        model
            .predict(&to_matrix(x)?)
            .map_err(|e| TradingError::Model(format!("{:?}", e)))
    }

    pub fn predict(&self, sample: &Array1<f64>) -> Result<Direction> {
        let row = sample.view().insert_axis(ndarray::Axis(0)).to_owned();
        let labels = self.predict_rows(&row)?;
        labels
            .first()
            .copied()
            .map(decode)
            .ok_or_else(|| TradingError::Model("empty prediction".to_string()))
    }

    /// Fraction of rows predicted correctly; `None` without rows
    pub fn score(&self, x: &Array2<f64>, y: &[Direction]) -> Result<Option<f64>> {
        if x.nrows() == 0 {
            return Ok(None);
        }
        let predicted = self.predict_rows(x)?;
        let expected: Vec<i32> = y.iter().copied().map(encode).collect();
        Ok(Some(accuracy(&expected, &predicted)))
    }
}
