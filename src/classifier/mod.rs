// Window classifier: sliding windows of percentage change -> next-bar direction
pub mod knn;
pub mod scaler;
pub mod window;

pub use knn::KnnClassifier;
pub use scaler::StandardScaler;
pub use window::{build_windows, latest_window, train_test_split, WindowSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TradingError};
use crate::features::{directions, pct_changes, LabeledBar};
use crate::models::Direction;

/// Configuration for the window classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub window: usize,
    pub neighbors: usize,
    pub test_ratio: f64,
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            window: 10,
            neighbors: 5,
            test_ratio: 0.2,
            seed: 42,
        }
    }
}

/// Outcome of scoring the trailing window
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub direction: Direction,
    pub latest_window: Vec<f64>,
    pub scaled_window: Vec<f64>,
    pub train_size: usize,
    pub test_size: usize,
    pub test_accuracy: Option<f64>,
}

pub struct WindowClassifier {
    config: ClassifierConfig,
}

impl WindowClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Train on labelled rows and predict the direction after the last one
    pub fn predict(&self, rows: &[LabeledBar]) -> Result<Prediction> {
        self.predict_series(&pct_changes(rows), &directions(rows))
    }

    /// Train on a raw change/label series and predict the next direction
    pub fn predict_series(&self, pct: &[f64], labels: &[Direction]) -> Result<Prediction> {
        let window = self.config.window;
        let set = build_windows(pct, labels, window)?;
        let latest = latest_window(pct, window)
            .ok_or_else(|| TradingError::InsufficientData("no trailing window".to_string()))?
            .to_vec();

        let (train, test) = train_test_split(&set, self.config.test_ratio, self.config.seed);
        if train.is_empty() {
            return Err(TradingError::InsufficientData(format!(
                "{} windows leave no training rows after holding out {}",
                set.len(),
                test.len()
            )));
        }
        if train.class_count() < 2 {
            return Err(TradingError::InsufficientData(
                "training labels contain a single class".to_string(),
            ));
        }

        // Statistics come from the training partition only
        let scaler = StandardScaler::fit(&train.features)?;
        let mut knn = KnnClassifier::new(self.config.neighbors);
        knn.fit(&scaler.transform(&train.features), &train.labels)?;

        let test_accuracy = knn.score(&scaler.transform(&test.features), &test.labels)?;
        let scaled = scaler.transform_row(&latest);
        let direction = knn.predict(&scaled)?;
        let scaled_window = scaled.to_vec();

        tracing::debug!(
            train = train.len(),
            test = test.len(),
            accuracy = ?test_accuracy,
            direction = %direction,
            "Window classifier scored trailing window"
        );

        Ok(Prediction {
            direction,
            latest_window: latest,
            scaled_window,
            train_size: train.len(),
            test_size: test.len(),
            test_accuracy,
        })
    }
}

impl Default for WindowClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}
