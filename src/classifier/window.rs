use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Result, TradingError};
use crate::models::Direction;

/// Sliding-window feature rows paired with the label of the following bar
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSet {
    pub features: Array2<f64>,
    pub labels: Vec<Direction>,
}

impl WindowSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of distinct labels present
    pub fn class_count(&self) -> usize {
        let has_up = self.labels.contains(&Direction::Up);
        let has_down = self.labels.contains(&Direction::Down);
        has_up as usize + has_down as usize
    }

    fn select(&self, indices: &[usize]) -> WindowSet {
        WindowSet {
            features: self.features.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// Slide a frame of `window` changes across the series
///
/// Row `j` holds `pct[j..j + window]` and is labelled with
/// `labels[j + window]`, giving exactly `pct.len() - window` rows.
/// The trailing frame has no known outcome and is not included.
pub fn build_windows(pct: &[f64], labels: &[Direction], window: usize) -> Result<WindowSet> {
    if window == 0 {
        return Err(TradingError::InvalidParameter(
            "window size must be at least 1".to_string(),
        ));
    }
    if pct.len() != labels.len() {
        return Err(TradingError::InvalidParameter(format!(
            "series length mismatch: {} changes vs {} labels",
            pct.len(),
            labels.len()
        )));
    }
    if pct.len() <= window {
        return Err(TradingError::InsufficientData(format!(
            "{} samples cannot fill a window of {} with a known outcome",
            pct.len(),
            window
        )));
    }

    let rows = pct.len() - window;
    let features = Array2::from_shape_fn((rows, window), |(j, i)| pct[j + i]);
    let labels = labels[window..].to_vec();

    Ok(WindowSet { features, labels })
}

/// The most recent `window` changes, the frame the live decision scores
pub fn latest_window(pct: &[f64], window: usize) -> Option<&[f64]> {
    if window == 0 || pct.len() < window {
        return None;
    }
    Some(&pct[pct.len() - window..])
}

/// Shuffle rows with a fixed seed and hold out `ceil(n * test_ratio)` for testing
///
/// Returns `(train, test)`.
pub fn train_test_split(set: &WindowSet, test_ratio: f64, seed: u64) -> (WindowSet, WindowSet) {
    let n = set.len();
    let n_test = ((n as f64) * test_ratio.clamp(0.0, 1.0)).ceil() as usize;

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (test_idx, train_idx) = indices.split_at(n_test.min(n));
    (set.select(train_idx), set.select(test_idx))
}
