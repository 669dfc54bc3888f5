// Feature construction: percentage change and direction label per bar

use crate::models::{Bar, Direction};

/// A bar augmented with its percentage change and direction label
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledBar {
    pub bar: Bar,
    pub pct_change: f64,
    pub direction: Direction,
}

/// Build percentage change and label for each bar after the first
///
/// The first bar has no prior close and is dropped, so the output has
/// `bars.len() - 1` rows. Fewer than 2 bars yields an empty vector.
/// Rows whose change is not finite (prior close of zero) are dropped too.
pub fn build_features(bars: &[Bar]) -> Vec<LabeledBar> {
    if bars.len() < 2 {
        return Vec::new();
    }

    bars.windows(2)
        .filter_map(|pair| {
            let prev_close = pair[0].close;
            let pct_change = (pair[1].close - prev_close) / prev_close * 100.0;
            if !pct_change.is_finite() {
                tracing::debug!(timestamp = %pair[1].timestamp, "Dropping bar with undefined change");
                return None;
            }
            Some(LabeledBar {
                bar: pair[1].clone(),
                pct_change,
                direction: Direction::from_change(pct_change),
            })
        })
        .collect()
}

/// Percentage changes in order, the classifier's raw series
pub fn pct_changes(rows: &[LabeledBar]) -> Vec<f64> {
    rows.iter().map(|r| r.pct_change).collect()
}

/// Labels in order
pub fn directions(rows: &[LabeledBar]) -> Vec<Direction> {
    rows.iter().map(|r| r.direction).collect()
}
