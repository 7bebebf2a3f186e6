//! Agreement heuristic over a batch of metric values.
//!
//! Values are min-max normalized to `[0, 1]`; the sample standard deviation of the
//! normalized values measures how much the metrics disagree. This is not a calibrated
//! probability.

use statrs::statistics::Statistics;

pub const MAX_CONFIDENCE: f64 = 100.0;

/// Confidence in `[0, 100]` for a freshly extracted batch.
///
/// An empty batch has no confidence. A batch with zero spread (every value equal,
/// including a single value) counts as full agreement.
pub fn confidence_level(values: &[f64]) -> f64 {
    let values: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return 0.0;
    }

    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    if max == min {
        return MAX_CONFIDENCE;
    }

    // Halving keeps max - min finite for values near f64::MAX.
    let half_spread = max / 2.0 - min / 2.0;
    let normalized: Vec<f64> = values
        .iter()
        .map(|v| ((v / 2.0 - min / 2.0) / half_spread).clamp(0.0, 1.0))
        .collect();

    // statrs computes the unbiased (n - 1) sample variance.
    let std_dev = normalized.iter().variance().sqrt();
    if !std_dev.is_finite() {
        return 0.0;
    }

    (MAX_CONFIDENCE - (std_dev * 100.0).min(MAX_CONFIDENCE)).clamp(0.0, MAX_CONFIDENCE)
}
