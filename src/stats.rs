//! Sample reduction for calibration phases
//!
//! The trimmed mean is the only reduction that feeds a cost coefficient.
//! The extended summary (min/max/median/spread) exists for the run log, so an
//! operator can judge how noisy a phase was.

use thiserror::Error;

/// Errors from statistical reductions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("Cannot reduce an empty sample set")]
    Empty,

    #[error("Trim proportion {0} must lie in [0, 0.5)")]
    InvalidProportion(f64),

    #[error("Sample set contains a non-finite value")]
    NonFinite,
}

/// Summary of one phase's samples, for the run log
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedStats {
    pub mean: f32,
    pub stddev: f32,
    pub min: f32,
    pub max: f32,
    pub median: f32, // P50
    pub p90: f32,
}

/// Mean of the central values after cutting `proportion` from each end.
///
/// `floor(proportion * n)` values are dropped from the bottom and the top by
/// value, and the arithmetic mean of the rest is returned. The result always
/// lies within `[min, max]` of the input.
pub fn trimmed_mean(values: &[f64], proportion: f64) -> Result<f64, StatsError> {
    if !(0.0..0.5).contains(&proportion) {
        return Err(StatsError::InvalidProportion(proportion));
    }
    if values.is_empty() {
        return Err(StatsError::Empty);
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StatsError::NonFinite);
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let cut = (proportion * sorted.len() as f64) as usize;
    let kept = &sorted[cut..sorted.len() - cut];
    Ok(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Calculate percentile from sorted data
fn calculate_percentile(sorted_data: &[f32], percentile: f32) -> f32 {
    if sorted_data.is_empty() {
        return 0.0;
    }
    if sorted_data.len() == 1 {
        return sorted_data[0];
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f32;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted_data[lower]
    } else {
        let weight = index - lower as f32;
        sorted_data[lower] * (1.0 - weight) + sorted_data[upper] * weight
    }
}

/// Compute extended statistics using Trueno
///
/// Returns `None` for an empty sample set.
pub fn extended_stats(values: &[f64]) -> Option<ExtendedStats> {
    if values.is_empty() {
        return None;
    }

    let data: Vec<f32> = values.iter().map(|&v| v as f32).collect();
    let v = trueno::Vector::from_slice(&data);

    let mean = v.mean().unwrap_or(0.0);
    let stddev = v.stddev().unwrap_or(0.0);
    let min = v.min().unwrap_or(0.0);
    let max = v.max().unwrap_or(0.0);

    // Trueno doesn't have built-in percentile function
    let mut sorted = data;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    Some(ExtendedStats {
        mean,
        stddev,
        min,
        max,
        median: calculate_percentile(&sorted, 50.0),
        p90: calculate_percentile(&sorted, 90.0),
    })
}
