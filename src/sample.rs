//! Calibration samples and per-phase sample sets

use serde::Serialize;
use std::fmt;

use crate::stats::{self, ExtendedStats, StatsError};

/// The three measurement phases, in the order they must run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Warm full scans (Phase A)
    Cpu,
    /// Cold full scans after a cold restart (Phase B)
    SequentialIo,
    /// Cold point lookups with a warm index (Phase C)
    RandomIo,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Cpu => write!(f, "cpu"),
            Phase::SequentialIo => write!(f, "sequential-io"),
            Phase::RandomIo => write!(f, "random-io"),
        }
    }
}

/// One observed (possibly corrected) duration in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationSample {
    pub phase: Phase,
    pub trial: usize,
    pub duration_ns: f64,
}

/// Samples recorded for a single phase
///
/// Samples can only be appended and reduced; there is no positional access.
#[derive(Debug, Clone)]
pub struct SampleSet {
    phase: Phase,
    samples: Vec<CalibrationSample>,
}

impl SampleSet {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            samples: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Record the next trial's duration and return the stored sample
    pub fn record(&mut self, duration_ns: f64) -> CalibrationSample {
        let sample = CalibrationSample {
            phase: self.phase,
            trial: self.samples.len(),
            duration_ns,
        };
        self.samples.push(sample);
        sample
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn durations(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.duration_ns).collect()
    }

    /// Trimmed mean of the recorded durations, in nanoseconds
    pub fn trimmed_mean_ns(&self, proportion: f64) -> Result<f64, StatsError> {
        stats::trimmed_mean(&self.durations(), proportion)
    }

    /// Spread summary for the run log
    pub fn summary(&self) -> Option<ExtendedStats> {
        stats::extended_stats(&self.durations())
    }

    /// Number of samples below zero (only possible after a correction)
    pub fn negative_count(&self) -> usize {
        self.samples.iter().filter(|s| s.duration_ns < 0.0).count()
    }
}
