//! Error taxonomy for a calibration run
//!
//! Every variant is fatal to the run. Nothing here is retried transparently:
//! coefficients are only meaningful when every phase ran under the documented
//! cache conditions, so a failure means a human re-runs the calibration.

use std::time::Duration;
use thiserror::Error;

use crate::client::ClientError;
use crate::stats::StatsError;

/// Errors that can abort a calibration run
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Engine process is already running")]
    AlreadyRunning,

    #[error("Engine process is not running")]
    NotRunning,

    #[error("Engine did not become ready within {timeout:?}")]
    StartupTimeout { timeout: Duration },

    #[error("Engine exited before becoming ready ({status})")]
    ProcessExited { status: String },

    #[error("Engine did not exit within {timeout:?} after shutdown")]
    ShutdownTimeout { timeout: Duration },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Engine command failed: {0}")]
    Client(#[from] ClientError),

    #[error("Failed to flush OS page cache: {0}")]
    CacheFlush(String),

    #[error("Malformed explain output: {0}")]
    MalformedExplain(String),

    #[error("Implausible measurement: {0}")]
    ImplausibleMeasurement(String),

    #[error("Statistics error: {0}")]
    Stats(#[from] StatsError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Calibration interrupted by operator")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for calibration operations
pub type Result<T> = std::result::Result<T, CalibrationError>;
