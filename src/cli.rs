//! CLI argument parsing for the calibrator

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::CalibrationConfig;

/// Output format for the final coefficients
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "cost-calibrator")]
#[command(version)]
#[command(about = "Calibrate query optimizer cost coefficients against a local mongod", long_about = None)]
pub struct Cli {
    /// TOML configuration file (flags below override it)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to the mongod executable
    #[arg(long = "mongod", value_name = "PATH")]
    pub mongod_bin: Option<PathBuf>,

    /// Path to the mongosh executable
    #[arg(long = "shell", value_name = "PATH")]
    pub shell_bin: Option<PathBuf>,

    /// Data directory for the calibration engine
    #[arg(long = "dbpath", value_name = "DIR")]
    pub dbpath: Option<PathBuf>,

    /// Port the engine listens on
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Documents per calibration collection
    #[arg(long = "cardinality", value_name = "N")]
    pub cardinality: Option<u64>,

    /// Warm scans measured in the CPU phase
    #[arg(long = "cpu-runs", value_name = "N")]
    pub cpu_runs: Option<usize>,

    /// Cold scans measured in the sequential I/O phase
    #[arg(long = "seq-runs", value_name = "N")]
    pub seq_runs: Option<usize>,

    /// Cold lookups measured in the random I/O phase
    #[arg(long = "random-lookups", value_name = "N")]
    pub random_lookups: Option<usize>,

    /// Proportion of samples cut from each end before averaging
    #[arg(long = "trim-proportion", value_name = "P")]
    pub trim_proportion: Option<f64>,

    /// Seed for lookup key selection
    #[arg(long = "seed", value_name = "SEED")]
    pub seed: Option<u64>,

    /// Reuse the dataset already in the data directory
    #[arg(long = "skip-populate")]
    pub skip_populate: bool,

    /// Write drop_caches directly instead of through sudo (requires root)
    #[arg(long = "no-sudo")]
    pub no_sudo: bool,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,

    /// Extra engine arguments, appended to the configured ones (everything after --)
    #[arg(last = true)]
    pub engine_args: Option<Vec<String>>,
}

impl Cli {
    /// Apply flags on top of a loaded configuration
    pub fn apply(&self, config: &mut CalibrationConfig) {
        let engine = &mut config.engine;
        if let Some(path) = &self.mongod_bin {
            engine.mongod_bin = path.clone();
        }
        if let Some(path) = &self.shell_bin {
            engine.shell_bin = path.clone();
        }
        if let Some(dir) = &self.dbpath {
            engine.dbpath = dir.clone();
        }
        if let Some(port) = self.port {
            engine.port = port;
        }
        if self.no_sudo {
            engine.use_sudo = false;
        }
        if let Some(args) = &self.engine_args {
            engine.extra_args.extend(args.iter().cloned());
        }

        let protocol = &mut config.protocol;
        if let Some(n) = self.cardinality {
            protocol.cardinality = n;
        }
        if let Some(n) = self.cpu_runs {
            protocol.cpu_runs = n;
        }
        if let Some(n) = self.seq_runs {
            protocol.seq_runs = n;
        }
        if let Some(n) = self.random_lookups {
            protocol.random_lookups = n;
        }
        if let Some(p) = self.trim_proportion {
            protocol.trim_proportion = p;
        }
        if self.seed.is_some() {
            protocol.seed = self.seed;
        }
        if self.skip_populate {
            config.skip_populate = true;
        }
    }
}
