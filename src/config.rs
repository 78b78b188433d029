//! Run configuration
//!
//! Loaded from an optional TOML file, then overridden by command-line flags.
//!
//! ```toml
//! [engine]
//! mongod_bin = "/opt/mongo/bin/mongod"
//! dbpath = "~/mongo/join_calibration_db"
//!
//! [protocol]
//! cardinality = 1000000
//! seq_runs = 50
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CalibrationError, Result};

/// Engine process and command settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the `mongod` executable
    pub mongod_bin: PathBuf,
    /// Data directory; a leading `~/` expands to `$HOME`
    pub dbpath: PathBuf,
    pub port: u16,
    /// Extra startup arguments appended after `--dbpath` and `--port`
    pub extra_args: Vec<String>,
    /// Log file name, created inside `dbpath`
    pub log_file: String,
    /// Path to the `mongosh` executable
    pub shell_bin: PathBuf,
    /// Database holding the calibration collections
    pub database: String,
    #[serde(with = "millis")]
    pub startup_timeout: Duration,
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,
    /// Upper bound for a single query or command
    #[serde(with = "millis")]
    pub command_timeout: Duration,
    /// Upper bound for liveness probes and the shutdown command
    #[serde(with = "millis")]
    pub probe_timeout: Duration,
    /// Drop caches through `sudo -n` instead of writing the proc file directly
    pub use_sudo: bool,
    pub drop_caches_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mongod_bin: PathBuf::from("mongod"),
            dbpath: PathBuf::from("~/mongo/join_calibration_db"),
            port: 27017,
            extra_args: vec![
                // Exposes the "row-store leaf pages" statistic
                "--wiredTigerStatisticsSetting".to_string(),
                "all".to_string(),
                "--setParameter".to_string(),
                "internalMeasureQueryExecutionTimeInNanoseconds=true".to_string(),
            ],
            log_file: "mongod.log".to_string(),
            shell_bin: PathBuf::from("mongosh"),
            database: "join_calibration".to_string(),
            startup_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
            shutdown_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(600),
            probe_timeout: Duration::from_secs(5),
            use_sudo: true,
            drop_caches_path: PathBuf::from("/proc/sys/vm/drop_caches"),
        }
    }
}

impl EngineConfig {
    /// Data directory with `~/` expanded
    pub fn resolved_dbpath(&self) -> PathBuf {
        expand_home(&self.dbpath)
    }
}

/// Experiment sizes and dataset identity
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Exact number of documents in each calibration collection
    pub cardinality: u64,
    /// Collection scanned wholesale in the CPU and sequential phases
    pub scan_collection: String,
    /// Collection queried by equality in the random phase
    pub lookup_collection: String,
    /// Uniquely indexed field of the lookup collection
    pub lookup_field: String,
    pub cpu_warmup_scans: usize,
    pub cpu_runs: usize,
    pub seq_runs: usize,
    pub random_lookups: usize,
    /// Proportion cut from each end before averaging
    pub trim_proportion: f64,
    /// Seed for lookup key selection; random when unset
    pub seed: Option<u64>,
    /// Documents inserted per populate command
    pub populate_batch: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            cardinality: 1_000_000,
            scan_collection: "join_coll_1".to_string(),
            lookup_collection: "join_coll_2".to_string(),
            lookup_field: "unique".to_string(),
            cpu_warmup_scans: 3,
            cpu_runs: 30,
            seq_runs: 50,
            random_lookups: 100,
            trim_proportion: 0.1,
            seed: None,
            populate_batch: 50_000,
        }
    }
}

/// Complete configuration for one calibration run
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub engine: EngineConfig,
    pub protocol: ProtocolConfig,
    /// Reuse an existing dataset instead of repopulating
    pub skip_populate: bool,
}

impl CalibrationConfig {
    /// Load a configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CalibrationError::Config(e.to_string()))
    }

    /// Reject settings under which no phase could produce a valid coefficient
    pub fn validate(&self) -> Result<()> {
        let p = &self.protocol;
        if !(0.0..0.5).contains(&p.trim_proportion) {
            return Err(CalibrationError::Config(format!(
                "trim_proportion {} must lie in [0, 0.5)",
                p.trim_proportion
            )));
        }
        if p.cardinality == 0 {
            return Err(CalibrationError::Config("cardinality must be positive".into()));
        }
        for (name, value) in [
            ("cpu_runs", p.cpu_runs),
            ("seq_runs", p.seq_runs),
            ("random_lookups", p.random_lookups),
        ] {
            if value == 0 {
                return Err(CalibrationError::Config(format!("{name} must be positive")));
            }
        }
        if p.populate_batch == 0 {
            return Err(CalibrationError::Config("populate_batch must be positive".into()));
        }

        let e = &self.engine;
        if e.poll_interval.is_zero() || e.poll_interval >= e.startup_timeout {
            return Err(CalibrationError::Config(format!(
                "poll_interval {:?} must be non-zero and shorter than startup_timeout {:?}",
                e.poll_interval, e.startup_timeout
            )));
        }
        Ok(())
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

/// Durations are written as integer milliseconds in config files
mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = CalibrationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protocol.cpu_runs, 30);
        assert_eq!(config.protocol.seq_runs, 50);
        assert_eq!(config.protocol.random_lookups, 100);
        assert_eq!(config.engine.startup_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CalibrationConfig::from_toml(
            r#"
            skip_populate = true

            [engine]
            port = 28017
            shutdown_timeout = 1500

            [protocol]
            cardinality = 5000
            seed = 7
            "#,
        )
        .unwrap();
        assert!(config.skip_populate);
        assert_eq!(config.engine.port, 28017);
        assert_eq!(config.engine.shutdown_timeout, Duration::from_millis(1500));
        assert_eq!(config.engine.log_file, "mongod.log");
        assert_eq!(config.protocol.cardinality, 5000);
        assert_eq!(config.protocol.seed, Some(7));
        assert_eq!(config.protocol.scan_collection, "join_coll_1");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = CalibrationConfig::from_toml("[protocol]\ncardinality = \"many\"").unwrap_err();
        assert!(matches!(err, CalibrationError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_half_trim() {
        let mut config = CalibrationConfig::default();
        config.protocol.trim_proportion = 0.5;
        assert!(matches!(config.validate(), Err(CalibrationError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_runs() {
        let mut config = CalibrationConfig::default();
        config.protocol.seq_runs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("seq_runs"));
    }

    #[test]
    fn test_validate_rejects_slow_poll() {
        let mut config = CalibrationConfig::default();
        config.engine.poll_interval = config.engine.startup_timeout;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home(Path::new("/abs/path"));
        assert_eq!(expanded, PathBuf::from("/abs/path"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_home(Path::new("~/db")),
                PathBuf::from(home).join("db")
            );
        }
    }
}
