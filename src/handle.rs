//! Database handle bound to one running engine instance

use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::client::{self, EngineClient, ExplainResult};
use crate::error::{CalibrationError, Result};
use crate::interrupt;

/// Per-call timeouts applied by a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    /// Queries, statistics and population commands
    pub command: Duration,
    /// Liveness probe and shutdown
    pub probe: Duration,
}

/// Connection to the engine instance that was Ready when the handle was made
///
/// Clones share one liveness flag. Once the controller stops that instance,
/// every clone fails with [`CalibrationError::NotRunning`], even if a new
/// instance has since been started.
#[derive(Clone)]
pub struct DatabaseHandle {
    client: Arc<dyn EngineClient>,
    database: String,
    timeouts: CommandTimeouts,
    live: Arc<AtomicBool>,
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("database", &self.database)
            .field("timeouts", &self.timeouts)
            .field("live", &self.is_live())
            .finish()
    }
}

impl DatabaseHandle {
    /// Create a live handle for a freshly started instance
    pub fn new(
        client: Arc<dyn EngineClient>,
        database: impl Into<String>,
        timeouts: CommandTimeouts,
    ) -> Self {
        Self {
            client,
            database: database.into(),
            timeouts,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Mark the backing instance as gone
    pub fn invalidate(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(CalibrationError::NotRunning)
        }
    }

    /// Send a command; a transport failure during an operator abort is the abort
    ///
    /// Ctrl-C reaches the shell as well, so an interrupted run usually sees
    /// its in-flight command die first.
    fn send(&self, database: &str, command: &Value, timeout: Duration) -> Result<Value> {
        self.client
            .run_command(database, command, timeout)
            .map_err(|e| {
                if interrupt::requested() {
                    CalibrationError::Interrupted
                } else {
                    e.into()
                }
            })
    }

    /// Run a command against the calibration database
    pub fn run_command(&self, command: &Value) -> Result<Value> {
        self.ensure_live()?;
        let response = self.send(&self.database, command, self.timeouts.command)?;
        Ok(client::check_ok(response)?)
    }

    /// Side-effect free liveness probe
    pub fn ping(&self) -> Result<()> {
        self.ensure_live()?;
        let response = self.send("admin", &json!({"ping": 1}), self.timeouts.probe)?;
        client::check_ok(response)?;
        Ok(())
    }

    /// Ask the engine to shut down
    ///
    /// The shutdown command severs its own connection, so an unreachable
    /// engine or a timed-out reply counts as "already stopping".
    pub fn shutdown(&self) -> Result<()> {
        self.ensure_live()?;
        match self
            .client
            .run_command("admin", &json!({"shutdown": 1}), self.timeouts.probe)
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => {
                debug!("Shutdown command lost its connection ({}), engine is stopping", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Explain a find with `executionStats` verbosity
    pub fn explain(&self, collection: &str, filter: Option<&Value>) -> Result<ExplainResult> {
        let response = self.run_command(&client::explain_command(collection, filter))?;
        Ok(ExplainResult::from_response(&response)?)
    }

    /// Number of leaf storage pages backing `collection`
    pub fn leaf_page_count(&self, collection: &str) -> Result<u64> {
        let response = self.run_command(&json!({"collStats": collection}))?;
        Ok(client::leaf_pages_from_stats(&response)?)
    }
}
