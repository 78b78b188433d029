//! Engine command interface
//!
//! Everything the calibrator asks of the engine is a database command: the
//! liveness probe, shutdown, explain, collection statistics and the dataset
//! population commands. [`EngineClient`] is the single seam through which
//! those commands travel, which keeps the protocol testable without a live
//! engine.

use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while issuing an engine command
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection refused, closed, or server selection failed
    #[error("Engine unreachable: {0}")]
    Unreachable(String),

    #[error("Engine command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Engine rejected command: {0}")]
    Command(String),

    #[error("Unexpected engine response: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Conditions that mean the engine is not (or no longer) answering
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Unreachable(_) | ClientError::Timeout(_))
    }
}

/// Issues database commands against a running engine
pub trait EngineClient: Send + Sync {
    /// Run `command` against database `database`, waiting at most `timeout`
    fn run_command(
        &self,
        database: &str,
        command: &Value,
        timeout: Duration,
    ) -> Result<Value, ClientError>;
}

/// Timing breakdown reported by an explained query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplainResult {
    /// Execution time of the root stage
    pub total_ns: u64,
    /// Execution time of the root's input stage (the index scan under a fetch)
    pub index_traversal_ns: Option<u64>,
}

impl ExplainResult {
    /// Extract timings from an `executionStats` explain response
    pub fn from_response(response: &Value) -> Result<Self, ClientError> {
        let stages = response
            .pointer("/executionStats/executionStages")
            .ok_or_else(|| ClientError::Parse("explain has no executionStages".into()))?;

        let total_ns = stage_nanos(stages).ok_or_else(|| {
            ClientError::Parse("executionStages has no executionTimeNanos".into())
        })?;
        let index_traversal_ns = stages.get("inputStage").and_then(stage_nanos);

        Ok(Self {
            total_ns,
            index_traversal_ns,
        })
    }
}

fn stage_nanos(stage: &Value) -> Option<u64> {
    let nanos = stage.get("executionTimeNanos")?;
    nanos
        .as_u64()
        .or_else(|| nanos.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64))
}

/// Command for an `executionStats` explain of a find
pub fn explain_command(collection: &str, filter: Option<&Value>) -> Value {
    json!({
        "explain": {
            "find": collection,
            "filter": filter.cloned().unwrap_or_else(|| json!({})),
        },
        "verbosity": "executionStats",
    })
}

/// Leaf page count from a `collStats` response
pub fn leaf_pages_from_stats(response: &Value) -> Result<u64, ClientError> {
    response
        .pointer("/wiredTiger/btree/row-store leaf pages")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            ClientError::Parse(
                "collStats has no wiredTiger.btree row-store leaf pages (is statistics collection enabled?)"
                    .into(),
            )
        })
}

/// Fail unless a command response carries `ok: 1`
pub fn check_ok(response: Value) -> Result<Value, ClientError> {
    match response.get("ok").and_then(Value::as_f64) {
        Some(ok) if ok == 1.0 => Ok(response),
        _ => {
            let message = response
                .get("errmsg")
                .and_then(Value::as_str)
                .unwrap_or("command failed without errmsg")
                .to_string();
            Err(ClientError::Command(message))
        }
    }
}
