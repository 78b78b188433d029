// Fake engine and lifecycle for protocol tests
//
// The fake engine models only what the protocol depends on: a full scan is
// slow right after a start (cold) and fast once it has run (warm), point
// lookups report a fetch stage over an index scan, and collStats reports a
// fixed leaf page count.

#![allow(dead_code)]

use cost_calibrator::client::{ClientError, EngineClient};
use cost_calibrator::controller::{Lifecycle, ProcessState};
use cost_calibrator::error::{CalibrationError, Result};
use cost_calibrator::handle::{CommandTimeouts, DatabaseHandle};
use cost_calibrator::populate::{DatasetPopulator, DatasetSpec};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Lifecycle effects in the order they happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    Stop { was_running: bool },
    Flush { running: bool },
}

/// Timings the fake engine reports
#[derive(Debug, Clone, Copy)]
pub struct EngineScript {
    pub warm_scan_ns: u64,
    pub cold_scan_ns: u64,
    pub leaf_pages: u64,
    pub lookup_total_ns: u64,
    pub lookup_index_ns: u64,
}

impl Default for EngineScript {
    fn default() -> Self {
        Self {
            warm_scan_ns: 600_000_000,
            cold_scan_ns: 900_000_000,
            leaf_pages: 1_000,
            lookup_total_ns: 5_000_000,
            lookup_index_ns: 1_000_000,
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub running: bool,
    pub warm: bool,
    pub events: Vec<Event>,
    pub lookups: Vec<u64>,
    pub cold_scans: usize,
    pub warm_scans: usize,
    pub script: Option<EngineScript>,
}

/// Engine side of the fake: answers commands
pub struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
}

impl EngineClient for FakeEngine {
    fn run_command(
        &self,
        _database: &str,
        command: &Value,
        _timeout: Duration,
    ) -> std::result::Result<Value, ClientError> {
        let mut state = self.state.lock().unwrap();
        if !state.running {
            return Err(ClientError::Unreachable("connect ECONNREFUSED".into()));
        }
        let script = state.script.unwrap_or_default();

        if let Some(explain) = command.get("explain") {
            let filter = &explain["filter"];
            let is_lookup = filter.as_object().is_some_and(|f| !f.is_empty());
            if is_lookup {
                let key = filter
                    .as_object()
                    .and_then(|f| f.values().next())
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                state.lookups.push(key);
                return Ok(json!({
                    "ok": 1,
                    "executionStats": { "executionStages": {
                        "stage": "FETCH",
                        "executionTimeNanos": script.lookup_total_ns,
                        "inputStage": { "stage": "IXSCAN", "executionTimeNanos": script.lookup_index_ns },
                    }}
                }));
            }

            let nanos = if state.warm {
                state.warm_scans += 1;
                script.warm_scan_ns
            } else {
                state.cold_scans += 1;
                script.cold_scan_ns
            };
            state.warm = true;
            return Ok(json!({
                "ok": 1,
                "executionStats": { "executionStages": {
                    "stage": "COLLSCAN",
                    "executionTimeNanos": nanos,
                }}
            }));
        }

        if command.get("collStats").is_some() {
            return Ok(json!({
                "ok": 1,
                "wiredTiger": { "btree": { "row-store leaf pages": script.leaf_pages } }
            }));
        }

        Ok(json!({ "ok": 1 }))
    }
}

/// Process side of the fake: records lifecycle effects
pub struct FakeLifecycle {
    state: Arc<Mutex<FakeState>>,
    client: Arc<FakeEngine>,
    handle: Option<DatabaseHandle>,
}

impl FakeLifecycle {
    pub fn new(script: EngineScript) -> Self {
        let state = Arc::new(Mutex::new(FakeState {
            script: Some(script),
            ..FakeState::default()
        }));
        let client = Arc::new(FakeEngine {
            state: state.clone(),
        });
        Self {
            state,
            client,
            handle: None,
        }
    }

    pub fn fake(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn events(&self) -> Vec<Event> {
        self.fake().events.clone()
    }

    pub fn count(&self, event: Event) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }

    pub fn stops(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Stop { .. }))
            .count()
    }
}

impl Lifecycle for FakeLifecycle {
    fn start(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.running {
            return Err(CalibrationError::AlreadyRunning);
        }
        state.events.push(Event::Start);
        state.running = true;
        state.warm = false;
        drop(state);

        self.handle = Some(DatabaseHandle::new(
            self.client.clone(),
            "calibration",
            CommandTimeouts {
                command: Duration::from_secs(1),
                probe: Duration::from_secs(1),
            },
        ));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let was_running = state.running;
        state.events.push(Event::Stop { was_running });
        state.running = false;
        if let Some(handle) = self.handle.take() {
            handle.invalidate();
        }
        Ok(())
    }

    fn flush_os_cache(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let running = state.running;
        state.events.push(Event::Flush { running });
        Ok(())
    }

    fn state(&self) -> ProcessState {
        if self.state.lock().unwrap().running {
            ProcessState::Ready
        } else {
            ProcessState::Stopped
        }
    }

    fn database(&mut self) -> Result<DatabaseHandle> {
        self.handle.clone().ok_or(CalibrationError::NotRunning)
    }
}

/// Populator that leaves the dataset alone
pub struct NoopPopulator;

impl DatasetPopulator for NoopPopulator {
    fn populate(&self, db: &DatabaseHandle, _spec: &DatasetSpec) -> Result<()> {
        db.ping()
    }
}

/// Populator that fails partway through
pub struct FailingPopulator;

impl DatasetPopulator for FailingPopulator {
    fn populate(&self, _db: &DatabaseHandle, _spec: &DatasetSpec) -> Result<()> {
        Err(CalibrationError::Precondition("insert batch rejected".into()))
    }
}
