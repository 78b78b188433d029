//! Engine process lifecycle
//!
//! The controller is the only component that starts, stops or cache-flushes
//! the engine. Every trial of the calibration protocol depends on the cache
//! state it leaves behind:
//!
//! ```text
//! Stopped -> Starting -> Ready -> Stopped
//!               |
//!               +-> Stopped   (startup timeout or crash)
//!
//! restart_cold: Ready -> Stopped -> Stopped (flushed) -> Starting -> Ready
//! ```

use std::fs::{self, OpenOptions};
use std::ops::{Deref, DerefMut};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::CacheFlusher;
use crate::client::EngineClient;
use crate::config::EngineConfig;
use crate::error::{CalibrationError, Result};
use crate::handle::{CommandTimeouts, DatabaseHandle};
use crate::interrupt;

/// Observable state of the engine process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Starting,
    Ready,
}

/// Start/stop/flush operations the calibration protocol drives
pub trait Lifecycle {
    /// Launch the engine and block until it answers the liveness probe
    fn start(&mut self) -> Result<()>;

    /// Shut the engine down; a no-op when nothing is running
    fn stop(&mut self) -> Result<()>;

    /// Drop the OS page cache without touching the engine process
    fn flush_os_cache(&mut self) -> Result<()>;

    fn state(&self) -> ProcessState;

    /// Handle for the currently Ready instance
    fn database(&mut self) -> Result<DatabaseHandle>;

    /// Stop, flush the OS page cache, start: a trial with every cache empty
    fn restart_cold(&mut self) -> Result<()> {
        self.stop()?;
        self.flush_os_cache()?;
        self.start()
    }
}

/// Controls a local `mongod` child process
pub struct ProcessController {
    config: EngineConfig,
    client: Arc<dyn EngineClient>,
    flusher: CacheFlusher,
    child: Option<Child>,
    handle: Option<DatabaseHandle>,
    state: ProcessState,
}

impl ProcessController {
    pub fn new(config: EngineConfig, client: Arc<dyn EngineClient>) -> Self {
        let flusher = CacheFlusher::new(config.drop_caches_path.clone(), config.use_sudo);
        Self {
            config,
            client,
            flusher,
            child: None,
            handle: None,
            state: ProcessState::Stopped,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// True while the child process has not exited
    ///
    /// A child found dead is reaped and its handle invalidated.
    pub fn is_running(&mut self) -> bool {
        self.detect_exit();
        self.child.is_some()
    }

    /// Forget an instance that exited without being stopped
    fn detect_exit(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(None) => return,
            Ok(Some(status)) => warn!(pid = child.id(), %status, "Engine exited unexpectedly"),
            Err(e) => warn!(pid = child.id(), "Lost track of engine process: {}", e),
        }
        self.clear();
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    fn timeouts(&self) -> CommandTimeouts {
        CommandTimeouts {
            command: self.config.command_timeout,
            probe: self.config.probe_timeout,
        }
    }

    fn spawn(&self) -> Result<Child> {
        let dbpath = self.config.resolved_dbpath();
        fs::create_dir_all(&dbpath)?;

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dbpath.join(&self.config.log_file))?;

        let child = Command::new(&self.config.mongod_bin)
            .arg("--dbpath")
            .arg(&dbpath)
            .arg("--port")
            .arg(self.config.port.to_string())
            .args(&self.config.extra_args)
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            // Own process group: a terminal Ctrl-C reaches only us, and we
            // shut the engine down ourselves.
            .process_group(0)
            .spawn()?;
        Ok(child)
    }

    /// Poll until the engine answers a ping, it exits, or the deadline passes
    fn wait_ready(&mut self, probe: &DatabaseHandle) -> Result<()> {
        let timeout = self.config.startup_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            interrupt::check()?;

            // Checked before probing so a crash is not mistaken for a slow start
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(CalibrationError::ProcessExited {
                        status: status.to_string(),
                    });
                }
            }

            match probe.ping() {
                Ok(()) => return Ok(()),
                Err(CalibrationError::Client(e)) if e.is_transient() => {
                    debug!("Engine not ready yet: {}", e);
                }
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(CalibrationError::StartupTimeout { timeout });
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Wait for the child to exit, killing it if the deadline passes
    fn wait_exit(&mut self) -> Result<()> {
        let timeout = self.config.shutdown_timeout;
        let deadline = Instant::now() + timeout;
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };

        loop {
            if let Some(status) = child.try_wait()? {
                debug!("Engine exited with {}", status);
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(pid = child.id(), "Engine ignored shutdown, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(CalibrationError::ShutdownTimeout { timeout });
            }
            thread::sleep(self.config.poll_interval.min(remaining(deadline)));
        }
    }

    fn clear(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.invalidate();
        }
        self.child = None;
        self.state = ProcessState::Stopped;
    }

    /// Kill and reap the child, then forget the instance
    fn force_stop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = child.kill();
            }
            let _ = child.wait();
        }
        self.clear();
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

impl Lifecycle for ProcessController {
    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(CalibrationError::AlreadyRunning);
        }

        self.child = Some(self.spawn()?);
        self.state = ProcessState::Starting;
        debug!(pid = ?self.pid(), "Engine starting");

        let handle = DatabaseHandle::new(
            self.client.clone(),
            self.config.database.clone(),
            self.timeouts(),
        );
        if let Err(e) = self.wait_ready(&handle) {
            handle.invalidate();
            self.force_stop();
            return Err(e);
        }

        self.handle = Some(handle);
        self.state = ProcessState::Ready;
        info!(pid = ?self.pid(), port = self.config.port, "Engine ready");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            self.clear();
            return Ok(());
        }

        let requested = match self.handle.as_ref() {
            Some(handle) => handle.shutdown(),
            None => DatabaseHandle::new(
                self.client.clone(),
                self.config.database.clone(),
                self.timeouts(),
            )
            .shutdown(),
        };
        if let Err(e) = requested {
            warn!("Shutdown command failed ({}), killing engine", e);
            self.force_stop();
            return Err(e);
        }

        let exited = self.wait_exit();
        self.clear();
        exited?;
        debug!("Engine stopped");
        Ok(())
    }

    fn flush_os_cache(&mut self) -> Result<()> {
        self.flusher.flush()
    }

    fn state(&self) -> ProcessState {
        self.state
    }

    fn database(&mut self) -> Result<DatabaseHandle> {
        self.detect_exit();
        match (&self.handle, self.state) {
            (Some(handle), ProcessState::Ready) => Ok(handle.clone()),
            _ => Err(CalibrationError::NotRunning),
        }
    }
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!("Failed to stop engine on drop: {}", e);
            }
        }
    }
}

/// Scoped engine acquisition
///
/// `acquire` starts the engine; the engine is stopped exactly once when the
/// guard is released or dropped, whichever comes first.
pub struct ControllerGuard<'a, L: Lifecycle + ?Sized> {
    lifecycle: &'a mut L,
    released: bool,
}

impl<'a, L: Lifecycle + ?Sized> ControllerGuard<'a, L> {
    pub fn acquire(lifecycle: &'a mut L) -> Result<Self> {
        lifecycle.start()?;
        Ok(Self {
            lifecycle,
            released: false,
        })
    }

    /// Stop the engine, reporting any shutdown failure
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lifecycle.stop()
    }
}

impl<L: Lifecycle + ?Sized> Deref for ControllerGuard<'_, L> {
    type Target = L;

    fn deref(&self) -> &L {
        self.lifecycle
    }
}

impl<L: Lifecycle + ?Sized> DerefMut for ControllerGuard<'_, L> {
    fn deref_mut(&mut self) -> &mut L {
        self.lifecycle
    }
}

impl<L: Lifecycle + ?Sized> Drop for ControllerGuard<'_, L> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self.lifecycle.stop() {
                warn!("Best-effort engine stop failed: {}", e);
            }
        }
    }
}

/// Run `body` with the engine started, stopping it on every exit path
///
/// A failure from `body` takes precedence over a failure to stop.
pub fn with_engine<L, T, F>(lifecycle: &mut L, body: F) -> Result<T>
where
    L: Lifecycle + ?Sized,
    F: FnOnce(&mut L) -> Result<T>,
{
    let mut guard = ControllerGuard::acquire(lifecycle)?;
    match body(&mut *guard) {
        Ok(value) => {
            guard.release()?;
            Ok(value)
        }
        Err(e) => {
            drop(guard);
            Err(e)
        }
    }
}
