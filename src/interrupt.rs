//! Operator abort
//!
//! SIGINT and SIGTERM only raise a flag. The protocol checks it between
//! trials and the controller checks it while polling for readiness, so an
//! abort unwinds through the scoped guard and the engine is shut down before
//! the error reaches the caller.

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CalibrationError, Result};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT/SIGTERM handlers
pub fn install() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe
        unsafe { signal::sigaction(sig, &action) }
            .map_err(|e| CalibrationError::Io(std::io::Error::from(e)))?;
    }
    Ok(())
}

pub fn requested() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Fail with [`CalibrationError::Interrupted`] once an abort was requested
pub fn check() -> Result<()> {
    if requested() {
        Err(CalibrationError::Interrupted)
    } else {
        Ok(())
    }
}

/// Raise the flag without a signal
pub fn request() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Clear a previous request
pub fn reset() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}
