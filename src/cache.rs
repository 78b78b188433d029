//! OS page cache eviction
//!
//! Pending writes are flushed with `sync(2)` first so that dirty pages can be
//! dropped too, then the kernel is told to drop clean page cache, dentries and
//! inodes (`3` written to `drop_caches`).

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

use crate::error::{CalibrationError, Result};

/// Drops the OS page cache on request
#[derive(Debug, Clone)]
pub struct CacheFlusher {
    drop_caches_path: PathBuf,
    use_sudo: bool,
}

impl CacheFlusher {
    pub fn new(drop_caches_path: impl Into<PathBuf>, use_sudo: bool) -> Self {
        Self {
            drop_caches_path: drop_caches_path.into(),
            use_sudo,
        }
    }

    pub fn drop_caches_path(&self) -> &Path {
        &self.drop_caches_path
    }

    /// Synchronize pending writes, then drop the page cache
    pub fn flush(&self) -> Result<()> {
        nix::unistd::sync();

        if self.use_sudo {
            self.drop_with_sudo()?;
        } else {
            std::fs::write(&self.drop_caches_path, b"3\n").map_err(|e| {
                CalibrationError::CacheFlush(format!(
                    "writing {}: {}",
                    self.drop_caches_path.display(),
                    e
                ))
            })?;
        }

        debug!("OS page cache dropped");
        Ok(())
    }

    fn drop_with_sudo(&self) -> Result<()> {
        // -n: fail instead of blocking on a password prompt
        let script = format!("echo 3 > {}", self.drop_caches_path.display());
        let output = Command::new("sudo")
            .args(["-n", "sh", "-c", &script])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CalibrationError::CacheFlush(format!("spawning sudo: {}", e)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(CalibrationError::CacheFlush(format!(
                "sudo exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}
