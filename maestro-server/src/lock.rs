//! Process lock file.
//!
//! A single file at `data/.maestro.lock` holds the owning PID. Startup
//! aborts when the file names a live process; stale locks from crashed
//! instances are rewritten.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Result, ServerError};

/// Relative lock file location.
pub const LOCK_FILE: &str = "data/.maestro.lock";

/// Holds the process lock for the lifetime of the service. Dropping the
/// guard removes the file.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    /// Acquire the lock under `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::LockHeld`] when another live process owns
    /// the lock, or an IO error when the file cannot be written.
    pub fn acquire(base_dir: &Path) -> Result<Self> {
        let path = base_dir.join(LOCK_FILE);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if let Ok(content) = std::fs::read_to_string(&path) {
            if let Ok(pid) = content.trim().parse::<u32>() {
                if pid_alive(pid) {
                    return Err(ServerError::LockHeld(pid));
                }
                warn!(pid, "removing stale lock from dead process");
            }
        }

        std::fs::write(&path, std::process::id().to_string())?;
        info!(path = %path.display(), pid = std::process::id(), "process lock acquired");
        Ok(Self { path })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(error = %e, "failed to remove lock file");
        }
    }
}

/// Whether a process with the given pid is alive.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists() || kill_probe(pid)
}

/// Fallback for systems without /proc: `kill -0` probes for existence
/// without sending a signal.
#[cfg(unix)]
fn kill_probe(pid: u32) -> bool {
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // Without a portable probe, assume stale and rewrite.
    false
}
