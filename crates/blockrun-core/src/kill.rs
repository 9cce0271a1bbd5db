//! Process tree teardown.
//!
//! Session children routinely start their own descendants (shells, compilers),
//! so killing only the direct child leaves orphans behind.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::process::Command;

use crate::error::{Error, Result};

/// Exit status `pkill` uses when no process matched.
#[cfg(unix)]
const PKILL_NO_MATCH: i32 = 1;

/// Terminate `pid` and all of its descendants.
///
/// On Windows this is a single `taskkill /T /F`; any failure is returned.
/// On POSIX the children are killed first with `pkill -P`, treating "no
/// children found" as success, then the parent is sent `SIGTERM` explicitly.
/// A parent that has already exited is not an error.
pub async fn kill_process_tree(pid: u32) -> Result<()> {
    #[cfg(windows)]
    {
        let output = Command::new("taskkill")
            .args(["/pid", &pid.to_string(), "/T", "/F"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Kill {
                pid,
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::Kill {
                pid,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    #[cfg(unix)]
    {
        kill_children(pid).await?;

        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(Error::Kill {
                    pid,
                    message: err.to_string(),
                });
            }
            tracing::debug!("Process {} already exited", pid);
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn kill_children(pid: u32) -> Result<()> {
    let output = Command::new("pkill")
        .args(["-P", &pid.to_string()])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::Kill {
            pid,
            message: format!("failed to run pkill: {}", e),
        })?;

    match output.status.code() {
        Some(0) => Ok(()),
        Some(PKILL_NO_MATCH) => {
            tracing::debug!("Process {} has no children to kill", pid);
            Ok(())
        }
        _ => Err(Error::Kill {
            pid,
            message: format!(
                "pkill exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }),
    }
}

/// Cloneable handle for killing one running process tree from anywhere.
///
/// Installed on a sink each time output handling is wired up, so a user
/// cancel can reach the process currently producing that block's output.
#[derive(Clone, Debug)]
pub struct KillHandle {
    pid: u32,
    killed: Arc<AtomicBool>,
}

impl KillHandle {
    /// Create a kill handle for a process id.
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Process id this handle targets.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Kill the process tree. Only the first call does anything.
    pub async fn kill(&self) -> Result<()> {
        if self.killed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        kill_process_tree(self.pid).await
    }

    #[cfg(test)]
    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}
