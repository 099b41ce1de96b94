//! Lifecycle of exactly one spawned server process.
//!
//! Disposal is graceful-then-forced: TERM, a bounded grace period, then
//! KILL. It resolves only once the exit is actually observed, never merely
//! after a signal is sent.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::{HarnessError, HarnessResult};
use crate::types::NodeDescriptor;

/// How long to wait after TERM before escalating.
const TERM_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// How long to wait for KILL to take effect.
const KILL_WAIT: Duration = Duration::from_secs(10);

/// Controller for one spawned process.
#[derive(Debug)]
pub struct ProcessController {
    descriptor: NodeDescriptor,
    pid: u32,
    exit_rx: watch::Receiver<Option<ExitStatus>>,
    disposed: bool,
}

impl ProcessController {
    /// Validate and spawn the server binary, wiring an exit watcher.
    ///
    /// A missing or non-executable binary is a typed error here, before
    /// any child exists, rather than an asynchronous failure inside one.
    pub fn spawn(
        binary: &Path,
        args: &[String],
        env: &[(String, String)],
        descriptor: NodeDescriptor,
    ) -> HarnessResult<Self> {
        validate_binary(binary)?;

        let mut command = Command::new(binary);
        // Null stdio: a long-running server fills the pipe buffer otherwise
        // and nothing in the harness reads it; the server writes --log-dir.
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        for (name, value) in env {
            command.env(name, value);
        }

        let mut child = command.spawn().map_err(|e| HarnessError::Spawn {
            binary: binary.to_path_buf(),
            reason: e.to_string(),
        })?;

        let pid = child.id().unwrap_or(0);
        info!(
            port = descriptor.api_port,
            pid,
            node = descriptor.index,
            "Server process spawned"
        );

        let (exit_tx, exit_rx) = watch::channel(None);
        let port = descriptor.api_port;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    debug!(port, ?status, "Server process exited");
                    let _ = exit_tx.send(Some(status));
                }
                Err(error) => {
                    // Racing signal delivery against wait() can surface an
                    // OS error even though the process is gone; record a
                    // synthetic exit so disposal still resolves.
                    warn!(port, %error, "Process wait failed");
                    let _ = exit_tx.send(Some(ExitStatus::default()));
                }
            }
        });

        Ok(Self {
            descriptor,
            pid,
            exit_rx,
            disposed: false,
        })
    }

    pub fn port(&self) -> u16 {
        self.descriptor.api_port
    }

    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the process has not yet been observed to exit.
    pub fn is_running(&self) -> bool {
        !self.disposed && self.exit_rx.borrow().is_none()
    }

    /// Last observed exit status, if any.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.exit_rx.borrow()
    }

    /// Terminate the process: TERM, bounded grace, then KILL.
    ///
    /// Idempotent: a second call, or a call on an already-exited process,
    /// succeeds immediately. Exit via the expected signals is success.
    pub async fn dispose(&mut self) -> HarnessResult<()> {
        if self.disposed {
            return Ok(());
        }
        if self.exit_rx.borrow().is_some() {
            self.disposed = true;
            return Ok(());
        }

        let port = self.descriptor.api_port;
        info!(port, pid = self.pid, "Disposing server process");

        send_signal(self.pid, false);
        if self.await_exit(TERM_GRACE_PERIOD).await {
            self.disposed = true;
            return Ok(());
        }

        warn!(port, pid = self.pid, "Process survived TERM grace period; escalating to KILL");
        send_signal(self.pid, true);
        if self.await_exit(KILL_WAIT).await {
            self.disposed = true;
            return Ok(());
        }

        Err(HarnessError::ProcessRuntime {
            port,
            reason: format!("process {pid} did not exit after KILL", pid = self.pid),
        })
    }

    /// Wait up to `budget` for the exit watcher to observe an exit.
    async fn await_exit(&mut self, budget: Duration) -> bool {
        if self.exit_rx.borrow().is_some() {
            return true;
        }
        matches!(timeout(budget, self.exit_rx.changed()).await, Ok(Ok(())))
            && self.exit_rx.borrow().is_some()
    }
}

/// The binary must exist, be a file, and carry an executable bit.
fn validate_binary(binary: &Path) -> HarnessResult<()> {
    let metadata = std::fs::metadata(binary).map_err(|_| HarnessError::Spawn {
        binary: binary.to_path_buf(),
        reason: "binary not found".to_string(),
    })?;
    if !metadata.is_file() {
        return Err(HarnessError::Spawn {
            binary: binary.to_path_buf(),
            reason: "not a regular file".to_string(),
        });
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(HarnessError::Spawn {
                binary: binary.to_path_buf(),
                reason: "not executable".to_string(),
            });
        }
    }
    Ok(())
}

/// Send TERM or KILL through the platform `kill` tool.
fn send_signal(pid: u32, force: bool) -> bool {
    if pid == 0 {
        return false;
    }

    let signal = if force { "KILL" } else { "TERM" };
    match std::process::Command::new("kill")
        .arg(format!("-{signal}"))
        .arg(pid.to_string())
        .output()
    {
        Ok(output) => output.status.success(),
        Err(error) => {
            debug!(pid, signal, %error, "Failed to send signal");
            false
        }
    }
}
