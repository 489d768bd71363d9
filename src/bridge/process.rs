use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::bridge::protocol::READY_MARKER;
use crate::error::{RepairError, Result};

/// How to launch a worker. `--port <n>` is appended at spawn time.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// This executable in `worker` mode.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, &["worker"]))
    }
}

/// A spawned worker and the tasks draining its output.
///
/// The child is killed when this value is dropped or terminated.
pub struct WorkerProcess {
    pid: Option<u32>,
    ready: Option<oneshot::Receiver<()>>,
    kill: Option<oneshot::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl WorkerProcess {
    /// Spawns the worker on `port`.
    ///
    /// `on_exit` runs only if the child exits by itself, never after
    /// [`terminate`](Self::terminate).
    pub fn spawn<F>(command: &WorkerCommand, port: u16, on_exit: F) -> Result<Self>
    where
        F: FnOnce(Option<ExitStatus>) + Send + 'static,
    {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RepairError::StartupTimeout(format!(
                    "failed to spawn {}: {e}",
                    command.program.display()
                ))
            })?;

        let pid = child.id();
        info!("spawned worker {} (pid {:?}) on port {}", command.program.display(), pid, port);

        let (ready_tx, ready_rx) = oneshot::channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut ready_tx = Some(ready_tx);
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "worker", "{line}");
                    if line.contains(READY_MARKER) {
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "worker", "{line}");
                }
            });
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let status = status.ok();
                    warn!("worker exited unexpectedly: {:?}", status);
                    on_exit(status);
                }
                // Fires on an explicit kill and when the handle is dropped.
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!("failed to kill worker: {e}");
                    }
                }
            }
        });

        Ok(Self {
            pid,
            ready: Some(ready_rx),
            kill: Some(kill_tx),
            watcher: Some(watcher),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Waits for the readiness line. A worker that exits first, or stays
    /// silent past `timeout`, is a startup failure whatever its exit code.
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        let rx = self
            .ready
            .take()
            .ok_or_else(|| RepairError::Protocol("readiness already awaited".into()))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RepairError::StartupTimeout(
                "worker closed its output before reporting readiness".into(),
            )),
            Err(_) => Err(RepairError::StartupTimeout(format!(
                "no readiness line within {timeout:?}"
            ))),
        }
    }

    /// Kills the child and waits for it to be reaped.
    pub async fn terminate(mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.await;
        }
    }
}
