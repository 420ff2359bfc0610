//! Companion process supervision.
//!
//! The offline recognition engine runs as a separate process that prints
//! `READY` on stdout once its model is loaded and its socket is listening.
//! The supervisor tracks that line, flips the offline-availability flag the
//! engine provider reads, and reports exits.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle notifications from the supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanionEvent {
    /// The process printed its READY line.
    Ready,
    /// The process exited on its own. `code` is None when it was killed by
    /// a signal.
    Exited { code: Option<i32> },
}

/// Runs the companion and watches its stdout.
pub struct CompanionSupervisor {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CompanionSupervisor {
    /// Spawns the process. Events arrive on the returned receiver; `ready`
    /// flips true on READY and back to false when the process is gone.
    pub fn spawn(
        command: &str,
        args: &[String],
        ready: Arc<AtomicBool>,
    ) -> Result<(Self, mpsc::Receiver<CompanionEvent>)> {
        let mut child = Command::new(command)
            .args(args)
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start companion process `{}`", command))?;
        let stdout = child
            .stdout
            .take()
            .context("companion stdout was not captured")?;
        info!("companion process started (`{}`)", command);

        let (event_tx, event_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(supervise(child, stdout, ready, event_tx, shutdown_rx));

        let supervisor = Self {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        };
        Ok((supervisor, event_rx))
    }

    /// Kills the process and waits for the watcher to wind down. A shutdown
    /// requested here is not reported as an `Exited` event.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn supervise(
    mut child: Child,
    stdout: tokio::process::ChildStdout,
    ready: Arc<AtomicBool>,
    events: mpsc::Sender<CompanionEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim() == "READY" {
                        info!("companion reported ready");
                        ready.store(true, Ordering::SeqCst);
                        let _ = events.send(CompanionEvent::Ready).await;
                    } else {
                        debug!("companion: {}", line);
                    }
                }
                // stdout closed; the process is going away.
                Ok(None) | Err(_) => break,
            },
            _ = &mut shutdown => {
                if let Err(e) = child.start_kill() {
                    debug!("companion kill failed: {}", e);
                }
                let status = child.wait().await;
                ready.store(false, Ordering::SeqCst);
                debug!(
                    "companion stopped on request (status {:?})",
                    status.ok().and_then(|s| s.code())
                );
                return;
            }
        }
    }

    let status = child.wait().await;
    ready.store(false, Ordering::SeqCst);
    let code = status.ok().and_then(|s| s.code());
    match code {
        Some(0) => info!("companion exited cleanly"),
        other => warn!("companion exited with status {:?}", other),
    }
    let _ = events.send(CompanionEvent::Exited { code }).await;
}
