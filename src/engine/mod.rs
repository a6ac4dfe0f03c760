//! Worker process supervision
//!
//! ## Responsibilities
//!
//! - Spawn video-worker and area-worker processes for a session
//! - Deliver the job payload and the stop signal over the worker's stdin
//! - Join exiting workers with a bounded wait, force-killing stragglers
//!
//! The stop bound exists because a worker may be blocked in a video I/O
//! call that never observes the polite signal; the orchestrator's serving
//! loop must not hang on it. Spawned children carry `kill_on_drop` so an
//! orchestrator crash cannot leak worker processes.

pub mod worker;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

use crate::config::{AppSettings, AreaConfig, SourceConfig};
use crate::error::{Error, Result};

/// Bounded wait for a worker to exit after the stop signal
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Job payload handed to a worker as the first line on its stdin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum WorkerJob {
    /// Process one shard of video sources
    Video {
        shard_index: usize,
        sources: Vec<SourceConfig>,
        app: AppSettings,
    },
    /// Supervise all area aggregation loops
    Area {
        areas: Vec<AreaConfig>,
        sources: Vec<SourceConfig>,
        app: AppSettings,
    },
}

/// How a worker process is launched
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Re-invoke the current executable with the worker subcommand.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| Error::Worker(format!("cannot resolve own executable: {e}")))?;
        Ok(Self {
            program,
            args: vec!["worker".to_string()],
        })
    }
}

/// How a worker left the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited within the bounded wait
    Joined,
    /// Ignored the stop signal and was terminated
    Killed,
}

/// A spawned worker process and its one-way signaling link
#[derive(Debug)]
pub struct EngineHandle {
    name: String,
    link: Option<ChildStdin>,
    child: Child,
}

impl EngineHandle {
    /// Spawn a worker and hand it its job payload.
    pub async fn spawn(name: &str, command: &WorkerCommand, job: &WorkerJob) -> Result<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Worker(format!(
                    "failed to spawn {}: {}",
                    command.program.display(),
                    e
                ))
            })?;
        let mut link = child
            .stdin
            .take()
            .ok_or_else(|| Error::Worker("worker stdin not piped".to_string()))?;

        let mut payload = serde_json::to_string(job)?;
        payload.push('\n');
        link.write_all(payload.as_bytes())
            .await
            .map_err(|e| Error::Worker(format!("failed to hand job to {name}: {e}")))?;

        tracing::info!(
            engine = %name,
            pid = child.id().unwrap_or_default(),
            "Worker spawned"
        );
        Ok(Self {
            name: name.to_string(),
            link: Some(link),
            child,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the worker to stop, wait up to `timeout` for it to exit,
    /// then terminate it forcibly. The handle is consumed either way.
    pub async fn stop(mut self, timeout: Duration) -> StopOutcome {
        if let Some(mut link) = self.link.take() {
            // The worker may already be gone; a dead pipe is fine.
            let _ = link.write_all(b"stop\n").await;
            let _ = link.flush().await;
            // Dropping the link closes the pipe, so EOF doubles as the
            // signal for workers not currently reading.
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(engine = %self.name, status = %status, "Worker exited");
                StopOutcome::Joined
            }
            Ok(Err(e)) => {
                tracing::warn!(engine = %self.name, error = %e, "Worker wait failed, terminating");
                let _ = self.child.kill().await;
                StopOutcome::Killed
            }
            Err(_) => {
                tracing::warn!(
                    engine = %self.name,
                    timeout_secs = timeout.as_secs(),
                    "Worker ignored stop signal, terminating"
                );
                let _ = self.child.kill().await;
                StopOutcome::Killed
            }
        }
    }
}
