//! Service lifecycle control through the host's process supervisor.
//!
//! Each request opens its own control-plane connection, submits one job with
//! replace-on-conflict semantics and waits for exactly one completion signal.
//! The wait is bounded; once it expires the job is abandoned to the control
//! plane and may still finish on its own.

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::error::{ControlPlaneFailure, Result};
use crate::models::{ControlPlaneScope, UnitName};

pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitAction {
    Restart,
    Stop,
}

impl UnitAction {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitAction::Restart => "restart",
            UnitAction::Stop => "stop",
        }
    }
}

/// How a new job interacts with one already queued for the same unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    Replace,
}

impl JobMode {
    pub fn as_str(self) -> &'static str {
        match self {
            JobMode::Replace => "replace",
        }
    }
}

/// Completion signal of a control-plane job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    Done,
    Canceled,
    Timeout,
    Failed,
    Dependency,
}

impl JobResult {
    pub fn as_str(self) -> &'static str {
        match self {
            JobResult::Done => "done",
            JobResult::Canceled => "canceled",
            JobResult::Timeout => "timeout",
            JobResult::Failed => "failed",
            JobResult::Dependency => "dependency",
        }
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn connect(&self) -> std::result::Result<Box<dyn ControlConnection>, ControlPlaneFailure>;
}

/// An open control-plane session. Dropping it releases the connection.
#[async_trait]
pub trait ControlConnection: Send {
    /// Queue a job; its single result is delivered on `reply`.
    async fn submit(
        &mut self,
        action: UnitAction,
        unit: &UnitName,
        mode: JobMode,
        reply: oneshot::Sender<JobResult>,
    ) -> std::result::Result<(), ControlPlaneFailure>;
}

/// Restart/stop of slot units, as seen by the deployment coordinator.
#[async_trait]
pub trait UnitController: Send + Sync {
    async fn restart(&self, unit: &UnitName) -> Result<()>;
    async fn stop(&self, unit: &UnitName) -> Result<()>;
}

pub struct ServiceController {
    plane: Arc<dyn ControlPlane>,
    timeout: Duration,
}

impl ServiceController {
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            plane,
            timeout: DEFAULT_CONTROL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, action: UnitAction, unit: &UnitName) -> Result<()> {
        let mut connection = self.plane.connect().await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        connection
            .submit(action, unit, JobMode::Replace, reply_tx)
            .await?;

        let signal = tokio::time::timeout(self.timeout, reply_rx).await;
        drop(connection);

        match signal {
            Ok(Ok(JobResult::Done)) => {
                tracing::debug!(%unit, action = action.as_str(), "control-plane job done");
                Ok(())
            }
            Ok(Ok(result)) => Err(ControlPlaneFailure::Rejected {
                unit: unit.to_string(),
                result: result.to_string(),
            }
            .into()),
            Ok(Err(_)) => Err(ControlPlaneFailure::ReplyDropped {
                unit: unit.to_string(),
            }
            .into()),
            Err(_) => Err(ControlPlaneFailure::Timeout {
                unit: unit.to_string(),
                after: self.timeout,
            }
            .into()),
        }
    }
}

#[async_trait]
impl UnitController for ServiceController {
    async fn restart(&self, unit: &UnitName) -> Result<()> {
        self.run(UnitAction::Restart, unit).await
    }

    async fn stop(&self, unit: &UnitName) -> Result<()> {
        self.run(UnitAction::Stop, unit).await
    }
}

/// systemd, driven through `systemctl`. Units are addressed as template
/// instances (`api.green` becomes `api@green.service`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemctlControlPlane {
    scope: ControlPlaneScope,
}

impl SystemctlControlPlane {
    pub fn new(scope: ControlPlaneScope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl ControlPlane for SystemctlControlPlane {
    async fn connect(&self) -> std::result::Result<Box<dyn ControlConnection>, ControlPlaneFailure> {
        Ok(Box::new(SystemctlConnection { scope: self.scope }))
    }
}

struct SystemctlConnection {
    scope: ControlPlaneScope,
}

#[async_trait]
impl ControlConnection for SystemctlConnection {
    async fn submit(
        &mut self,
        action: UnitAction,
        unit: &UnitName,
        mode: JobMode,
        reply: oneshot::Sender<JobResult>,
    ) -> std::result::Result<(), ControlPlaneFailure> {
        let mut cmd = Command::new("systemctl");
        if self.scope == ControlPlaneScope::User {
            cmd.arg("--user");
        }
        cmd.arg(format!("--job-mode={}", mode.as_str()))
            .arg(action.as_str())
            .arg(unit.systemd_unit())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| ControlPlaneFailure::Connect(format!("failed to run systemctl: {e}")))?;

        let unit = unit.to_string();
        tokio::spawn(async move {
            let result = match child.wait_with_output().await {
                Ok(output) if output.status.success() => JobResult::Done,
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    tracing::debug!(%unit, stderr = %stderr.trim(), "systemctl job did not complete");
                    classify_failure(&stderr)
                }
                Err(e) => {
                    tracing::debug!(%unit, "lost systemctl job: {e}");
                    JobResult::Failed
                }
            };
            // The waiter may have given up already.
            let _ = reply.send(result);
        });
        Ok(())
    }
}

impl Drop for SystemctlConnection {
    fn drop(&mut self) {
        tracing::trace!("control-plane connection released");
    }
}

/// Map systemctl's diagnostic to the job result systemd reported.
pub fn classify_failure(stderr: &str) -> JobResult {
    let message = stderr.to_ascii_lowercase();
    if message.contains("canceled") || message.contains("cancelled") {
        JobResult::Canceled
    } else if message.contains("timed out") || message.contains("timeout") {
        JobResult::Timeout
    } else if message.contains("dependency") {
        JobResult::Dependency
    } else {
        JobResult::Failed
    }
}
