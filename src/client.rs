//! Reporting collaborator boundary.
//!
//! The coordinator never talks HTTP itself. It calls a [`ReportingClient`],
//! and every call is fire-and-forget from the coordinator's perspective:
//! failures are logged here and surface as `None`/empty sentinels, never as
//! errors into the test execution path. Retry and backoff policy belongs to
//! the collaborator behind the trait.
//!
//! The default implementation, [`CommandReporter`], shells out to an
//! external reporter executable, so collaborators can be written in any
//! language. The protocol:
//!
//! ```bash
//! reporter create-run          # run payload on stdin
//! reporter update-run <id>     # run payload on stdin
//! reporter report <id>         # status record on stdin
//! reporter finish <id>         # {"status_event": ...} on stdin
//! ```
//!
//! Output: the last stdout line that looks like JSON is taken as the
//! response, e.g. `{"uid": "a9c1", "artifacts": {...}}`. A command that
//! prints nothing JSON-shaped simply yields no response.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactCredentials;
use crate::status::StatusRecord;

/// Payload describing a run for create/update calls.
///
/// `None` fields are omitted from the serialized JSON, matching what the
/// reporting endpoint expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub parallel: bool,
    pub shared_run: bool,
}

/// Response to a successful create/update call.
#[derive(Debug, Clone, Deserialize)]
pub struct RunResponse {
    /// Opaque identifier of the remote run.
    pub uid: String,
    /// Blob-store credentials for artifact uploads, when the service
    /// grants them.
    #[serde(default)]
    pub artifacts: Option<ArtifactCredentials>,
}

/// Client for the remote run-tracking service.
///
/// No method returns an error: an unreachable collaborator is logged and
/// reported as `None`/`()`, and the coordinator proceeds as if that update
/// simply did not happen. Only telemetry is lost, never test results.
#[async_trait]
pub trait ReportingClient: Send + Sync {
    /// Creates a new remote run; `None` when the service is unreachable.
    async fn create_run(&self, payload: &RunPayload) -> Option<RunResponse>;

    /// Updates an existing run (also the artifact-credential handoff).
    async fn update_run(&self, run_id: &str, payload: &RunPayload) -> Option<RunResponse>;

    /// Reports one finalized test status into the run.
    async fn report_status(&self, run_id: &str, record: &StatusRecord);

    /// Finishes the run. `is_final` closes a shared/parallel run
    /// (`finish_parallel`); otherwise this worker's plain `finish`.
    async fn finish_run(&self, run_id: &str, is_final: bool);

    /// Client name, for logging.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: ReportingClient + ?Sized> ReportingClient for Arc<T> {
    async fn create_run(&self, payload: &RunPayload) -> Option<RunResponse> {
        (**self).create_run(payload).await
    }

    async fn update_run(&self, run_id: &str, payload: &RunPayload) -> Option<RunResponse> {
        (**self).update_run(run_id, payload).await
    }

    async fn report_status(&self, run_id: &str, record: &StatusRecord) {
        (**self).report_status(run_id, record).await
    }

    async fn finish_run(&self, run_id: &str, is_final: bool) {
        (**self).finish_run(run_id, is_final).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// A client that does nothing, used when reporting is disabled.
pub struct NullReporter;

#[async_trait]
impl ReportingClient for NullReporter {
    async fn create_run(&self, _payload: &RunPayload) -> Option<RunResponse> {
        None
    }

    async fn update_run(&self, _run_id: &str, _payload: &RunPayload) -> Option<RunResponse> {
        None
    }

    async fn report_status(&self, _run_id: &str, _record: &StatusRecord) {}

    async fn finish_run(&self, _run_id: &str, _is_final: bool) {}

    fn name(&self) -> &str {
        "null"
    }
}

/// A client that shells out to an external reporter command.
///
/// The command string is split respecting quotes, the subcommand and run id
/// are appended, and the JSON payload goes to the child's stdin.
pub struct CommandReporter {
    /// The base command to run (e.g. `"uv run reporter.py"`).
    command: String,
    /// Working directory for the command.
    working_dir: Option<PathBuf>,
    /// Timeout in seconds for one invocation.
    timeout_secs: u64,
}

impl CommandReporter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            timeout_secs: 300,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Build the base command parts.
    fn command_parts(&self) -> Vec<String> {
        shell_words::split(&self.command).unwrap_or_else(|_| vec![self.command.clone()])
    }

    /// Runs one reporter invocation; `None` on any failure or when the
    /// output carries no JSON response line.
    async fn invoke(&self, args: &[&str], payload: String) -> Option<serde_json::Value> {
        let mut parts = self.command_parts();
        parts.extend(args.iter().map(|s| s.to_string()));

        debug!("Running reporter command: {:?}", parts);

        let mut cmd = tokio::process::Command::new(&parts[0]);
        cmd.args(&parts[1..]);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!("Failed to spawn reporter command: {}", err);
                return None;
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(payload.as_bytes()).await {
                warn!("Failed to write reporter payload: {}", err);
            }
            // Dropping stdin closes the pipe so the child sees EOF.
        }

        let output = match tokio::time::timeout(
            std::time::Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!("Reporter command failed: {}", err);
                return None;
            }
            Err(_) => {
                warn!("Reporter command timed out after {}s", self.timeout_secs);
                return None;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Reporter command exited with {}: {}", output.status, stderr);
            return None;
        }

        stdout
            .lines()
            .rev()
            .find(|line| line.trim().starts_with('{'))
            .and_then(|line| serde_json::from_str(line).ok())
    }
}

#[async_trait]
impl ReportingClient for CommandReporter {
    async fn create_run(&self, payload: &RunPayload) -> Option<RunResponse> {
        info!("Creating test run");
        let body = serde_json::to_string(payload).ok()?;
        let response = self.invoke(&["create-run"], body).await?;
        match serde_json::from_value::<RunResponse>(response) {
            Ok(run) => {
                info!("Test run created: {}", run.uid);
                Some(run)
            }
            Err(err) => {
                warn!("Malformed create-run response: {}", err);
                None
            }
        }
    }

    async fn update_run(&self, run_id: &str, payload: &RunPayload) -> Option<RunResponse> {
        info!("Updating test run {}", run_id);
        let body = serde_json::to_string(payload).ok()?;
        let response = self.invoke(&["update-run", run_id], body).await?;
        match serde_json::from_value::<RunResponse>(response) {
            Ok(run) => Some(run),
            Err(err) => {
                warn!("Malformed update-run response: {}", err);
                None
            }
        }
    }

    async fn report_status(&self, run_id: &str, record: &StatusRecord) {
        debug!(
            "Reporting test status. Test id: {:?}, title: {:?}",
            record.test_id, record.title
        );
        let Ok(body) = serde_json::to_string(record) else {
            return;
        };
        if self.invoke(&["report", run_id], body).await.is_none() {
            warn!("Failed to report test status for run {}", run_id);
        }
    }

    async fn finish_run(&self, run_id: &str, is_final: bool) {
        info!("Finishing test run {}", run_id);
        let status_event = if is_final { "finish_parallel" } else { "finish" };
        let mut body = BTreeMap::new();
        body.insert("status_event", status_event);
        let Ok(body) = serde_json::to_string(&body) else {
            return;
        };
        self.invoke(&["finish", run_id], body).await;
    }

    fn name(&self) -> &str {
        &self.command
    }
}
