//! Test-run lifecycle coordination across worker processes.
//!
//! Each worker process owns one [`RunCoordinator`], constructed at
//! configure time and threaded through every lifecycle call; there is no
//! process-wide singleton state. The coordinator:
//!
//! 1. **configure**: registers the worker, then adopts the run id a
//!    sibling already persisted or creates a new remote run and persists
//!    its id for siblings.
//! 2. **record_status**: folds per-phase reports into one record per
//!    test node id.
//! 3. **flush_node**: sends a test's finalized record once the host
//!    framework signals it fully finished.
//! 4. **finalize**: signals this worker's share of the run and, when this
//!    worker is the last one alive, closes the remote run and clears the
//!    persisted id.
//!
//! # Exactly-once creation, approximately
//!
//! Adoption-vs-creation of the run id is not atomic across processes: two
//! workers can both miss a just-written id and both call create. The
//! exclusive-create write makes the first writer win and the loser adopt
//! the sibling's id, so all workers still converge on one id; the stray
//! remote run is the accepted cost of the remaining race window, which in
//! practice stays closed because workers start staggered.
//!
//! # Fail-open
//!
//! Nothing on the reporting path may fail the test session. A failed run
//! creation disables reporting for this process and the session proceeds;
//! unreachable collaborators cost telemetry, never test results.

use tracing::{debug, info, warn};

use crate::artifacts::ArtifactCredentials;
use crate::client::ReportingClient;
use crate::config::RunConfig;
use crate::status::{PhaseReport, StatusAccumulator};
use crate::sync::SyncLock;

/// Lifecycle state of the run handled by one worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run id yet; `configure` has not completed.
    Unconfigured,
    /// This worker created the remote run.
    Created,
    /// This worker adopted a run id persisted by a sibling (or seeded via
    /// configuration).
    Adopted,
    /// At least one status report has been accumulated.
    Reporting,
    /// Teardown in progress.
    Finalizing,
    /// The run handle is released; no further calls are expected.
    Finished,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Unconfigured => "unconfigured",
            RunState::Created => "created",
            RunState::Adopted => "adopted",
            RunState::Reporting => "reporting",
            RunState::Finalizing => "finalizing",
            RunState::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Coordinates one worker process's participation in a (possibly shared)
/// remote test run.
pub struct RunCoordinator<C> {
    client: C,
    config: RunConfig,
    lock: SyncLock,
    state: RunState,
    run_id: Option<String>,
    is_first_worker: bool,
    statuses: StatusAccumulator,
    artifact_credentials: Option<ArtifactCredentials>,
}

impl<C: ReportingClient> RunCoordinator<C> {
    pub fn new(client: C, config: RunConfig, lock: SyncLock) -> Self {
        Self {
            client,
            config,
            lock,
            state: RunState::Unconfigured,
            run_id: None,
            is_first_worker: false,
            statuses: StatusAccumulator::new(),
            artifact_credentials: None,
        }
    }

    /// Establishes the run id for this process: adopt a persisted one or
    /// create a new remote run and persist its id for sibling processes.
    ///
    /// Returns the run id, or `None` when the run could not be created;
    /// in that case reporting is disabled for this process and every later
    /// call is a no-op.
    pub async fn configure(&mut self) -> Option<String> {
        self.is_first_worker = self.lock.lock();
        debug!(
            is_first = self.is_first_worker,
            worker = %self.lock.worker_id(),
            "configuring run coordinator"
        );

        if let Some(id) = self.config.run_id.clone() {
            // Seeded from configuration; persist so siblings agree.
            self.lock.save_run_id(&id);
            self.run_id = Some(id);
            self.state = RunState::Adopted;
        } else if let Some(id) = self.lock.get_run_id() {
            info!("Adopted test run {}", id);
            self.run_id = Some(id);
            self.state = RunState::Adopted;
        } else {
            match self.client.create_run(&self.config.to_payload()).await {
                Some(response) => {
                    self.lock.save_run_id(&response.uid);
                    // A sibling may have won the exclusive create; its id
                    // is the canonical one.
                    let id = self.lock.get_run_id().unwrap_or(response.uid);
                    self.run_id = Some(id);
                    self.state = RunState::Created;
                }
                None => {
                    warn!("Test run failed to create; reporting skipped for this process");
                    return None;
                }
            }
        }

        // Register this worker with the run; this is also the artifact
        // credential handoff.
        if let Some(id) = self.run_id.clone() {
            let mut payload = self.config.to_payload();
            payload.id = Some(id.clone());
            if let Some(response) = self.client.update_run(&id, &payload).await {
                if let Some(credentials) = response.artifacts {
                    self.artifact_credentials = Some(credentials.resolved(&id));
                }
            }
        }

        self.run_id.clone()
    }

    /// Merges one phase report into the record for `node_id`.
    ///
    /// Side effect only; never fails for reporting-related reasons.
    pub fn record_status(&mut self, node_id: &str, report: &PhaseReport) {
        if self.run_id.is_none() {
            return;
        }
        self.statuses.record(node_id, report);
        self.state = RunState::Reporting;
    }

    /// Attaches uploaded artifact URLs to the record for `node_id`.
    pub fn add_artifacts<I>(&mut self, node_id: &str, urls: I)
    where
        I: IntoIterator<Item = String>,
    {
        if self.run_id.is_none() {
            return;
        }
        self.statuses.add_artifacts(node_id, urls);
    }

    /// Sends the finalized record for `node_id` once the host framework
    /// signals the test fully finished (all phases done).
    ///
    /// A record whose status never got determined is discarded silently.
    /// Tolerates an unreachable reporting collaborator.
    pub async fn flush_node(&mut self, node_id: &str) {
        let Some(run_id) = self.run_id.clone() else {
            return;
        };
        let Some(record) = self.statuses.take(node_id) else {
            return;
        };
        if record.status.is_none() {
            debug!("Discarding status-less record for {}", node_id);
            return;
        }
        self.client.report_status(&run_id, &record).await;
    }

    /// Finishes this worker's participation in the run at process teardown.
    ///
    /// Non-shared runs finish directly, since each worker owns its own run. In
    /// shared mode every worker signals its share first, and only the
    /// worker whose `unlock` observes zero remaining siblings closes the
    /// remote run. The persisted run id is cleared exactly once, by that
    /// last worker, so the next session starts clean.
    pub async fn finalize(&mut self) {
        let Some(run_id) = self.run_id.clone() else {
            self.lock.unlock();
            self.state = RunState::Finished;
            return;
        };
        self.state = RunState::Finalizing;

        // Anything still buffered gets flushed before the run closes.
        for (node_id, record) in self.statuses.drain() {
            if record.status.is_some() {
                debug!("Flushing buffered status for {}", node_id);
                self.client.report_status(&run_id, &record).await;
            }
        }

        if !self.config.shared_run {
            let is_last = self.lock.unlock();
            self.client.finish_run(&run_id, false).await;
            if is_last {
                self.lock.clear_run_id();
            }
            self.state = RunState::Finished;
            return;
        }

        // Signal this worker's share while its marker still exists, so a
        // sibling observing the markers cannot close the run under us.
        self.client.finish_run(&run_id, false).await;
        let is_last = self.lock.unlock();
        if is_last {
            info!("Last worker closing shared run {}", run_id);
            self.client.finish_run(&run_id, true).await;
            self.lock.clear_run_id();
        }
        self.state = RunState::Finished;
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Whether this worker observed zero siblings when it registered.
    pub fn is_first_worker(&self) -> bool {
        self.is_first_worker
    }

    /// Blob-store credentials granted with the run, when any.
    pub fn artifact_credentials(&self) -> Option<&ArtifactCredentials> {
        self.artifact_credentials.as_ref()
    }

    /// Read-only view of the buffered record for `node_id`.
    pub fn buffered_status(&self, node_id: &str) -> Option<&crate::status::StatusRecord> {
        self.statuses.get(node_id)
    }
}
