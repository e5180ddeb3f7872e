//! End-to-end coordinator scenarios: run creation and adoption across
//! workers, status flushing, and last-worker finalization.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use runlink::client::{ReportingClient, RunPayload, RunResponse};
use runlink::config::{RunConfig, RunSettings};
use runlink::coordinator::{RunCoordinator, RunState};
use runlink::status::{ErrorKind, Phase, PhaseError, PhaseReport, Status, StatusRecord};
use runlink::sync::{RUN_ID_FILE, SyncLock};

#[derive(Debug)]
enum Call {
    Create { title: String },
    Update { run_id: String },
    Report { run_id: String, record: StatusRecord },
    Finish { run_id: String, is_final: bool },
}

/// Remote service double shared by all simulated workers.
struct RecordingClient {
    uid: String,
    calls: Mutex<Vec<Call>>,
}

impl RecordingClient {
    fn new(uid: &str) -> Arc<Self> {
        Arc::new(Self {
            uid: uid.to_string(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn create_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| matches!(call, Call::Create { .. }))
            .count()
    }

    fn final_finishes(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                Call::Finish {
                    run_id,
                    is_final: true,
                } => Some(run_id.clone()),
                _ => None,
            })
            .collect()
    }

    fn partial_finishes(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    Call::Finish {
                        is_final: false,
                        ..
                    }
                )
            })
            .count()
    }

    fn reported_records(&self) -> Vec<StatusRecord> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                Call::Report { record, .. } => Some(record.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ReportingClient for RecordingClient {
    async fn create_run(&self, payload: &RunPayload) -> Option<RunResponse> {
        self.calls.lock().unwrap().push(Call::Create {
            title: payload.title.clone(),
        });
        Some(RunResponse {
            uid: self.uid.clone(),
            artifacts: None,
        })
    }

    async fn update_run(&self, run_id: &str, _payload: &RunPayload) -> Option<RunResponse> {
        self.calls.lock().unwrap().push(Call::Update {
            run_id: run_id.to_string(),
        });
        Some(RunResponse {
            uid: self.uid.clone(),
            artifacts: None,
        })
    }

    async fn report_status(&self, run_id: &str, record: &StatusRecord) {
        self.calls.lock().unwrap().push(Call::Report {
            run_id: run_id.to_string(),
            record: record.clone(),
        });
    }

    async fn finish_run(&self, run_id: &str, is_final: bool) {
        self.calls.lock().unwrap().push(Call::Finish {
            run_id: run_id.to_string(),
            is_final,
        });
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn run_config(title: &str, shared: bool) -> RunConfig {
    RunConfig::resolve(&RunSettings {
        title: Some(title.to_string()),
        shared_run: shared,
        ..RunSettings::default()
    })
    .unwrap()
}

fn worker(
    client: &Arc<RecordingClient>,
    dir: &TempDir,
    title: &str,
    shared: bool,
) -> RunCoordinator<Arc<RecordingClient>> {
    let lock = SyncLock::with_dirs(dir.path(), dir.path()).with_jitter_ms(0);
    RunCoordinator::new(Arc::clone(client), run_config(title, shared), lock)
}

fn call_report(error: Option<PhaseError>) -> PhaseReport {
    let mut report = PhaseReport::new(Phase::Call);
    report.title = Some("Add".to_string());
    report.suite_title = Some("test_math.py".to_string());
    report.duration = Some(0.25);
    report.error = error;
    report
}

fn run_id_file_exists(dir: &TempDir) -> bool {
    dir.path().join(RUN_ID_FILE).exists()
}

/// Scenario A: single worker, non-shared run.
#[tokio::test]
async fn test_single_worker_creates_reports_and_finishes_directly() {
    let dir = TempDir::new().unwrap();
    let client = RecordingClient::new("run-a");
    let mut coordinator = worker(&client, &dir, "local run", false);

    let run_id = coordinator.configure().await.unwrap();
    assert_eq!(run_id, "run-a");
    assert_eq!(coordinator.state(), RunState::Created);

    let node = "tests/test_math.py::test_add";
    coordinator.record_status(node, &PhaseReport::new(Phase::Setup));
    coordinator.record_status(node, &call_report(None));
    coordinator.record_status(node, &PhaseReport::new(Phase::Teardown));
    coordinator.flush_node(node).await;

    coordinator.finalize().await;
    assert_eq!(coordinator.state(), RunState::Finished);

    let records = client.reported_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, Some(Status::Passed));

    // Finish happens directly, without a shared-run closing call.
    assert_eq!(client.partial_finishes(), 1);
    assert!(client.final_finishes().is_empty());
    assert!(!run_id_file_exists(&dir));
}

/// Two workers race configure with the same shared title: exactly one
/// creates, both converge on the same run id.
#[tokio::test]
async fn test_exactly_once_creation_across_two_workers() {
    let dir = TempDir::new().unwrap();
    let client = RecordingClient::new("run-7");

    let mut first = worker(&client, &dir, "nightly-1.0", true);
    let mut second = worker(&client, &dir, "nightly-1.0", true);

    let id_first = first.configure().await.unwrap();
    let id_second = second.configure().await.unwrap();

    assert_eq!(client.create_count(), 1);
    assert_eq!(id_first, id_second);
    assert_eq!(first.state(), RunState::Created);
    assert_eq!(second.state(), RunState::Adopted);
}

/// Scenario B: three workers share run "nightly-1.0"; only the last one
/// to unlock closes the run and clears the persisted id.
#[tokio::test]
async fn test_last_of_three_workers_closes_shared_run() {
    let dir = TempDir::new().unwrap();
    let client = RecordingClient::new("run-b");

    let mut workers: Vec<_> = (0..3)
        .map(|_| worker(&client, &dir, "nightly-1.0", true))
        .collect();
    for coordinator in workers.iter_mut() {
        assert_eq!(coordinator.configure().await.as_deref(), Some("run-b"));
    }
    assert_eq!(client.create_count(), 1);
    assert!(run_id_file_exists(&dir));

    workers[0].finalize().await;
    workers[1].finalize().await;
    assert!(client.final_finishes().is_empty());
    assert!(run_id_file_exists(&dir));

    workers[2].finalize().await;
    assert_eq!(client.final_finishes(), vec!["run-b".to_string()]);
    assert_eq!(client.partial_finishes(), 3);
    assert!(!run_id_file_exists(&dir));
}

/// Scenario C: a call-phase failure is flushed with message and stack.
#[tokio::test]
async fn test_call_failure_is_reported_with_detail() {
    let dir = TempDir::new().unwrap();
    let client = RecordingClient::new("run-c");
    let mut coordinator = worker(&client, &dir, "local run", false);
    coordinator.configure().await.unwrap();

    let node = "tests/test_math.py::test_add";
    coordinator.record_status(node, &PhaseReport::new(Phase::Setup));
    coordinator.record_status(
        node,
        &call_report(Some(PhaseError {
            kind: ErrorKind::Failure,
            message: "AssertionError: x != y".to_string(),
            trace: Some("tests/test_math.py:42".to_string()),
        })),
    );
    coordinator.record_status(node, &PhaseReport::new(Phase::Teardown));
    coordinator.flush_node(node).await;

    let records = client.reported_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, Some(Status::Failed));
    assert!(
        records[0]
            .message
            .as_deref()
            .unwrap()
            .contains("AssertionError: x != y")
    );
    assert!(records[0].stack.is_some());
}

/// A record whose status never got determined is not reported.
#[tokio::test]
async fn test_status_less_record_is_discarded() {
    let dir = TempDir::new().unwrap();
    let client = RecordingClient::new("run-d");
    let mut coordinator = worker(&client, &dir, "local run", false);
    coordinator.configure().await.unwrap();

    let node = "tests/test_math.py::test_setup_only";
    coordinator.record_status(node, &PhaseReport::new(Phase::Setup));
    coordinator.flush_node(node).await;

    assert!(client.reported_records().is_empty());
}

/// Artifact URLs attached before the flush travel with the record.
#[tokio::test]
async fn test_artifacts_travel_with_flushed_record() {
    let dir = TempDir::new().unwrap();
    let client = RecordingClient::new("run-e");
    let mut coordinator = worker(&client, &dir, "local run", false);
    coordinator.configure().await.unwrap();

    let node = "tests/test_ui.py::test_screenshot";
    coordinator.record_status(node, &call_report(None));
    coordinator.add_artifacts(node, ["https://cdn/shot.png".to_string()]);
    coordinator.flush_node(node).await;

    let records = client.reported_records();
    assert_eq!(records[0].artifacts, vec!["https://cdn/shot.png".to_string()]);
}

/// Unflushed records still reach the service before the run closes.
#[tokio::test]
async fn test_finalize_flushes_buffered_records() {
    let dir = TempDir::new().unwrap();
    let client = RecordingClient::new("run-f");
    let mut coordinator = worker(&client, &dir, "local run", false);
    coordinator.configure().await.unwrap();

    coordinator.record_status("tests/test_late.py::test_one", &call_report(None));
    coordinator.finalize().await;

    assert_eq!(client.reported_records().len(), 1);
}
