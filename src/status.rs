//! Per-test status accumulation across lifecycle phases.
//!
//! A single test's full result (pass/fail/skip, timing, example values,
//! failure detail) is only knowable after all three of its phases
//! (`setup`, `call`, `teardown`) have run, but the host framework delivers
//! that information as three separate callback invocations. This module
//! folds those partial phase reports into one [`StatusRecord`] per test
//! node id, which the coordinator flushes to the remote service once the
//! test is fully finished.
//!
//! Pure merge logic, no I/O.
//!
//! # Merge rules
//!
//! - `setup` and `call` reports assign every non-`None` field they carry
//!   (a later report wins).
//! - `teardown` only fills fields that are still `None`: it never changes
//!   `status`, and it never overrides an already-set `title`. When both
//!   call and teardown fail, call's message wins: call is processed first
//!   and teardown cannot overwrite.
//! - `status` is derived per phase: a setup error yields `skipped` or
//!   `failed` (setup success alone decides nothing); `call` yields
//!   `passed` or `failed`; `teardown` never decides.

use std::collections::HashMap;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::{ParamValue, safe_params};

/// Lifecycle phase of a single test execution, delivered in
/// `setup → call → teardown` order by the host framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Call,
    Teardown,
}

/// Reportable outcome of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Skipped,
}

/// How a phase error should be classified.
///
/// Distinguishing "skipped" from "failed" requires recognizing a
/// framework-specific exception category, so the recognition happens in the
/// adapter layer; this core only sees the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Failure,
    Skip,
}

/// An exception raised during one phase.
#[derive(Debug, Clone)]
pub struct PhaseError {
    pub kind: ErrorKind,
    pub message: String,
    pub trace: Option<String>,
}

/// A partial report emitted by the host framework for one phase of one
/// test invocation.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: Phase,
    /// Execution title for this concrete invocation.
    pub title: Option<String>,
    /// Suite title, typically the source file name.
    pub suite_title: Option<String>,
    /// Remote test id (tag code without the `@T` prefix), if synchronized.
    pub test_id: Option<String>,
    /// Wall-clock duration of this phase in seconds.
    pub duration: Option<f64>,
    /// Exception raised during this phase, already classified.
    pub error: Option<PhaseError>,
    /// Concrete parameter mapping for this invocation.
    pub params: Option<BTreeMap<String, ParamValue>>,
    /// Artifact URLs attached so far.
    pub artifacts: Vec<String>,
    /// Source code of the test, when the adapter collects it.
    pub code: Option<String>,
    /// Whether the remote side should overwrite stored source this report.
    pub overwrite: Option<bool>,
}

impl PhaseReport {
    /// A bare report for the given phase with every field unset.
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            title: None,
            suite_title: None,
            test_id: None,
            duration: None,
            error: None,
            params: None,
            artifacts: Vec::new(),
            code: None,
            overwrite: None,
        }
    }
}

/// One test's accumulated, reportable outcome.
///
/// Serializes to the remote status payload; `None` fields are omitted
/// entirely, matching what the reporting endpoint expects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
}

impl StatusRecord {
    /// Derives the partial record one phase report contributes.
    fn from_phase(report: &PhaseReport) -> Self {
        let mut record = StatusRecord {
            title: report.title.clone(),
            suite_title: report.suite_title.clone(),
            test_id: report.test_id.clone(),
            run_time: report.duration,
            artifacts: report.artifacts.clone(),
            code: report.code.clone(),
            overwrite: report.overwrite,
            ..StatusRecord::default()
        };

        match report.phase {
            Phase::Setup => {
                if let Some(error) = &report.error {
                    match error.kind {
                        // A skip carries no failure detail.
                        ErrorKind::Skip => record.status = Some(Status::Skipped),
                        ErrorKind::Failure => {
                            record.status = Some(Status::Failed);
                            record.message = Some(error.message.clone());
                            record.stack = error.trace.clone();
                        }
                    }
                }
                // Setup success alone does not determine the outcome.
            }
            Phase::Call => {
                match &report.error {
                    Some(error) => {
                        record.status = Some(Status::Failed);
                        record.message = Some(error.message.clone());
                        record.stack = error.trace.clone();
                    }
                    None => record.status = Some(Status::Passed),
                }
                if let Some(params) = &report.params {
                    record.example = Some(safe_params(params));
                }
            }
            Phase::Teardown => {
                // Teardown never decides the status; it may still attach
                // failure detail if teardown itself raised.
                if let Some(error) = &report.error {
                    if error.kind == ErrorKind::Failure {
                        record.message = Some(error.message.clone());
                        record.stack = error.trace.clone();
                    }
                }
            }
        }

        record
    }

    fn merge(&mut self, incoming: StatusRecord, phase: Phase) {
        let overwrite = phase != Phase::Teardown;

        if phase != Phase::Teardown {
            assign(&mut self.title, incoming.title, true);
            assign(&mut self.status, incoming.status, true);
        } else {
            // Frozen after the first setup/call write; teardown may only
            // supply a title no earlier phase did.
            assign(&mut self.title, incoming.title, false);
        }

        assign(&mut self.suite_title, incoming.suite_title, overwrite);
        assign(&mut self.test_id, incoming.test_id, overwrite);
        assign(&mut self.message, incoming.message, overwrite);
        assign(&mut self.stack, incoming.stack, overwrite);
        assign(&mut self.run_time, incoming.run_time, overwrite);
        assign(&mut self.example, incoming.example, overwrite);
        assign(&mut self.code, incoming.code, overwrite);
        assign(&mut self.overwrite, incoming.overwrite, overwrite);

        if !incoming.artifacts.is_empty() && (overwrite || self.artifacts.is_empty()) {
            self.artifacts = incoming.artifacts;
        }
    }
}

fn assign<T>(slot: &mut Option<T>, value: Option<T>, overwrite: bool) {
    if value.is_some() && (overwrite || slot.is_none()) {
        *slot = value;
    }
}

/// Folds phase reports into one [`StatusRecord`] per test node id.
///
/// State per node id goes `absent → partial → finalized`; the coordinator
/// takes a record out at the per-test finish boundary, so the map never
/// holds more than the currently-running tests.
#[derive(Debug, Default)]
pub struct StatusAccumulator {
    records: HashMap<String, StatusRecord>,
}

impl StatusAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one phase report into the record for `node_id`.
    pub fn record(&mut self, node_id: &str, report: &PhaseReport) {
        let incoming = StatusRecord::from_phase(report);
        match self.records.get_mut(node_id) {
            Some(existing) => existing.merge(incoming, report.phase),
            None => {
                self.records.insert(node_id.to_string(), incoming);
            }
        }
    }

    /// Appends artifact URLs to the record for `node_id`, creating an
    /// otherwise-empty record if none exists yet.
    pub fn add_artifacts<I>(&mut self, node_id: &str, urls: I)
    where
        I: IntoIterator<Item = String>,
    {
        let record = self.records.entry(node_id.to_string()).or_default();
        record.artifacts.extend(urls);
    }

    /// Removes and returns the accumulated record for `node_id`.
    pub fn take(&mut self, node_id: &str) -> Option<StatusRecord> {
        self.records.remove(node_id)
    }

    /// Removes and returns everything still buffered.
    pub fn drain(&mut self) -> Vec<(String, StatusRecord)> {
        self.records.drain().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Read-only view of the record for `node_id`, if any.
    pub fn get(&self, node_id: &str) -> Option<&StatusRecord> {
        self.records.get(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: &str = "tests/test_math.py::test_add";

    fn setup_ok() -> PhaseReport {
        let mut report = PhaseReport::new(Phase::Setup);
        report.title = Some("Add".to_string());
        report.suite_title = Some("test_math.py".to_string());
        report.duration = Some(0.01);
        report
    }

    fn call_passed() -> PhaseReport {
        let mut report = PhaseReport::new(Phase::Call);
        report.title = Some("Add".to_string());
        report.duration = Some(0.25);
        report
    }

    fn call_failed(message: &str) -> PhaseReport {
        let mut report = call_passed();
        report.error = Some(PhaseError {
            kind: ErrorKind::Failure,
            message: message.to_string(),
            trace: Some("traceback".to_string()),
        });
        report
    }

    fn teardown_ok() -> PhaseReport {
        let mut report = PhaseReport::new(Phase::Teardown);
        report.title = Some("Stale title".to_string());
        report.duration = Some(0.02);
        report
    }

    #[test]
    fn test_setup_success_leaves_status_undetermined() {
        let mut acc = StatusAccumulator::new();
        acc.record(NODE, &setup_ok());
        assert_eq!(acc.get(NODE).unwrap().status, None);
    }

    #[test]
    fn test_setup_skip_yields_skipped_without_message() {
        let mut report = PhaseReport::new(Phase::Setup);
        report.error = Some(PhaseError {
            kind: ErrorKind::Skip,
            message: "skipped by condition".to_string(),
            trace: None,
        });

        let mut acc = StatusAccumulator::new();
        acc.record(NODE, &report);

        let record = acc.get(NODE).unwrap();
        assert_eq!(record.status, Some(Status::Skipped));
        assert_eq!(record.message, None);
    }

    #[test]
    fn test_call_pass_then_teardown_keeps_call_duration() {
        let mut acc = StatusAccumulator::new();
        acc.record(NODE, &setup_ok());
        acc.record(NODE, &call_passed());
        acc.record(NODE, &teardown_ok());

        let record = acc.get(NODE).unwrap();
        assert_eq!(record.status, Some(Status::Passed));
        assert_eq!(record.run_time, Some(0.25));
        assert_eq!(record.title.as_deref(), Some("Add"));
    }

    #[test]
    fn test_call_failure_survives_clean_teardown() {
        let mut acc = StatusAccumulator::new();
        acc.record(NODE, &setup_ok());
        acc.record(NODE, &call_failed("AssertionError: x != y"));
        acc.record(NODE, &teardown_ok());

        let record = acc.get(NODE).unwrap();
        assert_eq!(record.status, Some(Status::Failed));
        assert!(record.message.as_deref().unwrap().contains("x != y"));
        assert!(record.stack.is_some());
    }

    #[test]
    fn test_teardown_merge_is_idempotent() {
        let mut teardown = teardown_ok();
        teardown.error = Some(PhaseError {
            kind: ErrorKind::Failure,
            message: "teardown blew up".to_string(),
            trace: None,
        });

        let mut acc = StatusAccumulator::new();
        acc.record(NODE, &setup_ok());
        acc.record(NODE, &call_passed());
        acc.record(NODE, &teardown);
        let once = acc.get(NODE).unwrap().clone();

        acc.record(NODE, &teardown);
        let twice = acc.get(NODE).unwrap().clone();

        assert_eq!(once.status, twice.status);
        assert_eq!(once.title, twice.title);
        assert_eq!(once.message, twice.message);
        assert_eq!(once.run_time, twice.run_time);
    }

    #[test]
    fn test_teardown_failure_fills_message_when_call_passed() {
        let mut teardown = teardown_ok();
        teardown.error = Some(PhaseError {
            kind: ErrorKind::Failure,
            message: "socket leak".to_string(),
            trace: None,
        });

        let mut acc = StatusAccumulator::new();
        acc.record(NODE, &call_passed());
        acc.record(NODE, &teardown);

        let record = acc.get(NODE).unwrap();
        assert_eq!(record.status, Some(Status::Passed));
        assert_eq!(record.message.as_deref(), Some("socket leak"));
        assert_eq!(record.title.as_deref(), Some("Add"));
    }

    #[test]
    fn test_call_message_wins_over_teardown_message() {
        let mut teardown = teardown_ok();
        teardown.error = Some(PhaseError {
            kind: ErrorKind::Failure,
            message: "teardown raised too".to_string(),
            trace: None,
        });

        let mut acc = StatusAccumulator::new();
        acc.record(NODE, &call_failed("AssertionError: x != y"));
        acc.record(NODE, &teardown);

        let record = acc.get(NODE).unwrap();
        assert_eq!(record.message.as_deref(), Some("AssertionError: x != y"));
    }

    #[test]
    fn test_call_attaches_example_params() {
        use crate::identity::ParamValue;

        let mut report = call_passed();
        let mut params = BTreeMap::new();
        params.insert("a".to_string(), ParamValue::Int(2));
        params.insert("b".to_string(), ParamValue::Str("x y".to_string()));
        report.params = Some(params);

        let mut acc = StatusAccumulator::new();
        acc.record(NODE, &report);

        let example = acc.get(NODE).unwrap().example.clone().unwrap();
        assert_eq!(example.get("a").map(String::as_str), Some("2"));
        assert_eq!(example.get("b").map(String::as_str), Some("x y"));
    }

    #[test]
    fn test_take_removes_record() {
        let mut acc = StatusAccumulator::new();
        acc.record(NODE, &call_passed());
        assert!(acc.take(NODE).is_some());
        assert!(acc.take(NODE).is_none());
        assert!(acc.is_empty());
    }

    #[test]
    fn test_artifacts_accumulate() {
        let mut acc = StatusAccumulator::new();
        acc.record(NODE, &call_passed());
        acc.add_artifacts(NODE, ["https://cdn/one.png".to_string()]);
        acc.add_artifacts(NODE, ["https://cdn/two.png".to_string()]);

        assert_eq!(acc.get(NODE).unwrap().artifacts.len(), 2);
    }

    #[test]
    fn test_record_serializes_without_none_fields() {
        let record = StatusRecord {
            status: Some(Status::Passed),
            title: Some("Add".to_string()),
            run_time: Some(0.1),
            ..StatusRecord::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "passed");
        assert!(json.get("message").is_none());
        assert!(json.get("artifacts").is_none());
    }
}
