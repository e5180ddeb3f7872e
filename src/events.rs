//! Host-framework lifecycle events.
//!
//! The coordinator core never inspects host-framework objects. Instead the
//! host side (a pytest plugin, a custom harness, anything with equivalent
//! hooks) emits a stream of JSON events, one per line, and this module
//! turns them into the core's value types:
//!
//! ```json
//! {"event": "phase", "node_id": "tests/test_math.py::test_add[2-3]",
//!  "phase": "call", "raw_name": "test_add[2-3]", "parametrize": ["a,b"],
//!  "params": {"a": 2, "b": 3}, "suite": "test_math.py", "duration": 0.25}
//! {"event": "test_finished", "node_id": "tests/test_math.py::test_add[2-3]"}
//! {"event": "session_finish"}
//! ```
//!
//! Whether a phase error counts as a skip is decided by the emitter (the
//! `skipped` flag), because recognizing a skip requires knowing the host
//! framework's exception categories, which is exactly the knowledge this
//! core keeps out.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::identity::{ParamValue, TestIdentity};
use crate::status::{ErrorKind, Phase, PhaseError, PhaseReport};

/// One lifecycle event from the host framework.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A setup/call/teardown report for one test invocation.
    Phase(PhaseEvent),

    /// All phases of the test are done; its record can be flushed.
    TestFinished { node_id: String },

    /// Artifact URLs uploaded for a test.
    Artifacts { node_id: String, urls: Vec<String> },

    /// The worker process is tearing down.
    SessionFinish,
}

/// An exception raised during a phase, as the host framework saw it.
#[derive(Debug, Clone, Deserialize)]
pub struct EventError {
    pub message: String,
    #[serde(default)]
    pub trace: Option<String>,
    /// True when the host framework classified this as a skip rather than
    /// a failure.
    #[serde(default)]
    pub skipped: bool,
}

/// One phase report for one concrete test invocation.
#[derive(Debug, Deserialize)]
pub struct PhaseEvent {
    /// Process-local unique id of this invocation, the accumulation key.
    pub node_id: String,
    pub phase: Phase,
    /// Test name as the host framework reports it, parameter suffix
    /// included.
    pub raw_name: String,
    /// Identity tag embedded in source, if previously synchronized.
    #[serde(default)]
    pub tag: Option<String>,
    /// Argument strings of parametrize-style markers, in declaration
    /// order.
    #[serde(default)]
    pub parametrize: Vec<String>,
    /// Resolved concrete parameter mapping for this invocation.
    #[serde(default)]
    pub params: Option<serde_json::Map<String, Value>>,
    /// Suite title, typically the source file name.
    #[serde(default)]
    pub suite: Option<String>,
    /// Wall-clock duration of this phase in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub error: Option<EventError>,
    /// Source code of the test, when the host collects it.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl PhaseEvent {
    /// The identity this event describes, built once per invocation.
    pub fn identity(&self) -> TestIdentity {
        let mut identity = TestIdentity::new(&self.raw_name);
        if let Some(tag) = &self.tag {
            identity = identity.with_tag(tag);
        }
        for arg_string in &self.parametrize {
            identity.add_parametrize_args(arg_string);
        }
        if let Some(params) = &self.params {
            identity.add_call_param_names(params.keys());
        }
        identity
    }

    fn param_values(&self) -> Option<BTreeMap<String, ParamValue>> {
        self.params.as_ref().map(|params| {
            params
                .iter()
                .map(|(key, value)| (key.clone(), ParamValue::from(value)))
                .collect()
        })
    }

    /// Converts this event into the core's phase report.
    pub fn to_report(&self) -> PhaseReport {
        let identity = self.identity();
        let params = self.param_values();

        let mut report = PhaseReport::new(self.phase);
        report.title = Some(identity.exec_title(params.as_ref()));
        report.suite_title = self.suite.clone();
        report.test_id = identity.tag_code().map(str::to_string);
        report.duration = self.duration;
        report.params = params;
        report.artifacts = self.artifacts.clone();
        report.code = self.code.clone();
        report.overwrite = self.overwrite;
        report.error = self.error.as_ref().map(|error| PhaseError {
            kind: if error.skipped {
                ErrorKind::Skip
            } else {
                ErrorKind::Failure
            },
            message: error.message.clone(),
            trace: error.trace.clone(),
        });
        report
    }
}
