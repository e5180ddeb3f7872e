//! runlink: a test-run lifecycle coordinator.
//!
//! This crate is the core of a test-framework plugin that syncs local test
//! identity with a remote test-management service and reports execution
//! results into a remote "run", including when tests execute under a
//! multi-worker (sharded/parallel) runner, where many independent worker
//! processes must agree on one run id, report into it without
//! double-creating or double-finishing it, and hand cleanup to exactly one
//! last worker, using only the filesystem as the coordination medium.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Identity** ([`identity`]): stable title resolution for plain,
//!   parameterized and data-driven tests
//! - **Status** ([`status`]): merges setup/call/teardown phase reports
//!   into one record per test
//! - **Sync** ([`sync`]): filesystem marker files and the shared run-id
//!   file
//! - **Coordinator** ([`coordinator`]): run creation-or-adoption, status
//!   flushing, locked exactly-once finalization
//! - **Client** ([`client`]): boundary to the remote reporting service
//!
//! # Example
//!
//! ```no_run
//! use runlink::client::CommandReporter;
//! use runlink::config::{RunConfig, RunSettings};
//! use runlink::coordinator::RunCoordinator;
//! use runlink::sync::SyncLock;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = RunSettings {
//!         title: Some("nightly-1.0".to_string()),
//!         shared_run: true,
//!         ..RunSettings::default()
//!     };
//!     let config = RunConfig::resolve(&settings)?;
//!     let client = CommandReporter::new("uv run reporter.py");
//!
//!     let mut coordinator = RunCoordinator::new(client, config, SyncLock::new());
//!     coordinator.configure().await;
//!     // ... record_status / flush_node per test ...
//!     coordinator.finalize().await;
//!     Ok(())
//! }
//! ```

pub mod artifacts;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod identity;
pub mod status;
pub mod sync;

// Re-export commonly used types
pub use client::{CommandReporter, NullReporter, ReportingClient};
pub use config::{Config, RunConfig, load_config};
pub use coordinator::{RunCoordinator, RunState};
pub use identity::TestIdentity;
pub use status::{Phase, PhaseReport, Status, StatusRecord};
pub use sync::SyncLock;
