//! Configuration loading and run settings.
//!
//! Configuration comes from a TOML file (`runlink.toml`) with environment
//! variables layered on top for the run settings, since CI systems drive
//! those per pipeline:
//!
//! ```toml
//! [run]
//! title = "nightly-1.0"
//! environment = "linux, chrome"
//! shared_run = true
//!
//! [connector]
//! command = "uv run reporter.py"
//! timeout_secs = 120
//!
//! [coordinator]
//! # sync_dir = "/tmp"        # shared run-id file location
//! # marker_dir = "."         # worker marker files
//! ```
//!
//! Recognized environment overrides: `RUNLINK_RUN_ID`, `RUNLINK_TITLE`,
//! `RUNLINK_GROUP_TITLE`, `RUNLINK_ENV`, `RUNLINK_LABEL`,
//! `RUNLINK_SHARED_RUN`, `RUNLINK_PARALLEL`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::client::RunPayload;

/// Errors in the startup configuration. Fatal: these surface immediately
/// and abort the session before any test runs. These are the only failures in this
/// crate allowed to do so.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A shared run's identity across processes is its title; without an
    /// explicit one, processes cannot agree on which run to adopt.
    #[error("a shared run requires an explicit run title")]
    SharedRunWithoutTitle,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Run identity and tagging settings.
    #[serde(default)]
    pub run: RunSettings,

    /// External reporter command settings.
    #[serde(default)]
    pub connector: ConnectorSettings,

    /// Cross-process coordination settings.
    #[serde(default)]
    pub coordinator: CoordinatorSettings,
}

/// Raw run settings as configured; resolved into a [`RunConfig`] at
/// startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunSettings {
    /// Adopt an existing remote run instead of creating one.
    pub run_id: Option<String>,

    /// Run title. Required for shared runs; otherwise a timestamped
    /// default is generated.
    pub title: Option<String>,

    /// Group title to file the run under.
    pub group_title: Option<String>,

    /// Comma-separated environment tags, e.g. `"linux, chrome"`.
    pub environment: Option<String>,

    /// Comma-separated label tags.
    pub label: Option<String>,

    /// Whether this run executes tests in parallel.
    #[serde(default)]
    pub parallel: bool,

    /// Whether several independently-launched processes share this run.
    #[serde(default)]
    pub shared_run: bool,
}

impl RunSettings {
    /// Layers overrides from a lookup function (environment variables in
    /// production) on top of the file values.
    pub fn apply_overrides<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = get("RUNLINK_RUN_ID") {
            self.run_id = Some(value);
        }
        if let Some(value) = get("RUNLINK_TITLE") {
            self.title = Some(value);
        }
        if let Some(value) = get("RUNLINK_GROUP_TITLE") {
            self.group_title = Some(value);
        }
        if let Some(value) = get("RUNLINK_ENV") {
            self.environment = Some(value);
        }
        if let Some(value) = get("RUNLINK_LABEL") {
            self.label = Some(value);
        }
        if let Some(value) = get("RUNLINK_SHARED_RUN") {
            self.shared_run = truthy(&value);
        }
        if let Some(value) = get("RUNLINK_PARALLEL") {
            self.parallel = truthy(&value);
        }
    }

    /// Applies process environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok().filter(|v| !v.is_empty()));
    }
}

fn truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// External reporter command settings; see [`crate::client::CommandReporter`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectorSettings {
    /// The reporter command line, split respecting quotes.
    pub command: Option<String>,

    /// Working directory for the command.
    pub working_dir: Option<PathBuf>,

    /// Timeout in seconds for one reporter invocation.
    #[serde(default = "default_connector_timeout")]
    pub timeout_secs: u64,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            command: None,
            working_dir: None,
            timeout_secs: default_connector_timeout(),
        }
    }
}

fn default_connector_timeout() -> u64 {
    300
}

/// Cross-process coordination settings; see [`crate::sync::SyncLock`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CoordinatorSettings {
    /// Directory of the shared run-id file. Default: the OS temp
    /// directory, so sibling processes on the same machine find it.
    pub sync_dir: Option<PathBuf>,

    /// Directory of the worker marker files. Default: the working
    /// directory.
    pub marker_dir: Option<PathBuf>,

    /// Cap for the random pre-lock jitter in milliseconds.
    pub jitter_ms: Option<u64>,
}

/// Resolved, validated run configuration threaded through the coordinator.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_id: Option<String>,
    pub title: String,
    pub group_title: Option<String>,
    /// Normalized comma-joined environment tags.
    pub environment: Option<String>,
    /// Normalized comma-joined label tags.
    pub label: Option<String>,
    pub parallel: bool,
    pub shared_run: bool,
}

impl RunConfig {
    /// Validates and resolves raw settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::SharedRunWithoutTitle`] when a shared run is
    /// requested without an explicit title.
    pub fn resolve(settings: &RunSettings) -> std::result::Result<Self, ConfigError> {
        if settings.shared_run && settings.title.is_none() {
            return Err(ConfigError::SharedRunWithoutTitle);
        }

        let title = settings.title.clone().unwrap_or_else(|| {
            format!(
                "test run at {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
            )
        });

        Ok(Self {
            run_id: settings.run_id.clone(),
            title,
            group_title: settings.group_title.clone(),
            environment: settings.environment.as_deref().and_then(safe_string_list),
            label: settings.label.as_deref().and_then(safe_string_list),
            parallel: settings.parallel,
            shared_run: settings.shared_run,
        })
    }

    /// The payload sent on create/update calls. A shared run is a parallel
    /// run in principle, so `parallel` is forced on.
    pub fn to_payload(&self) -> RunPayload {
        RunPayload {
            id: self.run_id.clone(),
            title: self.title.clone(),
            group_title: self.group_title.clone(),
            env: self.environment.clone(),
            label: self.label.clone(),
            parallel: self.parallel || self.shared_run,
            shared_run: self.shared_run,
        }
    }

    /// Environment tags as a list, in configured order.
    pub fn environments(&self) -> Vec<String> {
        self.environment
            .as_deref()
            .map(|env| env.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// Normalizes a comma-separated tag list: whitespace is stripped inside
/// each part and the parts re-joined with commas. Empty input is `None`.
pub fn safe_string_list(param: &str) -> Option<String> {
    if param.is_empty() {
        return None;
    }
    let whitespace = Regex::new(r"\s").unwrap();
    let joined = param
        .split(',')
        .map(|part| whitespace.replace_all(part, "").into_owned())
        .collect::<Vec<_>>()
        .join(",");
    Some(joined)
}

/// Loads configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains invalid TOML.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads configuration from a TOML string. Useful for testing and for
/// generating configuration programmatically.
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
