//! runlink CLI - report test lifecycle events into a remote run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use runlink::client::CommandReporter;
use runlink::config::{self, Config, RunConfig};
use runlink::coordinator::RunCoordinator;
use runlink::events::LifecycleEvent;
use runlink::sync::SyncLock;

#[derive(Parser)]
#[command(name = "runlink")]
#[command(about = "Test run lifecycle coordinator and reporter", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "runlink.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read lifecycle events from stdin and report them into a run
    Report {
        /// Override the reporter connector command
        #[arg(long)]
        connector: Option<String>,

        /// Override the run title
        #[arg(long)]
        title: Option<String>,

        /// Participate in a shared run
        #[arg(long)]
        shared_run: bool,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Report {
            connector,
            title,
            shared_run,
        } => report(&cli.config, connector, title, shared_run).await,
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(),
    }
}

fn load_or_default(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        config::load_config(config_path)
    } else {
        Ok(Config::default())
    }
}

async fn report(
    config_path: &Path,
    connector_override: Option<String>,
    title_override: Option<String>,
    shared_run: bool,
) -> Result<()> {
    let mut config = load_or_default(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    config.run.apply_env();
    if let Some(title) = title_override {
        config.run.title = Some(title);
    }
    if shared_run {
        config.run.shared_run = true;
    }
    if let Some(command) = connector_override {
        config.connector.command = Some(command);
    }

    let Some(command) = config.connector.command.clone() else {
        bail!("No connector command configured; set [connector] command or pass --connector");
    };

    // Startup configuration problems are the only errors allowed to abort.
    let run_config = RunConfig::resolve(&config.run)?;

    let mut client = CommandReporter::new(command).with_timeout(config.connector.timeout_secs);
    if let Some(dir) = config.connector.working_dir.clone() {
        client = client.with_working_dir(dir);
    }

    let mut lock = SyncLock::with_dirs(
        config
            .coordinator
            .marker_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".")),
        config
            .coordinator
            .sync_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir),
    );
    if let Some(jitter) = config.coordinator.jitter_ms {
        lock = lock.with_jitter_ms(jitter);
    }

    let mut coordinator = RunCoordinator::new(client, run_config, lock);
    match coordinator.configure().await {
        Some(run_id) => info!("Reporting into run {}", run_id),
        None => warn!("No run available; events will be consumed without reporting"),
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let event: LifecycleEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(err) => {
                warn!("Skipping malformed event: {}", err);
                continue;
            }
        };
        match event {
            LifecycleEvent::Phase(phase) => {
                let report = phase.to_report();
                coordinator.record_status(&phase.node_id, &report);
            }
            LifecycleEvent::TestFinished { node_id } => {
                coordinator.flush_node(&node_id).await;
            }
            LifecycleEvent::Artifacts { node_id, urls } => {
                coordinator.add_artifacts(&node_id, urls);
            }
            LifecycleEvent::SessionFinish => break,
        }
    }

    coordinator.finalize().await;
    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            let run_config = RunConfig::resolve(&config.run)?;

            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Title: {}", run_config.title);
            println!("  Shared run: {}", run_config.shared_run);
            println!(
                "  Environments: {}",
                run_config.environment.as_deref().unwrap_or("-")
            );
            println!(
                "  Connector: {}",
                config.connector.command.as_deref().unwrap_or("-")
            );

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_config() -> Result<()> {
    let config = r#"# runlink configuration file

[run]
# title = "nightly-1.0"
# environment = "linux, chrome"
# label = "smoke"
# shared_run = true

[connector]
# The external reporter command; payloads arrive on its stdin as JSON.
command = "uv run reporter.py"
timeout_secs = 300

[coordinator]
# sync_dir = "/tmp"
# marker_dir = "."
"#;

    let path = PathBuf::from("runlink.toml");
    if path.exists() {
        eprintln!("runlink.toml already exists. Remove it first or edit manually.");
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created runlink.toml");
    println!();
    println!("Edit the configuration as needed, then pipe lifecycle events to:");
    println!("  runlink report");

    Ok(())
}
