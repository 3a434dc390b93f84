//! Volume Attacher
//!
//! Runs one lifecycle event through the attacher against an in-memory cloud
//! seeded from a JSON world file, and prints the invocation response.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use reattach_reconcile::TokioSleeper;
use reattach_volume_attacher::provider::memory::CloudSeed;
use reattach_volume_attacher::telemetry::{self, LogFormat};
use reattach_volume_attacher::{Config, EventOrchestrator, InMemoryCloud};
use tracing::{error, info};

/// Reattach a slot volume for an instance-launch lifecycle event.
#[derive(Debug, Parser)]
#[command(name = "volume-attacher")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Event payload file. Reads stdin when omitted.
    #[arg(long)]
    event: Option<PathBuf>,

    /// World seed (volumes and instances) for the in-memory cloud.
    #[arg(long, env = "VOLUME_ATTACHER_WORLD")]
    world: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = telemetry::init(cli.log_format) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::from(1);
    }

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %e, "volume-attacher failed");
            let mut source = e.source();
            while let Some(cause) = source {
                error!(cause = %cause, "caused by");
                source = cause.source();
            }
            ExitCode::from(2)
        }
    }
}

/// Returns whether the invocation succeeded at the infrastructure level.
async fn run(cli: Cli) -> Result<bool> {
    let config = Config::from_env()?;
    info!(
        cluster_name = %config.cluster_name,
        volume_type = %config.volume_type,
        max_retry_attempts = config.attach_retry.max_attempts,
        "Configuration loaded"
    );

    let event = read_event(cli.event.as_ref())?;
    let seed = match &cli.world {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read world file {}", path.display()))?;
            serde_json::from_str::<CloudSeed>(&raw)
                .with_context(|| format!("invalid world file {}", path.display()))?
        }
        None => CloudSeed::default(),
    };

    let cloud = Arc::new(InMemoryCloud::from_seed(seed));
    let orchestrator = EventOrchestrator::new(
        &config,
        cloud.clone(),
        cloud.clone(),
        cloud.clone(),
        Arc::new(TokioSleeper),
    );

    match orchestrator.handle(&event).await {
        Ok(response) => {
            println!("{}", serde_json::to_string(&response)?);
            Ok(true)
        }
        Err(e) => {
            error!(reason_code = e.reason_code(), error = %e, "Invocation failed");
            Ok(false)
        }
    }
}

fn read_event(path: Option<&PathBuf>) -> Result<serde_json::Value> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read event file {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read event from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("event is not valid JSON")
}
