//! CLI module for Sirenbus
//!
//! Every command prints one JSON document on stdout; logs go to stderr.

use crate::server::{self, config::AppConfig, Runtime};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use sirenbus_core::StartRequest;

pub mod playlist;
pub mod worker;

/// Siren bus broadcast controller
#[derive(Parser, Debug)]
#[command(name = "sirenbus")]
#[command(about = "Broadcast controller for a shared siren bus")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a broadcast (or join the running one)
    Start {
        /// Requesting source, resolved to a priority class
        #[arg(long, default_value = "manual")]
        source: String,
        /// Route (comma separated)
        #[arg(long, value_delimiter = ',')]
        route: Vec<String>,
        /// Zones (comma separated)
        #[arg(long, value_delimiter = ',')]
        zones: Vec<String>,
        /// Extra options as a JSON object
        #[arg(long)]
        options: Option<String>,
    },
    /// Stop the running broadcast
    Stop {
        #[arg(long, default_value = "operator_request")]
        reason: String,
    },
    /// Pause the transmission hardware through the control worker
    Pause {
        #[arg(long)]
        reason: Option<String>,
    },
    /// Resume the transmission hardware through the control worker
    Resume {
        #[arg(long)]
        reason: Option<String>,
    },
    /// Running session and device status
    Status,
    /// Recent telemetry, newest first
    Telemetry {
        /// Only entries at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    /// Live bus queue
    Queue,
    /// Send a raw JSON request to the control worker
    Control {
        /// Request object, e.g. '{"command":"status_modbus"}'
        request: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Playlist management
    Playlist {
        #[command(subcommand)]
        command: playlist::PlaylistCommand,
    },
    /// Run the reference control worker
    Worker {
        /// Socket path; defaults to transport.endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    if let Commands::Worker { endpoint } = command {
        let endpoint = endpoint.unwrap_or_else(|| config.transport.endpoint.clone());
        return worker::run(&endpoint).await;
    }

    let runtime = server::init(&config).await?;
    execute(command, &runtime).await
}

async fn execute(command: Commands, runtime: &Runtime) -> Result<()> {
    let orchestrator = &runtime.orchestrator;

    match command {
        Commands::Start {
            source,
            route,
            zones,
            options,
        } => {
            let options = match options {
                Some(raw) => parse_object(&raw).context("Invalid --options")?,
                None => json!({}),
            };
            let request = StartRequest::new(source)
                .with_route(route)
                .with_zones(zones)
                .with_options(options);
            emit(orchestrator.start(request).await)
        }
        Commands::Stop { reason } => emit(orchestrator.stop(&reason).await),
        Commands::Pause { reason } => emit(orchestrator.pause(reason.as_deref()).await),
        Commands::Resume { reason } => emit(orchestrator.resume(reason.as_deref()).await),
        Commands::Status => emit(orchestrator.status().await),
        Commands::Telemetry { since } => emit(orchestrator.telemetry(since).await),
        Commands::Queue => {
            let queue = runtime.arbiter.snapshot().await?;
            print_json(&queue)
        }
        Commands::Control { request, reason } => {
            let request = parse_object(&request).context("Invalid control request")?;
            let channel = orchestrator
                .control_channel()
                .ok_or_else(|| anyhow!("control channel not configured"))?;
            emit(channel.send_raw(request, reason.as_deref()).await)
        }
        Commands::Playlist { command } => playlist::run(command, runtime).await,
        Commands::Worker { .. } => Err(anyhow!("worker runs without the broadcast runtime")),
    }
}

fn parse_object(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        return Err(anyhow!("expected a JSON object"));
    }
    Ok(value)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the result, or the error with its domain status, as JSON
pub(crate) fn emit<T: Serialize>(result: sirenbus_core::Result<T>) -> Result<()> {
    match result {
        Ok(value) => print_json(&value),
        Err(e) => {
            print_json(&json!({"status": e.status(), "error": e.to_string()}))?;
            Err(anyhow!(e))
        }
    }
}
