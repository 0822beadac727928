//! Command-line interface definitions and command execution.
//!
//! An operator tool for poking at the bus: verify connectivity, publish test
//! events, and inspect health, lag and dead-letter contents.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use botbus::bus::EventBus;
use botbus::config::Config;
use botbus::envelope::Priority;
use botbus::stream_name::StreamName;

/// Botbus - message bus operations for the trading platform.
#[derive(Parser, Debug)]
#[command(name = "botbus")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "botbus.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check connectivity to the log store
    Ping,

    /// Publish one event to a stream
    Publish(PublishArgs),

    /// Show health for one stream, or the whole system
    Health(HealthArgs),

    /// Show dead-letter statistics for a stream
    Dlq(StreamArg),

    /// Show consumer-group lag for a stream
    Lag(LagArgs),
}

#[derive(Parser, Debug)]
pub struct PublishArgs {
    /// Target stream (service:direction:purpose)
    pub stream: String,

    /// Event type tag, e.g. START_BOT
    pub event_type: String,

    /// Event payload as a JSON object
    #[arg(default_value = "{}")]
    pub data: String,

    /// Priority tier: critical, high, normal, low
    #[arg(short, long, default_value = "normal")]
    pub priority: String,
}

#[derive(Parser, Debug)]
pub struct HealthArgs {
    /// Stream to inspect; omit for system-wide health
    pub stream: Option<String>,
}

#[derive(Parser, Debug)]
pub struct StreamArg {
    pub stream: String,
}

#[derive(Parser, Debug)]
pub struct LagArgs {
    pub stream: String,
    pub group: String,
}

/// Load config (falling back to defaults when the file is absent) and run
/// one command against a freshly connected bus.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = if cli.config.exists() {
        Config::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        Config::default()
    };
    config.init_logging();
    let bus = EventBus::connect(config).await?;

    match cli.command {
        Commands::Ping => {
            bus.ping().await?;
            println!("PONG");
        }
        Commands::Publish(args) => {
            let stream = StreamName::parse(args.stream)?;
            let priority = Priority::parse(&args.priority)?;
            let data: Map<String, Value> =
                serde_json::from_str(&args.data).context("payload must be a JSON object")?;
            let id = bus.publish(&stream, data, &args.event_type, priority).await?;
            println!("published {id}");
        }
        Commands::Health(args) => {
            let health = bus.health();
            match args.stream {
                Some(raw) => {
                    let stream = StreamName::parse(raw)?;
                    let report = health.stream_health(&stream).await?;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                None => {
                    let report = health.system_health().await?;
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
        }
        Commands::Dlq(args) => {
            let stream = StreamName::parse(args.stream)?;
            let stats = bus.dead_letter().dlq_stats(&stream).await?;
            println!("total_messages: {}", stats.total_messages);
            let mut reasons: Vec<_> = stats.error_types.iter().collect();
            reasons.sort();
            for (reason, count) in reasons {
                println!("  {reason}: {count}");
            }
            println!("last_updated: {}", stats.last_updated.to_rfc3339());
        }
        Commands::Lag(args) => {
            let stream = StreamName::parse(args.stream)?;
            match bus.group_manager().group_lag(stream.as_str(), &args.group).await? {
                Some(lag) => println!("{lag}"),
                None => println!("stream or group not found"),
            }
        }
    }

    bus.shutdown().await;
    Ok(())
}
