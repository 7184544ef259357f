//! Dingo: background task scheduler and document store.
//!
//! Main binary with subcommands:
//! - `run`: the daemon (scheduler, built-in jobs, optional `/health`)
//! - `health`: probe the document store once
//! - `get` / `set` / `delete`: operator access to stored documents

use clap::{Parser, Subcommand};
use dingo_scheduler::{Cadence, SchedulerConfig};
use dingo_store::StoreConfig;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod daemon;
mod health;
mod jobs;

#[derive(Parser)]
#[command(name = "dingo")]
#[command(about = "Background task scheduler and document store", long_about = None)]
struct Cli {
    /// Store location: sqlite:///path.db (stored as path.json), file:///path.json,
    /// a bare path, or memory://
    #[arg(
        long,
        global = true,
        env = "DINGO_DATABASE_URL",
        default_value = "sqlite:///./data/dingo.db"
    )]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon until interrupted
    Run {
        /// Timezone for daily and hourly jobs
        #[arg(long, env = "DINGO_SCHEDULER_TIMEZONE", default_value = "UTC")]
        timezone: String,

        /// Scheduler poll interval in seconds
        #[arg(long, env = "DINGO_POLL_INTERVAL", default_value = "10")]
        poll_interval: u64,

        /// Per-execution task timeout in seconds (none by default)
        #[arg(long, env = "DINGO_TASK_TIMEOUT")]
        task_timeout: Option<u64>,

        /// Measure recurring intervals from completion instead of dispatch
        #[arg(long)]
        fixed_delay: bool,

        /// Port for the /health endpoint (disabled if unset)
        #[arg(long, env = "DINGO_HEALTH_PORT")]
        health_port: Option<u16>,

        /// Refuse to start if the existing store file cannot be loaded
        #[arg(long)]
        strict_load: bool,
    },

    /// Check that the document store can be written and read
    Health,

    /// Print a document, or a whole collection
    Get {
        collection: String,
        key: Option<String>,
    },

    /// Store a JSON document
    Set {
        collection: String,
        key: String,
        /// Document as JSON text
        value: String,
    },

    /// Delete a document, or every document in a collection
    Delete {
        collection: String,
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "dingo=info,dingo_scheduler=info,dingo_store=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let store = StoreConfig {
        database_url: cli.database_url,
        strict_load: false,
    };

    match cli.command {
        Commands::Run {
            timezone,
            poll_interval,
            task_timeout,
            fixed_delay,
            health_port,
            strict_load,
        } => {
            daemon::run(daemon::DaemonConfig {
                store: StoreConfig {
                    strict_load,
                    ..store
                },
                scheduler: SchedulerConfig {
                    poll_interval_ms: poll_interval.saturating_mul(1000),
                    task_timeout_secs: task_timeout,
                    cadence: if fixed_delay {
                        Cadence::FixedDelay
                    } else {
                        Cadence::FixedRate
                    },
                    timezone,
                },
                health_port,
            })
            .await
        }

        Commands::Health => {
            let report = commands::health(&store).await?;
            print_json(&report)?;
            if !report.is_healthy() {
                return Err(miette::miette!("document store is unhealthy"));
            }
            Ok(())
        }

        Commands::Get { collection, key } => {
            let value = commands::get(&store, &collection, key.as_deref()).await?;
            print_json(&value)
        }

        Commands::Set {
            collection,
            key,
            value,
        } => commands::set(&store, &collection, &key, &value).await,

        Commands::Delete { collection, key } => {
            commands::delete(&store, &collection, key.as_deref()).await
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| miette::miette!("{}", e))?;
    println!("{}", text);
    Ok(())
}
