//! keel - a distributed job scheduler.
//!
//! Usage:
//!   keel run [--api]                 Run the dispatcher (and the HTTP API)
//!   keel submit --name N --schedule S --task T
//!                                    Create a job and print it
//!   keel get <id>                    Print one job
//!   keel remove <id>                 Remove one job
//!   keel next <schedule> [-n 5]      Print the next occurrences of a schedule
//!
//! Every command but `next` reads `keel.yaml` from the working directory, or
//! the file given with `--config`.

use chrono::Utc;
use clap::{Parser, Subcommand};
use keel::api::{create_api_state, start_server};
use keel::{
    InMemoryStore, JobId, JobService, KeelConfig, NewJob, Schedule, Store, StoreConfig,
    TaskRegistry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Config file read when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "keel.yaml";

/// keel - a distributed job scheduler
#[derive(Parser)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (default: ./keel.yaml if present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatcher until Ctrl+C
    Run {
        /// Also serve the HTTP API
        #[arg(long)]
        api: bool,

        /// API host (overrides api.host)
        #[arg(long)]
        host: Option<String>,

        /// API port (overrides api.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Create a job
    Submit {
        /// Human-readable job name
        #[arg(long)]
        name: String,

        /// Cron expression, shortcut (@daily) or timestamp
        #[arg(long)]
        schedule: String,

        /// Registered task handler
        #[arg(long)]
        task: String,

        /// Retry bound (default: retry.default_max_retries)
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Print one job
    Get {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Remove one job
    Remove {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Validate a schedule and print its next occurrences
    Next {
        #[arg(value_name = "SCHEDULE")]
        schedule: String,

        /// Number of occurrences to print
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Next { schedule, count } = &cli.command {
        return print_next(schedule, *count);
    }

    let config = load_config(cli.config.as_deref())?;
    match config.store.clone() {
        StoreConfig::Memory => {
            execute(Arc::new(InMemoryStore::new()), &config, cli.command).await
        }
        #[cfg(feature = "sqlite")]
        StoreConfig::Sqlite { path } => {
            let store = Arc::new(keel::SqliteStore::new(&path).await?);
            let result = execute(Arc::clone(&store), &config, cli.command).await;
            store.close().await;
            result
        }
        #[cfg(not(feature = "sqlite"))]
        StoreConfig::Sqlite { .. } => Err("keel was built without the `sqlite` feature".into()),
        #[cfg(feature = "redis")]
        StoreConfig::Redis { url } => {
            let store = Arc::new(keel::RedisStore::connect(&url).await?);
            execute(store, &config, cli.command).await
        }
        #[cfg(not(feature = "redis"))]
        StoreConfig::Redis { .. } => Err("keel was built without the `redis` feature".into()),
    }
}

fn load_config(path: Option<&Path>) -> Result<KeelConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(KeelConfig::from_file(path)?),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Ok(KeelConfig::from_file(DEFAULT_CONFIG_FILE)?)
        }
        None => Ok(KeelConfig::default()),
    }
}

async fn execute<S: Store + 'static>(
    store: Arc<S>,
    config: &KeelConfig,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.store == StoreConfig::Memory && !matches!(command, Commands::Run { .. }) {
        warn!("using the in-memory store: nothing is shared with other processes");
    }

    let ctx = Arc::new(config.scheduler_context(store, TaskRegistry::with_builtins()));
    let service = JobService::new(Arc::clone(&ctx));

    match command {
        Commands::Run { api, host, port } => {
            let dispatcher = config.dispatcher(Arc::clone(&ctx));
            let (handle, dispatcher_task) = dispatcher.start().await;

            let server = if api {
                let mut api_config = config.api.clone();
                if let Some(host) = host {
                    api_config.host = host;
                }
                if let Some(port) = port {
                    api_config.port = port;
                }
                let state = create_api_state(handle.clone(), service);
                Some(start_server(api_config, state).await?)
            } else {
                None
            };

            info!(holder = %ctx.holder(), "press Ctrl+C to stop");

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    handle.shutdown().await?;
                }
                _ = dispatcher_task => {
                    info!("dispatcher stopped");
                }
            }

            if let Some(server) = server {
                server.abort();
            }
        }
        Commands::Submit {
            name,
            schedule,
            task,
            max_retries,
        } => {
            let mut new = NewJob::new(name, schedule, task);
            if let Some(max_retries) = max_retries {
                new = new.with_max_retries(max_retries);
            }
            let job = service.create_job(new).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::Get { job_id } => {
            let job = service.get_job(&JobId::new(job_id)).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::Remove { job_id } => {
            let job_id = JobId::new(job_id);
            service.remove_job(&job_id).await?;
            println!("removed {}", job_id);
        }
        Commands::Next { schedule, count } => print_next(&schedule, count)?,
    }

    Ok(())
}

/// Print the next occurrences of a schedule.
fn print_next(raw: &str, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let schedule = Schedule::parse(raw)?;
    let upcoming = schedule.upcoming(Utc::now(), count);

    println!("{} ({:?})", schedule, schedule.kind());
    if upcoming.is_empty() {
        println!("  no further occurrences");
    }
    for at in upcoming {
        println!("  {}", at.to_rfc3339());
    }
    Ok(())
}
