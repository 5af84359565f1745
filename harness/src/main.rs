use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod migrate;

#[derive(Parser, Debug)]
#[command(name = "meshqueue-harness")]
#[command(about = "Process shell for the SQL-backed coordination platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run DB migrations for the coordination state database.
    Migrate,

    /// Run the generic dispatcher plus reaper for one table.
    Worker {
        /// outbox, inbox, timers, or job_runs.
        table: String,
    },

    /// Run the cron/timer materialization loop.
    Scheduler,

    /// Run one fan-out pass for a (topic, work_key).
    Fanout { topic: String, work_key: String },

    /// Run just the reaper for one table.
    Reap {
        /// outbox, inbox, timers, or job_runs.
        table: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = config::HarnessConfig::from_env().context("load harness config")?;

    match cli.command {
        Command::Migrate => migrate::run(&cfg).await,
        Command::Worker { table } => commands::run_worker(&cfg, &table).await,
        Command::Scheduler => commands::run_scheduler(&cfg).await,
        Command::Fanout { topic, work_key } => commands::run_fanout(&cfg, &topic, &work_key).await,
        Command::Reap { table } => commands::run_reap(&cfg, &table).await,
    }
}
