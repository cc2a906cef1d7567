//! Operator CLI for the ingestion workers.
//!
//! `coordctl run` hosts the worker fleet; the other commands inspect and
//! repair the state it keeps in the database.

mod cmd;
mod shell;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordinator::{Config, Database};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "coordctl")]
#[command(about = "Run and inspect recurring ingestion workers")]
struct Cli {
    /// Overrides DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every enabled worker and run until interrupted
    Run,

    /// Inspect or clear tracked job buckets
    Job {
        #[command(subcommand)]
        command: JobCommand,
    },

    /// Inspect or reset sync cursors
    Cursor {
        #[command(subcommand)]
        command: CursorCommand,
    },

    /// Advisory lock diagnostics
    Lock {
        #[command(subcommand)]
        command: LockCommand,
    },

    /// Print the worker table in dependency order
    Graph,
}

#[derive(Subcommand)]
pub enum JobCommand {
    /// Show one bucket
    Get { worker: String, id: String },

    /// Show the most recent bucket
    Last { worker: String },

    /// List every bucket, oldest first
    List { worker: String },

    /// Delete a bucket so the next tick runs it again
    Clear { worker: String, id: String },

    /// Delete buckets past the worker's retention
    Evict { worker: String },
}

#[derive(Subcommand)]
pub enum CursorCommand {
    Get { job: String, key: String },
    Set { job: String, key: String, value: String },
    Clear { job: String, key: String },
}

#[derive(Subcommand)]
pub enum LockCommand {
    /// Report whether a lock is currently held elsewhere
    Probe {
        /// Lock name segments, e.g. `oauth token 42`
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,coordinator=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    match cli.command {
        Commands::Graph => cmd::graph::graph(&config),
        Commands::Run => cmd::run::run(&config, &connect(&config).await?).await,
        Commands::Job { command } => cmd::job::job(&connect(&config).await?, command).await,
        Commands::Cursor { command } => cmd::cursor::cursor(&connect(&config).await?, command).await,
        Commands::Lock { command } => cmd::lock::lock(&connect(&config).await?, command).await,
    }
}

async fn connect(config: &Config) -> Result<Database> {
    let db = Database::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to connect to {}", config.database_url))?;
    db.migrate().await.context("Failed to run migrations")?;
    Ok(db)
}
