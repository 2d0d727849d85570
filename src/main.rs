//! # MindFlow CLI (`mindflow`)
//!
//! ## Usage
//!
//! ```bash
//! mindflow --config ./config/mindflow.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mindflow init` | Create the SQLite database and run schema migrations |
//! | `mindflow serve` | Start the HTTP API and the reminder scheduler |
//! | `mindflow tick` | Run one reminder pass and print the report |
//!
//! `serve` reads the token signing secret and the API keys from the
//! environment variables named in the config file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mindflow::config::{self, Config};
use mindflow::llm::OpenAiCompatClient;
use mindflow::scheduler::ReminderScheduler;
use mindflow::server::{self, AppState};
use mindflow::sqlite_store::SqliteStore;
use mindflow::store::Store;
use mindflow::{db, migrate, notify};

/// MindFlow: chat, documents and deadline reminders.
#[derive(Parser)]
#[command(name = "mindflow", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mindflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Serve the HTTP API. Starts the reminder scheduler unless
    /// `[scheduler].enabled = false`.
    Serve,

    /// Run one reminder pass against the database and exit.
    Tick,
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<dyn Store>> {
    migrate::run_migrations(cfg).await?;
    let pool = db::connect(cfg).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    let secret = config::env_secret(&cfg.auth.secret_env).with_context(|| {
        format!(
            "token signing secret missing: set the {} environment variable",
            cfg.auth.secret_env
        )
    })?;
    let store = open_store(&cfg).await?;
    let generator = Arc::new(OpenAiCompatClient::from_config(&cfg.llm)?);
    let notifier = notify::build_notifier(&cfg.mail)?;
    if !cfg.mail.is_enabled() {
        tracing::warn!("mail provider disabled; reminders will be recorded as failed");
    }

    let scheduler_enabled = cfg.scheduler.enabled;
    let state = AppState::new(cfg, store, generator, notifier, secret);
    let scheduler = state.scheduler.clone();
    if scheduler_enabled {
        scheduler.start();
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        tracing::info!("shutting down");
    };
    let result = server::run_server(state, shutdown).await;
    scheduler.stop().await;
    result
}

async fn tick(cfg: Config) -> anyhow::Result<()> {
    let store = open_store(&cfg).await?;
    let notifier = notify::build_notifier(&cfg.mail)?;
    let scheduler = ReminderScheduler::new(store, notifier, &cfg.scheduler);

    match scheduler.run_tick(Utc::now()).await? {
        Some(report) => println!(
            "due: {}  sent: {}  failed: {}  skipped: {}  overdue: {}",
            report.due, report.sent, report.failed, report.skipped, report.overdue
        ),
        None => println!("tick skipped: another pass is running"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mindflow=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => serve(cfg).await?,
        Commands::Tick => tick(cfg).await?,
    }

    Ok(())
}
