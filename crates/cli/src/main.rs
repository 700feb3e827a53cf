//! `workflow-engine` CLI entry-point.
//!
//! Available sub-commands:
//! - `worker`   — trigger dispatcher + resume sweeper against Postgres; events
//!                are read as JSON lines from stdin.
//! - `migrate`  — run pending database migrations.
//! - `validate` — validate a workflow JSON file.
//! - `run`      — run a workflow file in memory against one event and print
//!                its log rows.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use engine::{
    ExecutionEngine, GraphStore, MemoryStore, PgStore, ResumeSweeper, TriggerAdapter, TriggerDispatcher, Workflow,
};
use nodes::ai::{AiManager, DummyProvider, GeminiProvider, OllamaProvider};
use nodes::messaging::LogMessenger;
use nodes::Handlers;
use queue::QueuedEvent;

use crate::config::{AiProviderKind, AppConfig};

#[derive(Parser)]
#[command(
    name = "workflow-engine",
    about = "Multi-tenant CRM workflow automation engine",
    version
)]
struct Cli {
    /// Path to a `workflow.toml` config file.
    #[arg(long, short, global = true, env = "WORKFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch events from stdin and resume delayed instances.
    Worker {
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Run a workflow file in memory against a single event.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Event type, e.g. `lead.created`.
        #[arg(long)]
        event: String,
        /// Event payload as a JSON object.
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}

/// One line of worker input.
#[derive(Debug, Deserialize)]
struct InboundEvent {
    tenant_id: Uuid,
    event_type: String,
    #[serde(default)]
    payload: Map<String, Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Worker { database_url } => worker(&config, database_url).await,
        Command::Migrate { database_url } => {
            let pool = connect(&config, database_url).await?;
            db::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
            Ok(())
        }
        Command::Validate { path } => {
            let workflow = read_workflow(&path)?;
            match engine::validate_dag(&workflow) {
                Ok(order) => {
                    println!("✅ Workflow is valid. Topological order: {order:?}");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Run { path, event, payload } => run(&config, &path, &event, &payload).await,
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn ai_manager(config: &AppConfig) -> Result<AiManager> {
    let manager = match config.ai.provider {
        AiProviderKind::Dummy => AiManager::new().with_provider(Arc::new(DummyProvider)),
        AiProviderKind::Ollama => {
            AiManager::new().with_provider(Arc::new(OllamaProvider::new(config.ai.endpoint())))
        }
        AiProviderKind::Gemini => {
            let gemini = GeminiProvider::new(config.ai.api_key.clone().unwrap_or_default())?
                .with_endpoint(config.ai.endpoint());
            AiManager::new().with_provider(Arc::new(gemini))
        }
        AiProviderKind::None => AiManager::new(),
    };
    Ok(manager)
}

fn handlers(config: &AppConfig) -> Result<Handlers> {
    Ok(Handlers::new(
        Arc::new(ai_manager(config).context("cannot configure the AI provider")?),
        Arc::new(LogMessenger),
        config.retry_policy(),
    ))
}

async fn connect(config: &AppConfig, database_url: Option<String>) -> Result<db::DbPool> {
    let Some(url) = database_url.or_else(|| config.database.url.clone()) else {
        bail!("no database URL: pass --database-url, set DATABASE_URL or [database].url");
    };
    let pool = db::create_pool(&url, config.database.max_connections, config.acquire_timeout())
        .await
        .context("failed to connect to database")?;
    Ok(pool)
}

fn read_workflow(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

// ---------------------------------------------------------------------------
// worker
// ---------------------------------------------------------------------------

async fn worker(config: &AppConfig, database_url: Option<String>) -> Result<()> {
    let pool = connect(config, database_url).await?;
    let store = Arc::new(PgStore::new(pool));
    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        store,
        handlers(config)?,
        config.executor_config(),
    ));

    let (sender, receiver) = queue::bounded(config.queue.capacity);
    let adapter = TriggerAdapter::new(sender);
    let cancel = CancellationToken::new();

    let dispatcher = Arc::new(TriggerDispatcher::new(engine.clone()));
    let dispatch_task = tokio::spawn(dispatcher.run(receiver, cancel.clone()));

    let sweeper = ResumeSweeper::new(engine, config.sweep_interval());
    let sweep_cancel = cancel.clone();
    let sweep_task = tokio::spawn(async move { sweeper.run(sweep_cancel).await });

    let reader_cancel = cancel.clone();
    let reader_task = tokio::spawn(async move { read_events(adapter, reader_cancel).await });

    info!("worker running; reading events from stdin");
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down");
    cancel.cancel();

    for task in [dispatch_task, sweep_task, reader_task] {
        if let Err(e) = task.await {
            error!("worker task panicked: {e}");
        }
    }
    Ok(())
}

async fn read_events(adapter: TriggerAdapter, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("stdin read failed: {e}");
                break;
            }
        };

        let event: InboundEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("skipping malformed event: {e}");
                continue;
            }
        };
        match adapter.on_event(&event.event_type, event.payload, event.tenant_id) {
            Ok(id) => info!(event_id = %id, event_type = %event.event_type, "event accepted"),
            Err(e) => warn!(event_type = %event.event_type, "event rejected: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn run(config: &AppConfig, path: &Path, event_type: &str, payload: &str) -> Result<()> {
    let workflow = read_workflow(path)?;
    let payload: Map<String, Value> = serde_json::from_str(payload).context("--payload must be a JSON object")?;

    let store = Arc::new(MemoryStore::new());
    let workflow = store.save_workflow(workflow).await?;
    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        store,
        handlers(config)?,
        config.executor_config(),
    ));

    let dispatcher = TriggerDispatcher::new(engine.clone());
    let started = dispatcher
        .dispatch(&QueuedEvent::new(workflow.tenant_id, event_type, payload))
        .await?;
    if started.is_empty() {
        println!("No entry node of '{}' listens for '{event_type}'.", workflow.name);
        return Ok(());
    }

    for mut instance in started {
        // Fast-forward delays instead of sleeping through them.
        while instance.is_suspended() {
            let resume_at = instance.resume_at.unwrap_or_else(Utc::now);
            info!(instance_id = %instance.id, %resume_at, "fast-forwarding delay");
            instance = engine.resume(instance.id, resume_at.max(Utc::now())).await?;
        }

        println!("instance {} -> {}", instance.id, instance.status);
        if let Some(kind) = instance.error_kind {
            println!("  error kind: {}", kind.as_str());
        }
        for log in engine.logs(instance.tenant_id, instance.id).await? {
            println!("{}", serde_json::to_string(&log)?);
        }
    }
    Ok(())
}
