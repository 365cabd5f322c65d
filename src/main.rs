#![forbid(unsafe_code)]

//! `agent-conductor`: session runner and subscription gateway binary.
//!
//! Bootstraps configuration, the database, the retention sweeper, the
//! session manager and the HTTP/WebSocket gateway.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conductor::config::GlobalConfig;
use agent_conductor::coordination::admission::AdmissionQueue;
use agent_conductor::gateway::{serve_http, AppState, SubscriptionGateway};
use agent_conductor::models::session::SessionStatus;
use agent_conductor::orchestrator::SessionManager;
use agent_conductor::persistence::session_repo::SessionRepo;
use agent_conductor::persistence::{db, retention};
use agent_conductor::runner::inference::HttpInference;
use agent_conductor::runner::tools::ToolRegistry;
use agent_conductor::runner::SessionRunner;
use agent_conductor::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conductor", about = "Multi-agent session orchestration core", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port from the config file.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-conductor bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    let inference_url = config
        .inference_url
        .clone()
        .ok_or_else(|| AppError::Config("inference_url must be set".into()))?;
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path).await?);
    info!("database connected");

    let sessions = SessionRepo::new(Arc::clone(&db));
    stop_orphaned_sessions(&sessions).await;

    // ── Start retention service ──────────────────────────
    let ct = CancellationToken::new();
    let retention_handle = retention::spawn_retention_task(
        Arc::clone(&db),
        config.retention_days,
        config.locks.sweep_interval(),
        ct.clone(),
    );
    info!("retention service started");

    // ── Build session pipeline ──────────────────────────
    let gateway = Arc::new(SubscriptionGateway::new(&config.events));
    let runner = SessionRunner::new(
        Arc::new(HttpInference::new(inference_url)?),
        Arc::new(ToolRegistry::new()),
        AdmissionQueue::new(config.admission.hold_timeout()),
        sessions.clone(),
        &config.runner,
    );
    let manager = Arc::new(SessionManager::new(sessions, runner, gateway.event_bus()));

    let state = AppState {
        gateway: Arc::clone(&gateway),
        manager: Arc::clone(&manager),
    };

    let http_ct = ct.clone();
    let port = config.http_port;
    let http_handle = tokio::spawn(async move {
        if let Err(err) = serve_http(state, port, http_ct).await {
            error!(%err, "http gateway failed");
        }
    });

    info!("agent-conductor ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    manager.shutdown().await;
    ct.cancel();
    gateway.shutdown();

    let _ = tokio::join!(http_handle, retention_handle);
    info!("agent-conductor shut down");

    Ok(())
}

/// Sessions left `running` by a previous process have no loop behind them.
async fn stop_orphaned_sessions(sessions: &SessionRepo) {
    let orphaned = match sessions.list_by_status(SessionStatus::Running).await {
        Ok(list) => list,
        Err(err) => {
            warn!(%err, "failed to list running sessions on startup");
            return;
        }
    };

    for session in &orphaned {
        if let Err(err) = sessions
            .update_status(&session.id, SessionStatus::Stopped)
            .await
        {
            error!(session_id = %session.id, %err, "failed to stop orphaned session");
        }
    }

    if !orphaned.is_empty() {
        info!(count = orphaned.len(), "stopped sessions orphaned by previous run");
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
