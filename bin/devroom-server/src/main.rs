//! devroom-server – entry point.
//!
//! Startup order:
//! 1. Load `.env`, parse flags and configuration.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Start the room dispatcher with its model and sandbox backends.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.
//! 6. Store every open project's file tree before exiting.

mod config;
mod entities;
mod error;
mod middleware;
mod models;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use devroom_core::{AugmentationPipeline, ConnectionGateway, Dispatcher, DispatcherDeps, JwtVerifier};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::{Cli, Config};
use crate::entities::SqliteStore;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    match dotenvy::dotenv() {
        Err(e) if !e.not_found() => eprintln!("WARN: failed to load .env ({e})"),
        _ => {}
    }
    let cfg = Config::from_env().with_cli(Cli::parse());

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let _log_guard = init_tracing(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), "devroom-server starting");

    let Some(secret) = cfg.jwt_secret.clone() else {
        anyhow::bail!("DEVROOM_JWT_SECRET must be set");
    };

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = Arc::new(
        SqliteStore::connect(&cfg.database_url)
            .await
            .with_context(|| format!("failed to open database {}", cfg.database_url))?,
    );
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. Dispatcher ──────────────────────────────────────────────────────────
    let verifier = Arc::new(JwtVerifier::new(&secret));
    let pipeline = AugmentationPipeline::new(cfg.ai_marker.clone(), models::from_config(&cfg));
    let dispatcher = Dispatcher::start(
        DispatcherDeps {
            directory: store.clone(),
            pipeline,
            sandbox: cfg.sandbox_provider(),
        },
        cfg.queue_capacity,
    );
    let gateway = ConnectionGateway::new(verifier.clone(), store.clone(), cfg.allow_missing_project);
    info!(
        marker = %cfg.ai_marker,
        allow_missing_project = cfg.allow_missing_project,
        sandbox_enabled = cfg.sandbox_enabled,
        "dispatcher started"
    );
    if cfg.sandbox_enabled {
        warn!(programs = ?cfg.sandbox_programs, "sandbox runs project code on this host");
    }

    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        store,
        verifier,
        gateway,
        dispatcher,
    });

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", cfg.bind_address))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = state.dispatcher.shutdown().await {
        warn!(error = %e, "dispatcher already stopped; unsaved edits may be lost");
    }

    info!("devroom-server stopped");
    Ok(())
}

/// Install the global subscriber. The returned guard flushes the log file and
/// must live until shutdown.
fn init_tracing(cfg: &Config) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: DEVROOM_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                EnvFilter::new("info")
            }
        },
    };

    let (file_layer, guard) = match &cfg.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "devroom-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);
    if cfg.log_json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
    guard
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
