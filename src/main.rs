//! Application entry point for the `relaysync` service.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Selecting the cache backend (PostgreSQL when `DATABASE_URL` is set,
//!   otherwise a JSON file) and creating the schema if needed
//! - Starting the sync service (cache, history load, live poller) in the
//!   background
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving until Ctrl-C
//!
//! # Environment Variables
//! - `CONTROLLER_URL` (**required**) – controller HTTP API base URL
//! - `DATABASE_URL` (optional) – PostgreSQL connection string
//! - `RELAYSYNC_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `RELAYSYNC_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the remaining settings.
use std::{env, net::SocketAddr};

use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use relaysync::{config, routes, schema, CacheStore, Config, HttpController, LocalCache, SyncEngine, SyncService};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let store = open_store(&cfg).await?;
    let controller = HttpController::new(&cfg.controller_url, cfg.fetch_timeout())
        .context("Failed to build controller client")?;

    let engine = SyncEngine::new(LocalCache::new(store), cfg.close_on_boot);
    let service = SyncService::new(controller, engine, cfg.service_settings());

    // The API answers from cached data while history is still loading.
    let bootstrap = {
        let service = service.clone();
        tokio::spawn(async move {
            let report = service.bootstrap().await;
            tracing::info!(outcome = ?report.outcome, "Startup sync finished");
        })
    };

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(service.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bootstrap.abort();
    service.shutdown().await;
    tracing::info!("Shut down cleanly");

    Ok(())
}

/// Pick the cache backend for this run.
async fn open_store(cfg: &Config) -> Result<CacheStore> {
    // ---
    let Some(db_url) = cfg.db_url.as_deref() else {
        tracing::info!("Using file cache at {}", cfg.cache_path.display());
        return Ok(CacheStore::File(cfg.cache_path.clone()));
    };

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(db_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;
    Ok(CacheStore::Postgres(pool))
}

async fn shutdown_signal() {
    // ---
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
        Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
    }
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `RELAYSYNC_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, or else `RELAYSYNC_LOG_LEVEL`
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("RELAYSYNC_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to RELAYSYNC_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("RELAYSYNC_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
