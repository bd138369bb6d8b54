mod cli;
mod config;
mod engine;
mod error;
mod http;
mod logging;

use crate::cli::Args;
use crate::config::Config;
use crate::engine::{Engine, EngineSettings};
use crate::logging::init_tracing;
use anyhow::Context;
use clap::Parser;
use command_store::{CommandRepository, MemoryStore, SqliteStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_tracing(&args.log_dir, &args.log_level, args.log_to_stderr)?;

    info!(
        listen_addr = %args.listen_addr,
        database = %args.database.display(),
        memory = args.memory,
        "command service starting"
    );
    let config = Config::resolve(args.config.as_deref())?;
    let store: Arc<dyn CommandRepository> = if args.memory {
        Arc::new(MemoryStore::new())
    } else {
        let store = SqliteStore::open(&args.database)
            .with_context(|| format!("failed to open database {}", args.database.display()))?;
        Arc::new(store)
    };
    let engine = Engine::new(store, EngineSettings::from(&config.engine));
    let orphaned = engine
        .reconcile_orphans()
        .await
        .context("failed to reconcile unfinished commands")?;
    if orphaned > 0 {
        info!(orphaned, "marked unfinished commands from a previous run as failed");
    }

    let app = http::router(engine);
    let listener = TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.listen_addr))?;
    info!(addr = %args.listen_addr, "command service listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;
    info!("command service shutting down");
    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
