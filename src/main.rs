/// pinledger - content pinning service with per-owner storage accounting
///
/// Accepts pin requests over HTTP, confirms them against an IPFS-compatible
/// storage network in the background, and keeps a ledger of pinned bytes
/// per owner.

mod agents;
mod api;
mod auth;
mod cid;
mod config;
mod context;
mod db;
mod error;
mod ipfs;
mod jobs;
mod metrics;
mod pin_store;
mod pins;
mod rate_limit;
mod server;
mod storage_ledger;

use config::ServerConfig;
use context::AppContext;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("pinledger v{} starting", env!("CARGO_PKG_VERSION"));

    let worker_count = config.worker.worker_count;

    // Create application context
    let (ctx, receiver) = AppContext::new(config).await?;

    // Completion workers drain the pin queue
    let _workers = jobs::spawn_workers(Arc::clone(&ctx.pin_service), receiver, worker_count);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(ctx.clone()));
    scheduler.start();

    // Start server
    server::serve(ctx).await?;

    Ok(())
}
