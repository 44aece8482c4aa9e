mod error;
mod api;
mod adapters;
mod ledger;
mod reconciliation;
mod server;
mod bootstrap;
mod middleware;
mod config;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing::info;

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,payment_reconciler=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before anything reads the environment
    dotenv::dotenv().ok();

    init_tracing();

    info!("🚀 Starting Bitcoin payment reconciler");

    let config = config::Config::from_env().context("invalid configuration")?;

    let state = bootstrap::initialize_app_state(&config)
        .await
        .context("failed to initialize application state")?;

    // Create HTTP server
    let app = server::create_app(state, config.request_timeout()).await;

    // Run the Server
    server::run_server(app, &config.bind_address).await?;

    info!("👋 Server stopped");

    Ok(())
}
