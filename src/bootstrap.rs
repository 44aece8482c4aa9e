use std::{sync::Arc, time::Duration};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{info, warn};
use crate::{
    adapters::{
        ProviderRegistry,
        explorer::{BlockcypherProvider, BlockstreamProvider},
    },
    api::{auth::CronToken, handler::AppState},
    config::Config,
    error::{AppError, AppResult},
    ledger::{repository::LedgerRepository, settings::BitcoinSettings, store::PaymentStore},
    middleware::RateLimitLayer,
    reconciliation::Reconciler,
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url).await?;
    let store: Arc<dyn PaymentStore> = Arc::new(LedgerRepository::new(pool));

    // Report the admin settings up front; a bad value only fails the cycle
    match BitcoinSettings::from_map(&store.load_settings().await?) {
        Ok(settings) => info!(
            "✅ Bitcoin settings: provider={} network={} confirmations={} xpub={}",
            settings.provider,
            settings.network,
            settings.required_confirmations,
            if settings.xpub.is_some() { "set" } else { "missing" }
        ),
        Err(e) => warn!("⚠️  Bitcoin settings are invalid, cycles will fail until fixed: {}", e),
    }

    let providers = Arc::new(initialize_providers(config)?);

    Ok(build_state(store, providers, config))
}

/// Wire the shared state from already-built parts
pub fn build_state(
    store: Arc<dyn PaymentStore>,
    providers: Arc<ProviderRegistry>,
    config: &Config,
) -> AppState {
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        providers,
        config.reconciler_config(),
    ));
    info!(
        "✅ Reconciler initialized ({} workers, {}s batch deadline)",
        config.reconcile_workers, config.batch_deadline_secs
    );

    let cron_token = CronToken::new(&config.cron_token);
    if !cron_token.is_configured() {
        warn!("⚠️  CRON_TOKEN not set - cron and payment endpoints will reject every request");
    }

    AppState {
        store,
        reconciler,
        cron_token: Arc::new(cron_token),
        cron_rate_limit: RateLimitLayer::per_minute(config.cron_rate_limit_per_minute),
    }
}

fn initialize_providers(config: &Config) -> AppResult<ProviderRegistry> {
    info!("⚙️  Initializing chain providers...");

    // Per-call deadlines are enforced by the prober; this is a backstop
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.probe_timeout_secs.saturating_mul(2)))
        .user_agent(concat!("payment-reconciler/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AppError::Internal(format!("HTTP client: {}", e)))?;

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(BlockstreamProvider::new(
        client.clone(),
        config.blockstream_base_url.clone(),
    )));
    registry.register(Arc::new(BlockcypherProvider::new(
        client,
        config.blockcypher_base_url.clone(),
        config.blockcypher_token.clone(),
    )));

    info!("🔗 Chain providers available: {:?}", registry.kinds());
    Ok(registry)
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 20 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
