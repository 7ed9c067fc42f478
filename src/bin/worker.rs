use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use leadhub::{
    ai::ProviderManager,
    auth::{jwt::TokenService, revocation::InMemoryRevocationCache},
    config::AppConfig,
    db, default_handlers,
    state::AppState,
    Worker,
};

const WORKER_POOL_SIZE: u32 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = WORKER_POOL_SIZE,
        poll_interval_ms = config.worker_poll_interval_ms,
        auto_extract = config.ai.auto_extract,
        "loaded configuration"
    );
    let poll_interval = Duration::from_millis(config.worker_poll_interval_ms);
    let pool = db::init_pool_with_size(&config.database_url, WORKER_POOL_SIZE)?;
    let tokens = TokenService::from_config(&config);
    let revocations = Arc::new(InMemoryRevocationCache::new(1));
    // Extraction jobs are all the worker runs, so it needs a provider.
    let ai = Arc::new(
        ProviderManager::from_config(&config.ai).context("worker requires an AI provider")?,
    );

    let state = AppState::new(pool, config, tokens, revocations, Some(ai));
    let worker = Worker::new(state, default_handlers(), poll_interval);

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
