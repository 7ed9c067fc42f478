use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use leadhub::{
    ai::ProviderManager,
    auth::{jwt::TokenService, revocation::InMemoryRevocationCache},
    config::AppConfig,
    db, routes,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        environment = %config.environment,
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        ai_providers = config.ai.providers.len(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let tokens = TokenService::from_config(&config);
    let revocations = Arc::new(InMemoryRevocationCache::new(config.revocation_cache_capacity));
    let ai = match ProviderManager::from_config(&config.ai) {
        Ok(manager) => {
            tracing::info!(default_provider = %manager.default_name(), "AI providers ready");
            Some(Arc::new(manager))
        }
        Err(err) => {
            tracing::warn!(error = %err, "AI providers unavailable, AI routes will answer 503");
            None
        }
    };

    let bind = (config.server_host.clone(), config.server_port);
    let listener = TcpListener::bind((bind.0.as_str(), bind.1))
        .await
        .with_context(|| format!("failed to bind {}:{}", bind.0, bind.1))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let state = AppState::new(pool, config, tokens, revocations, ai);
    let app = routes::create_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("server received shutdown signal");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
