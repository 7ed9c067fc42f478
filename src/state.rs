use std::sync::Arc;

use diesel::PgConnection;
use tokio::task;

use crate::{
    ai::{AiError, ProviderManager},
    auth::{jwt::TokenService, revocation::RevocationCache},
    config::AppConfig,
    db::{PgPool, PgPooledConnection},
    error::{AppError, AppResult},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub tokens: TokenService,
    pub revocations: Arc<dyn RevocationCache>,
    /// `None` when no provider has an API key; AI routes then answer 503.
    pub ai: Option<Arc<ProviderManager>>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        tokens: TokenService,
        revocations: Arc<dyn RevocationCache>,
        ai: Option<Arc<ProviderManager>>,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            tokens,
            revocations,
            ai,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }

    pub fn ai(&self) -> Result<Arc<ProviderManager>, AiError> {
        self.ai.clone().ok_or(AiError::NotConfigured)
    }

    /// Runs `work` on the blocking pool with a pooled connection.
    pub async fn with_db<T, F>(&self, work: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| AppError::internal(format!("database pool error: {err}")))?;
            work(&mut conn)
        })
        .await
        .map_err(|err| AppError::internal(format!("database task failed: {err}")))?
    }
}
