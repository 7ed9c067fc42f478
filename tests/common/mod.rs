use std::collections::VecDeque;
use std::env;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::NaiveDateTime;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use leadhub::ai::provider::Pricing;
use leadhub::ai::{AiError, AiProvider, ChatMessage, Completion, PromptSettings, ProviderManager, Usage};
use leadhub::auth::jwt::TokenService;
use leadhub::auth::revocation::InMemoryRevocationCache;
use leadhub::config::{AiConfig, AppConfig};
use leadhub::db::{self, PgPool};
use leadhub::routes;
use leadhub::state::AppState;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const FAKE_PROVIDER: &str = "fake";
pub const FAKE_INPUT_TOKENS: u32 = 1_200;
pub const FAKE_OUTPUT_TOKENS: u32 = 300;
pub const FAKE_PRICING: Pricing = Pricing {
    input_per_million: 2.5,
    output_per_million: 10.0,
};

/// Provider double. Replies are served from a script, falling back to a
/// default; every message list it receives is kept for inspection.
pub struct FakeProvider {
    default_reply: StdMutex<String>,
    script: StdMutex<VecDeque<Result<String, AiError>>>,
    calls: StdMutex<Vec<Vec<ChatMessage>>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            default_reply: StdMutex::new("Keep listening more than you talk.".to_string()),
            script: StdMutex::new(VecDeque::new()),
            calls: StdMutex::new(Vec::new()),
        }
    }
}

#[allow(dead_code)]
impl FakeProvider {
    pub fn reply_with(&self, text: &str) {
        *self.default_reply.lock().unwrap() = text.to_string();
    }

    pub fn fail_next(&self, error: AiError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn expected_usage() -> Usage {
        Usage::priced(FAKE_INPUT_TOKENS, FAKE_OUTPUT_TOKENS, &FAKE_PRICING)
    }
}

#[async_trait]
impl AiProvider for FakeProvider {
    fn name(&self) -> &str {
        FAKE_PROVIDER
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _settings: &PromptSettings,
    ) -> Result<Completion, AiError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let scripted = self.script.lock().unwrap().pop_front();
        let text = match scripted {
            Some(reply) => reply?,
            None => self.default_reply.lock().unwrap().clone(),
        };
        Ok(Completion {
            text,
            usage: FakeProvider::expected_usage(),
        })
    }
}

#[allow(dead_code)]
pub struct Account {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TestApp {
    pub state: AppState,
    pub provider: Arc<FakeProvider>,
    router: Router,
}

#[allow(dead_code)]
impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::build(true).await
    }

    pub async fn without_ai() -> Result<Self> {
        Self::build(false).await
    }

    async fn build(ai_enabled: bool) -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: 4,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            environment: "test".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            refresh_token_audience: "test-refresh".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_hours: 24,
            revocation_cache_capacity: 1_000,
            cors_allowed_origin: None,
            worker_poll_interval_ms: 10,
            ai: AiConfig {
                default_provider: FAKE_PROVIDER.to_string(),
                auto_extract: true,
                conversation_retention_days: 30,
                providers: Vec::new(),
            },
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let provider = Arc::new(FakeProvider::default());
        let ai = if ai_enabled {
            let adapter: Arc<dyn AiProvider> = provider.clone();
            Some(Arc::new(ProviderManager::new(vec![adapter], FAKE_PROVIDER)?))
        } else {
            None
        };
        let tokens = TokenService::from_config(&config);
        let revocations = Arc::new(InMemoryRevocationCache::new(config.revocation_cache_capacity));
        let state = AppState::new(pool, config, tokens, revocations, ai);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            provider,
            router,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(|conn| reset_database(conn)).await
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<Account> {
        let response = self
            .post_json(
                "/users",
                &json!({ "email": email, "name": email.split('@').next().unwrap_or(email), "password": password }),
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "registration failed with status {}",
            response.status()
        );
        account_from(body_json(response).await?)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Account> {
        let response = self
            .post_json(
                "/auth/login",
                &json!({ "email": email, "password": password }),
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );
        account_from(body_json(response).await?)
    }

    pub async fn create_company(&self, token: &str, name: &str) -> Result<Uuid> {
        let response = self
            .post_json("/companies", &json!({ "name": name }), Some(token))
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "company creation failed with status {}",
            response.status()
        );
        uuid_field(&body_json(response).await?, "id")
    }

    pub async fn create_person(&self, token: &str, company: Uuid, name: &str) -> Result<Uuid> {
        let response = self
            .post_json(
                &format!("/companies/{company}/people"),
                &json!({ "name": name }),
                Some(token),
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "person creation failed with status {}",
            response.status()
        );
        uuid_field(&body_json(response).await?, "id")
    }

    pub async fn create_note(
        &self,
        token: &str,
        company: Uuid,
        person: Uuid,
        note_type: &str,
        content: &str,
    ) -> Result<Value> {
        let response = self
            .post_json(
                &format!("/companies/{company}/people/{person}/notes"),
                &json!({ "note_type": note_type, "content": content }),
                Some(token),
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "note creation failed with status {}",
            response.status()
        );
        body_json(response).await
    }

    /// Backdates a note so cadence and ordering can be controlled.
    pub async fn set_note_created_at(&self, note: Uuid, created_at: NaiveDateTime) -> Result<()> {
        self.with_conn(move |conn| {
            use leadhub::schema::notes;
            diesel::update(notes::table.filter(notes::uuid.eq(note)))
                .set(notes::created_at.eq(created_at))
                .execute(conn)
                .context("failed to backdate note")?;
            Ok(())
        })
        .await
    }

    pub async fn mention_rows(&self, note: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(move |conn| {
            use leadhub::schema::{note_mentions, notes, people};
            let rows = note_mentions::table
                .inner_join(notes::table)
                .inner_join(people::table.on(people::id.eq(note_mentions::mentioned_person_id)))
                .filter(notes::uuid.eq(note))
                .select(people::uuid)
                .order(people::uuid.asc())
                .load::<Uuid>(conn)
                .context("failed to load mention rows")?;
            Ok(rows)
        })
        .await
    }

    pub async fn usage_rows(&self) -> Result<Vec<(Uuid, String, i32, i32, i32, f64)>> {
        self.with_conn(|conn| {
            use leadhub::schema::ai_usage_trackers as usage;
            let rows = usage::table
                .select((
                    usage::uuid,
                    usage::request_type,
                    usage::input_tokens,
                    usage::output_tokens,
                    usage::tokens_used,
                    usage::cost_usd,
                ))
                .order(usage::id.asc())
                .load(conn)
                .context("failed to load usage rows")?;
            Ok(rows)
        })
        .await
    }

    pub async fn conversation_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            use leadhub::schema::ai_conversations;
            ai_conversations::table
                .count()
                .get_result(conn)
                .context("failed to count conversations")
        })
        .await
    }

    pub async fn execute_sql(&self, sql: &'static str) -> Result<()> {
        self.with_conn(move |conn| {
            conn.batch_execute(sql).context("failed to execute sql")?;
            Ok(())
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<axum::response::Response> {
        self.send_json(Method::POST, path, payload, token).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<axum::response::Response> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<axum::response::Response> {
        self.send(Method::GET, path, Body::empty(), None, token).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<axum::response::Response> {
        self.send(Method::DELETE, path, Body::empty(), None, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<axum::response::Response> {
        let body = serde_json::to_vec(payload)?;
        self.send(method, path, Body::from(body), Some("application/json"), token)
            .await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Body,
        content_type: Option<&str>,
        token: Option<&str>,
    ) -> Result<axum::response::Response> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        if let Some(token) = token {
            builder = builder.header("user-token", token);
        }
        let request = builder.body(body)?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_json(response: axum::response::Response) -> Result<Value> {
    let collected = response
        .into_body()
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    let bytes = collected.to_bytes();
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

pub fn uuid_field(value: &Value, field: &str) -> Result<Uuid> {
    let raw = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing field {field} in {value}"))?;
    Uuid::parse_str(raw).context("field is not a uuid")
}

fn account_from(body: Value) -> Result<Account> {
    let auth = body.get("auth").ok_or_else(|| anyhow!("missing auth block"))?;
    let string = |field: &str| -> Result<String> {
        auth.get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("missing {field}"))
    };
    Ok(Account {
        user_id: uuid_field(body.get("user").unwrap_or(&Value::Null), "id")?,
        access_token: string("access_token")?,
        refresh_token: string("refresh_token")?,
    })
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        db::run_migrations(&mut conn)?;
        reset_database(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

/// Empties every table except the seeded prompts, which are put back to
/// their migrated state.
fn reset_database(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "ALTER TABLE ai_usage_trackers DROP CONSTRAINT IF EXISTS reject_all;
         TRUNCATE TABLE ai_conversations, ai_usage_trackers, person_attributes, note_mentions,
             notes, people, sessions, companies, users, jobs RESTART IDENTITY CASCADE;
         UPDATE ai_prompts SET is_active = FALSE WHERE version <> 1;
         DELETE FROM ai_prompts WHERE version <> 1;
         UPDATE ai_prompts SET is_active = TRUE WHERE version = 1;",
    )
    .context("failed to reset tables")?;
    Ok(())
}
