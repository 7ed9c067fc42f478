use std::env;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const PROVIDER_OPENAI: &str = "openai";
pub const PROVIDER_ANTHROPIC: &str = "anthropic";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub refresh_token_audience: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_hours: i64,
    pub revocation_cache_capacity: u64,
    pub cors_allowed_origin: Option<String>,
    pub worker_poll_interval_ms: u64,
    pub ai: AiConfig,
}

#[derive(Clone, Debug)]
pub struct AiConfig {
    pub default_provider: String,
    pub auto_extract: bool,
    pub conversation_retention_days: i64,
    pub providers: Vec<ProviderConfig>,
}

/// Settings for one AI vendor. A provider is only registered when its API
/// key is present.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub name: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

struct ProviderDefaults {
    base_url: &'static str,
    model: &'static str,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let environment = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "leadhub".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "leadhub-clients".to_string());
        let refresh_token_audience =
            env::var("REFRESH_TOKEN_AUDIENCE").unwrap_or_else(|_| "leadhub-refresh".to_string());
        let access_token_ttl_minutes = env::var("ACCESS_TOKEN_TTL_MINUTES")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .context("ACCESS_TOKEN_TTL_MINUTES must be an integer")?;
        let refresh_token_ttl_hours = env::var("REFRESH_TOKEN_TTL_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .context("REFRESH_TOKEN_TTL_HOURS must be an integer")?;
        let revocation_cache_capacity = env::var("REVOCATION_CACHE_CAPACITY")
            .unwrap_or_else(|_| "100000".to_string())
            .parse()
            .context("REVOCATION_CACHE_CAPACITY must be an integer")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let worker_poll_interval_ms = env::var("WORKER_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .context("WORKER_POLL_INTERVAL_MS must be an integer")?;

        let default_provider =
            env::var("AI_DEFAULT_PROVIDER").unwrap_or_else(|_| PROVIDER_OPENAI.to_string());
        let auto_extract = env::var("AI_AUTO_EXTRACT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        let conversation_retention_days = env::var("AI_CONVERSATION_RETENTION_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("AI_CONVERSATION_RETENTION_DAYS must be an integer")?;

        let mut providers = Vec::new();
        for (name, defaults) in [
            (
                PROVIDER_OPENAI,
                ProviderDefaults {
                    base_url: "https://api.openai.com/v1",
                    model: "gpt-4o-mini",
                    input_cost_per_million: 0.15,
                    output_cost_per_million: 0.60,
                },
            ),
            (
                PROVIDER_ANTHROPIC,
                ProviderDefaults {
                    base_url: "https://api.anthropic.com",
                    model: "claude-3-5-haiku-latest",
                    input_cost_per_million: 0.80,
                    output_cost_per_million: 4.00,
                },
            ),
        ] {
            if let Some(provider) = ProviderConfig::from_env(name, defaults)? {
                providers.push(provider);
            }
        }

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            environment,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            refresh_token_audience,
            access_token_ttl_minutes,
            refresh_token_ttl_hours,
            revocation_cache_capacity,
            cors_allowed_origin,
            worker_poll_interval_ms,
            ai: AiConfig {
                default_provider,
                auto_extract,
                conversation_retention_days,
                providers,
            },
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

impl ProviderConfig {
    fn from_env(name: &str, defaults: ProviderDefaults) -> Result<Option<Self>> {
        let prefix = name.to_ascii_uppercase();
        let var = |suffix: &str| env::var(format!("{prefix}_{suffix}")).ok();

        let Some(api_key) = var("API_KEY").filter(|key| !key.trim().is_empty()) else {
            return Ok(None);
        };

        Ok(Some(Self {
            name: name.to_string(),
            api_key,
            base_url: var("BASE_URL").unwrap_or_else(|| defaults.base_url.to_string()),
            model: var("MODEL").unwrap_or_else(|| defaults.model.to_string()),
            temperature: parse_or(var("TEMPERATURE"), 0.7, &prefix, "TEMPERATURE")?,
            max_tokens: parse_or(var("MAX_TOKENS"), 1000, &prefix, "MAX_TOKENS")?,
            timeout_secs: parse_or(var("TIMEOUT_SECS"), 60, &prefix, "TIMEOUT_SECS")?,
            input_cost_per_million: parse_or(
                var("INPUT_COST_PER_MILLION"),
                defaults.input_cost_per_million,
                &prefix,
                "INPUT_COST_PER_MILLION",
            )?,
            output_cost_per_million: parse_or(
                var("OUTPUT_COST_PER_MILLION"),
                defaults.output_cost_per_million,
                &prefix,
                "OUTPUT_COST_PER_MILLION",
            )?,
        }))
    }
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    default: T,
    prefix: &str,
    suffix: &str,
) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("{prefix}_{suffix} has an invalid value: {value}")),
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
