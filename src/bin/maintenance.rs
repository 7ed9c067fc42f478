use std::env;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use tracing_subscriber::EnvFilter;

use leadhub::{
    ai::{prompts::activate_prompt, usage::purge_expired_conversations},
    config::AppConfig,
    db,
    jobs::purge_succeeded_jobs,
};

const USAGE: &str =
    "Usage: maintenance <migrate | activate-prompt <prompt-id> | purge-conversations | purge-jobs [days]>";
const DEFAULT_JOB_RETENTION_DAYS: i64 = 7;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("migrate") => migrate()?,
        Some("activate-prompt") => {
            let raw = args.next().context(USAGE)?;
            let prompt_id: i64 = raw
                .parse()
                .with_context(|| format!("invalid prompt id '{raw}'"))?;
            activate(prompt_id)?;
        }
        Some("purge-conversations") => purge()?,
        Some("purge-jobs") => {
            let days = match args.next() {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid retention days '{raw}'"))?,
                None => DEFAULT_JOB_RETENTION_DAYS,
            };
            purge_jobs(days)?;
        }
        Some(cmd) => bail!("unknown command: {cmd}\n{USAGE}"),
        None => bail!("{USAGE}"),
    }

    Ok(())
}

fn connect() -> Result<db::PgPooledConnection> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    pool.get().context("failed to get database connection")
}

fn migrate() -> Result<()> {
    let mut conn = connect()?;
    let applied = db::run_migrations(&mut conn)?;
    if applied.is_empty() {
        println!("Database is up to date.");
    } else {
        for version in &applied {
            println!("Applied migration {version}");
        }
    }
    Ok(())
}

fn activate(prompt_id: i64) -> Result<()> {
    let mut conn = connect()?;
    let prompt = activate_prompt(&mut conn, prompt_id)
        .map_err(|err| anyhow::anyhow!("failed to activate prompt {prompt_id}: {err}"))?;
    println!(
        "Prompt {} (version {}) is now the active {} prompt.",
        prompt.id, prompt.version, prompt.prompt_type
    );
    Ok(())
}

fn purge() -> Result<()> {
    let mut conn = connect()?;
    let removed = purge_expired_conversations(&mut conn, Utc::now().naive_utc())
        .context("failed to purge conversations")?;
    println!("Removed {removed} expired conversations.");
    Ok(())
}

fn purge_jobs(days: i64) -> Result<()> {
    let mut conn = connect()?;
    let before = (Utc::now() - Duration::days(days)).naive_utc();
    let removed = purge_succeeded_jobs(&mut conn, before).context("failed to purge jobs")?;
    println!("Removed {removed} succeeded jobs older than {days} days.");
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
