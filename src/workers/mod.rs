use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    error::AppResult,
    jobs::{reserve_job, settle_job, JobSettlement},
    models::Job,
    state::AppState,
};

pub mod extract;

/// Jobs that keep failing transiently are given up after this many runs.
pub const MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, PartialEq)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: AppState, job: Job) -> JobExecution;
}

pub struct Worker {
    state: AppState,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: AppState,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!(job_types = ?self.handlers.keys().collect::<Vec<_>>(), "worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Reserves and runs at most one job. Returns whether a job was found.
    pub async fn tick(&self) -> AppResult<bool> {
        let job_types: Vec<&'static str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let reserved = self
            .state
            .with_db(move |conn| reserve_job(conn, &job_types).map_err(Into::into))
            .await?;
        let Some(job) = reserved else {
            return Ok(false);
        };

        let execution = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => handler.handle(self.state.clone(), job.clone()).await,
            None => JobExecution::Failed {
                error: "no handler registered".to_string(),
            },
        };
        let execution = give_up_after(execution, job.attempts, MAX_ATTEMPTS);
        self.settle(job, execution).await?;
        Ok(true)
    }

    async fn settle(&self, job: Job, execution: JobExecution) -> AppResult<()> {
        let job_id = job.id;
        let job_type = job.job_type;
        match &execution {
            JobExecution::Success => info!(%job_id, %job_type, "job completed"),
            JobExecution::Retry { error, .. } => {
                warn!(%job_id, %job_type, attempts = job.attempts, %error, "job will retry")
            }
            JobExecution::Failed { error } => {
                error!(%job_id, %job_type, attempts = job.attempts, %error, "job failed")
            }
        }

        let settlement = settlement_for(execution);
        self.state
            .with_db(move |conn| settle_job(conn, job_id, &settlement).map_err(Into::into))
            .await
    }
}

fn settlement_for(execution: JobExecution) -> JobSettlement {
    match execution {
        JobExecution::Success => JobSettlement::Succeeded,
        JobExecution::Retry { delay, error } => {
            let delay =
                ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(60));
            JobSettlement::RetryAt {
                run_after: (Utc::now() + delay).naive_utc(),
                error,
            }
        }
        JobExecution::Failed { error } => JobSettlement::Failed { error },
    }
}

/// Turns a retry into a permanent failure once the attempt budget is spent.
/// `attempts` comes from the reserved row, which already counts this run.
fn give_up_after(execution: JobExecution, attempts: i32, max_attempts: i32) -> JobExecution {
    match execution {
        JobExecution::Retry { error, .. } if attempts >= max_attempts => JobExecution::Failed {
            error: format!("giving up after {attempts} attempts: {error}"),
        },
        other => other,
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![Arc::new(extract::ExtractNoteAttributesJob::new())]
}
