use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{JobExecution, JobHandler};
use crate::{
    ai::extraction::extract_note_attributes,
    error::AppError,
    jobs::{ExtractNotePayload, JOB_EXTRACT_NOTE_ATTRIBUTES},
    models::Job,
    state::AppState,
};

const RETRY_DELAY: Duration = Duration::from_secs(60);

pub struct ExtractNoteAttributesJob;

impl ExtractNoteAttributesJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExtractNoteAttributesJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for ExtractNoteAttributesJob {
    fn job_type(&self) -> &'static str {
        JOB_EXTRACT_NOTE_ATTRIBUTES
    }

    async fn handle(&self, state: AppState, job: Job) -> JobExecution {
        let payload: ExtractNotePayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid extraction payload: {err}"),
                }
            }
        };

        match extract_note_attributes(&state, payload.note_id, None, None).await {
            Ok(outcome) => {
                info!(
                    job_id = %job.id,
                    note_id = payload.note_id,
                    usage_id = %outcome.usage_id,
                    extracted = outcome.attributes.len(),
                    "extraction job finished"
                );
                JobExecution::Success
            }
            Err(err) => classify_failure(&err),
        }
    }
}

/// Server-side and provider failures are retried. A note that is gone, or a
/// request the flow rejects outright, will not get better by waiting.
fn classify_failure(err: &AppError) -> JobExecution {
    if err.status().is_server_error() {
        JobExecution::Retry {
            delay: RETRY_DELAY,
            error: err.message().to_string(),
        }
    } else {
        JobExecution::Failed {
            error: err.message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiError;

    #[test]
    fn missing_note_fails_permanently() {
        assert!(matches!(
            classify_failure(&AppError::not_found()),
            JobExecution::Failed { .. }
        ));
    }

    #[test]
    fn provider_outage_is_retried() {
        let err = AppError::from(AiError::Unreachable("connection refused".into()));
        match classify_failure(&err) {
            JobExecution::Retry { delay, .. } => assert_eq!(delay, RETRY_DELAY),
            other => panic!("unexpected execution: {other:?}"),
        }
    }

    #[test]
    fn rejected_requests_are_not_retried() {
        let err = AppError::unprocessable("no active prompt configured for attribute_extraction");
        assert!(matches!(classify_failure(&err), JobExecution::Failed { .. }));
    }
}
