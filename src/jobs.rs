//! Postgres-backed background queue. Rows are reserved with
//! `FOR UPDATE SKIP LOCKED`, so any number of workers can poll the table.

use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const JOB_EXTRACT_NOTE_ATTRIBUTES: &str = "extract-note-attributes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

/// Payload of [`JOB_EXTRACT_NOTE_ATTRIBUTES`]; `note_id` is the internal id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractNotePayload {
    pub note_id: i64,
}

/// How a reserved job leaves the `processing` state.
#[derive(Debug, Clone, PartialEq)]
pub enum JobSettlement {
    Succeeded,
    RetryAt { run_after: NaiveDateTime, error: String },
    Failed { error: String },
}

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

impl From<JobQueueError> for AppError {
    fn from(value: JobQueueError) -> Self {
        match value {
            JobQueueError::Database(err) => AppError::from(err),
            JobQueueError::Payload(err) => AppError::internal(err),
        }
    }
}

pub fn enqueue_job<P: Serialize>(
    conn: &mut PgConnection,
    job_type: &str,
    payload: &P,
    run_after: Option<NaiveDateTime>,
) -> JobQueueResult<Job> {
    let new_job = NewJob {
        id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        payload: serde_json::to_value(payload)?,
        status: JobStatus::Queued.as_str().to_string(),
        run_after: run_after.unwrap_or_else(|| Utc::now().naive_utc()),
    };

    Ok(diesel::insert_into(jobs::table)
        .values(&new_job)
        .returning(Job::as_returning())
        .get_result(conn)?)
}

/// Queues attribute extraction for a note unless one is already waiting.
/// Repeated edits of a note before the worker gets to it collapse into the
/// job that is still queued, which reads the latest content when it runs.
pub fn enqueue_note_extraction(conn: &mut PgConnection, note_id: i64) -> JobQueueResult<Option<Job>> {
    let payload = ExtractNotePayload { note_id };
    let encoded = serde_json::to_value(&payload)?;

    let pending: i64 = jobs::table
        .filter(jobs::job_type.eq(JOB_EXTRACT_NOTE_ATTRIBUTES))
        .filter(jobs::status.eq(JobStatus::Queued.as_str()))
        .filter(jobs::payload.eq(encoded))
        .count()
        .get_result(conn)?;
    if pending > 0 {
        return Ok(None);
    }

    enqueue_job(conn, JOB_EXTRACT_NOTE_ATTRIBUTES, &payload, None).map(Some)
}

/// Claims the oldest runnable job of the given types and bumps its attempt
/// counter.
pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now().naive_utc();

    conn.transaction(|conn| {
        let candidate = jobs::table
            .filter(jobs::status.eq(JobStatus::Queued.as_str()))
            .filter(jobs::run_after.le(now))
            .filter(jobs::job_type.eq_any(job_types))
            .order(jobs::run_after.asc())
            .select(Job::as_select())
            .for_update()
            .skip_locked()
            .first(conn)
            .optional()?;

        let Some(job) = candidate else {
            return Ok(None);
        };

        let reserved = diesel::update(jobs::table.find(job.id))
            .set((
                jobs::status.eq(JobStatus::Processing.as_str()),
                jobs::attempts.eq(job.attempts + 1),
                jobs::updated_at.eq(now),
            ))
            .returning(Job::as_returning())
            .get_result(conn)?;
        Ok(Some(reserved))
    })
}

pub fn settle_job(
    conn: &mut PgConnection,
    job_id: Uuid,
    settlement: &JobSettlement,
) -> JobQueueResult<()> {
    let now = Utc::now().naive_utc();
    let target = jobs::table.find(job_id);

    match settlement {
        JobSettlement::Succeeded => diesel::update(target)
            .set((
                jobs::status.eq(JobStatus::Succeeded.as_str()),
                jobs::last_error.eq(None::<String>),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?,
        JobSettlement::RetryAt { run_after, error } => diesel::update(target)
            .set((
                jobs::status.eq(JobStatus::Queued.as_str()),
                jobs::run_after.eq(*run_after),
                jobs::last_error.eq(Some(error.as_str())),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?,
        JobSettlement::Failed { error } => diesel::update(target)
            .set((
                jobs::status.eq(JobStatus::Failed.as_str()),
                jobs::last_error.eq(Some(error.as_str())),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?,
    };
    Ok(())
}

/// Deletes succeeded jobs last touched before `before`. Failed rows are kept
/// for inspection.
pub fn purge_succeeded_jobs(conn: &mut PgConnection, before: NaiveDateTime) -> JobQueueResult<usize> {
    Ok(diesel::delete(
        jobs::table
            .filter(jobs::status.eq(JobStatus::Succeeded.as_str()))
            .filter(jobs::updated_at.lt(before)),
    )
    .execute(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_payload_uses_internal_note_id() {
        let encoded = serde_json::to_value(ExtractNotePayload { note_id: 42 }).unwrap();
        assert_eq!(encoded, serde_json::json!({ "note_id": 42 }));

        let decoded: ExtractNotePayload = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.note_id, 42);
    }

    #[test]
    fn statuses_match_stored_values() {
        assert_eq!(JobStatus::Queued.as_str(), "queued");
        assert_eq!(JobStatus::Processing.as_str(), "processing");
        assert_eq!(JobStatus::Succeeded.as_str(), "succeeded");
        assert_eq!(JobStatus::Failed.as_str(), "failed");
    }
}
