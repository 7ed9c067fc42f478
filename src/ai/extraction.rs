use std::time::Instant;

use diesel::prelude::*;
use tracing::{info, warn};
use uuid::Uuid;

use super::prompts::active_prompt;
use super::usage::{record_usage, UsageRecord};
use super::PromptSettings;
use crate::error::AppResult;
use crate::identity;
use crate::models::{AttributeSource, PersonAttribute, PromptType, RequestType};
use crate::notes;
use crate::people::attributes::upsert_attributes;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub attributes: Vec<PersonAttribute>,
    pub usage_id: Uuid,
}

/// Extracts profile attributes from a live note and upserts them onto its
/// subject. Unreadable model output yields no attributes; transport
/// failures surface as provider errors.
pub async fn extract_note_attributes(
    state: &AppState,
    note_id: i64,
    requested_by: Option<i64>,
    provider_name: Option<&str>,
) -> AppResult<ExtractionOutcome> {
    let provider = state.ai()?.get(provider_name)?;

    let (note, prompt, company_id) = state
        .with_db(move |conn| {
            let note = notes::find_live_note_by_id(conn, note_id)?;
            let prompt = active_prompt(conn, PromptType::AttributeExtraction)?;
            let subject = identity::find_person_by_id(conn, note.person_id)?;
            Ok((note, prompt, subject.company_id))
        })
        .await?;

    let settings = PromptSettings::from(&prompt);
    let started = Instant::now();
    let (extracted, usage) = provider.extract_attributes(&note.content, &settings).await?;
    let elapsed_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

    let record = UsageRecord {
        uuid: Uuid::new_v4(),
        user_id: requested_by.unwrap_or(note.user_id),
        company_id,
        prompt_id: prompt.id,
        person_id: Some(note.person_id),
        request_type: RequestType::Extraction,
        provider: provider.name().to_string(),
        usage,
        response_time_ms: elapsed_ms,
    };
    let usage_id = record.uuid;

    let mut entries: Vec<(String, String)> = extracted.into_iter().collect();
    entries.sort();
    let subject_id = note.person_id;
    let source_note_id = note.id;

    let attributes = state
        .with_db(move |conn| {
            if let Err(err) = record_usage(conn, &record) {
                warn!(note_id = source_note_id, usage_id = %record.uuid, error = %err, "failed to record AI usage");
            }
            if entries.is_empty() {
                return Ok(Vec::new());
            }
            let attributes = conn.transaction(|conn| {
                upsert_attributes(
                    conn,
                    subject_id,
                    &entries,
                    AttributeSource::AiExtracted,
                    Some(source_note_id),
                )
            })?;
            Ok(attributes)
        })
        .await?;

    info!(
        note_id,
        person_id = subject_id,
        extracted = attributes.len(),
        provider = %provider.name(),
        elapsed_ms,
        "note attributes extracted"
    );

    Ok(ExtractionOutcome {
        attributes,
        usage_id,
    })
}
