use std::time::Instant;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::context::{build_context_prompt, load_person_context};
use super::prompts::active_prompt;
use super::usage::{record_conversation, record_usage, UsageRecord};
use super::{ChatRequest, PromptSettings};
use crate::error::{AppError, AppResult};
use crate::models::{Person, PromptType, RequestType};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct CoachReply {
    pub response: String,
    pub usage_id: Uuid,
}

/// One leadership-coach exchange. Usage and conversation rows are written
/// after the provider answers; failing to write them never fails the call.
pub async fn chat_with_coach(
    state: &AppState,
    user_id: i64,
    company_id: i64,
    person: Option<Person>,
    request: ChatRequest,
    provider_name: Option<&str>,
) -> AppResult<CoachReply> {
    if request.message.trim().is_empty() {
        return Err(AppError::bad_request("message must not be empty"));
    }
    let provider = state.ai()?.get(provider_name)?;

    let person_id = person.as_ref().map(|person| person.id);
    let (prompt, context_prompt) = state
        .with_db(move |conn| {
            let prompt = active_prompt(conn, PromptType::LeadershipCoach)?;
            let context_prompt = match person {
                Some(person) => {
                    let person_id = person.id;
                    match load_person_context(conn, person) {
                        Ok(context) => build_context_prompt(&context),
                        Err(err) => {
                            warn!(person_id, error = %err, "person context unavailable, continuing without it");
                            String::new()
                        }
                    }
                }
                None => String::new(),
            };
            Ok((prompt, context_prompt))
        })
        .await?;

    let settings = PromptSettings::from(&prompt);
    let started = Instant::now();
    let (response, usage) = provider.chat(&request, &settings, &context_prompt).await?;
    let elapsed_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

    let record = UsageRecord {
        uuid: Uuid::new_v4(),
        user_id,
        company_id,
        prompt_id: prompt.id,
        person_id,
        request_type: RequestType::Chat,
        provider: provider.name().to_string(),
        usage,
        response_time_ms: elapsed_ms,
    };
    let usage_id = record.uuid;
    let expires_at =
        (Utc::now() + Duration::days(state.config.ai.conversation_retention_days)).naive_utc();
    let user_message = request.message;
    let reply = response.clone();

    let logged = state
        .with_db(move |conn| {
            let tracker = match record_usage(conn, &record) {
                Ok(tracker) => tracker,
                Err(err) => {
                    warn!(user_id, usage_id = %record.uuid, error = %err, "failed to record AI usage");
                    return Ok(());
                }
            };
            if let Err(err) =
                record_conversation(conn, tracker.id, &user_message, &reply, expires_at)
            {
                warn!(user_id, usage_id = %record.uuid, error = %err, "failed to store AI conversation");
            }
            Ok(())
        })
        .await;
    if let Err(err) = logged {
        warn!(user_id, error = %err, "AI usage logging did not run");
    }

    info!(
        user_id,
        company_id,
        person_id,
        provider = %provider.name(),
        tokens = usage.total_tokens,
        elapsed_ms,
        "coach reply delivered"
    );

    Ok(CoachReply { response, usage_id })
}
