use std::collections::BTreeMap;
use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    ai::{
        coach::{chat_with_coach, CoachReply},
        extraction::extract_note_attributes,
        usage::{self, UsagePeriod, UsageReport},
        ChatRequest,
    },
    auth::CompanyScope,
    error::{AppError, AppResult},
    identity,
    models::FeedbackVerdict,
    notes,
    state::AppState,
};

#[derive(Deserialize)]
pub struct ChatBody {
    pub message: String,
    pub provider: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct ExtractBody {
    pub provider: Option<String>,
}

#[derive(Deserialize)]
pub struct UsageQuery {
    pub period: Option<String>,
}

#[derive(Deserialize)]
pub struct FeedbackBody {
    pub feedback: String,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExtractionView {
    pub attributes: BTreeMap<String, String>,
    pub usage_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct FeedbackView {
    pub usage_id: Uuid,
    pub feedback: Option<String>,
    pub feedback_comment: Option<String>,
}

pub async fn chat(
    State(state): State<AppState>,
    scope: CompanyScope,
    Json(body): Json<ChatBody>,
) -> AppResult<Json<CoachReply>> {
    let reply = chat_with_coach(
        &state,
        scope.user.id,
        scope.company.id,
        None,
        ChatRequest {
            message: body.message,
        },
        body.provider.as_deref(),
    )
    .await?;
    Ok(Json(reply))
}

pub async fn person_chat(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, person)): Path<(String, String)>,
    Json(body): Json<ChatBody>,
) -> AppResult<Json<CoachReply>> {
    let person_uuid = identity::parse_external_id(&person, "person")?;
    let company_id = scope.company.id;
    let person = state
        .with_db(move |conn| identity::find_active_person(conn, company_id, person_uuid))
        .await?;

    let reply = chat_with_coach(
        &state,
        scope.user.id,
        company_id,
        Some(person),
        ChatRequest {
            message: body.message,
        },
        body.provider.as_deref(),
    )
    .await?;
    Ok(Json(reply))
}

/// Runs extraction on demand; the body is optional.
pub async fn extract(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, note)): Path<(String, String)>,
    body: Option<Json<ExtractBody>>,
) -> AppResult<Json<ExtractionView>> {
    let note_uuid = identity::parse_external_id(&note, "note")?;
    let company_id = scope.company.id;
    let entry = state
        .with_db(move |conn| notes::find_live_note(conn, company_id, note_uuid))
        .await?;

    let Json(body) = body.unwrap_or_default();
    let outcome = extract_note_attributes(
        &state,
        entry.note.id,
        Some(scope.user.id),
        body.provider.as_deref(),
    )
    .await?;

    Ok(Json(ExtractionView {
        attributes: outcome
            .attributes
            .into_iter()
            .map(|attribute| (attribute.key, attribute.value))
            .collect(),
        usage_id: outcome.usage_id,
    }))
}

pub async fn usage_report(
    State(state): State<AppState>,
    scope: CompanyScope,
    Query(query): Query<UsageQuery>,
) -> AppResult<Json<UsageReport>> {
    let period = match query.period.as_deref().map(str::trim) {
        None | Some("") => UsagePeriod::Month,
        Some(raw) => UsagePeriod::from_str(raw)?,
    };
    let user_id = scope.user.id;
    let report = state
        .with_db(move |conn| usage::usage_report(conn, user_id, period, Utc::now()))
        .await?;
    Ok(Json(report))
}

pub async fn feedback(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, usage_id)): Path<(String, String)>,
    Json(body): Json<FeedbackBody>,
) -> AppResult<Json<FeedbackView>> {
    let usage_uuid = identity::parse_external_id(&usage_id, "usage")?;
    let verdict = FeedbackVerdict::from_str(body.feedback.trim()).map_err(AppError::bad_request)?;
    let (user_id, company_id) = (scope.user.id, scope.company.id);

    let tracker = state
        .with_db(move |conn| {
            usage::send_feedback(
                conn,
                user_id,
                company_id,
                usage_uuid,
                verdict,
                body.comment.as_deref(),
            )
        })
        .await?;

    tracing::info!(usage_id = %tracker.uuid, feedback = verdict.as_str(), "AI feedback recorded");
    Ok(Json(FeedbackView {
        usage_id: tracker.uuid,
        feedback: tracker.feedback,
        feedback_comment: tracker.feedback_comment,
    }))
}
