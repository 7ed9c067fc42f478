use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::CompanyScope,
    error::{AppError, AppResult},
    identity,
    models::{FeedbackCategory, FeedbackType, Note, NoteType},
    notes::{self, MentionEntry, NotePayload, Page, Paginated, TimelineEntry},
    state::AppState,
};

#[derive(Deserialize)]
pub struct NoteRequest {
    pub note_type: String,
    pub content: String,
    pub feedback_type: Option<String>,
    pub feedback_category: Option<String>,
}

impl NoteRequest {
    fn into_payload(self) -> AppResult<NotePayload> {
        Ok(NotePayload {
            note_type: NoteType::from_str(&self.note_type).map_err(AppError::bad_request)?,
            content: self.content,
            feedback_type: parse_optional::<FeedbackType>(self.feedback_type)?,
            feedback_category: parse_optional::<FeedbackCategory>(self.feedback_category)?,
        })
    }
}

fn parse_optional<T>(raw: Option<String>) -> AppResult<Option<T>>
where
    T: FromStr<Err = String>,
{
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => T::from_str(value).map(Some).map_err(AppError::bad_request),
    }
}

#[derive(Deserialize)]
pub struct TimelineQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    #[serde(default)]
    pub unified: bool,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NoteView {
    pub id: Uuid,
    pub person_id: Uuid,
    pub note_type: String,
    pub content: String,
    pub feedback_type: Option<String>,
    pub feedback_category: Option<String>,
    pub author_name: String,
    pub source_person_name: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NoteView {
    fn new(note: Note, person_id: Uuid, author_name: String, source_person_name: Option<String>) -> Self {
        Self {
            id: note.uuid,
            person_id,
            note_type: note.note_type,
            content: note.content,
            feedback_type: note.feedback_type,
            feedback_category: note.feedback_category,
            author_name,
            source_person_name,
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }
}

impl From<TimelineEntry> for NoteView {
    fn from(entry: TimelineEntry) -> Self {
        NoteView::new(
            entry.note,
            entry.subject_uuid,
            entry.author_name,
            entry.source_person_name,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct NoteWriteView {
    #[serde(flatten)]
    pub note: NoteView,
    pub mention_count: usize,
}

#[derive(Debug, Serialize)]
pub struct MentionView {
    pub note_id: Uuid,
    pub note_type: String,
    pub content: String,
    pub feedback_type: Option<String>,
    pub feedback_category: Option<String>,
    pub created_at: NaiveDateTime,
    /// Subject of the note the person was mentioned in.
    pub source_person_id: Uuid,
    pub source_person_name: String,
}

impl From<MentionEntry> for MentionView {
    fn from(entry: MentionEntry) -> Self {
        Self {
            note_id: entry.note.uuid,
            note_type: entry.note.note_type,
            content: entry.note.content,
            feedback_type: entry.note.feedback_type,
            feedback_category: entry.note.feedback_category,
            created_at: entry.note.created_at,
            source_person_id: entry.subject_uuid,
            source_person_name: entry.subject_name,
        }
    }
}

fn map_page<T, U: From<T>>(page: Paginated<T>) -> Paginated<U> {
    Paginated {
        items: page.items.into_iter().map(U::from).collect(),
        page: page.page,
        page_size: page.page_size,
        total: page.total,
    }
}

pub async fn create_note(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, person)): Path<(String, String)>,
    Json(request): Json<NoteRequest>,
) -> AppResult<(StatusCode, Json<NoteWriteView>)> {
    let person_uuid = identity::parse_external_id(&person, "person")?;
    let payload = request.into_payload()?;

    let mut conn = state.db()?;
    let subject = identity::find_active_person(&mut conn, scope.company.id, person_uuid)?;
    let write = notes::create_note(
        &mut conn,
        &subject,
        scope.user.id,
        &payload,
        state.config.ai.auto_extract,
    )?;

    tracing::info!(
        note_id = write.note.id,
        person_id = subject.id,
        mentions = write.mention_count,
        "note created"
    );
    Ok((
        StatusCode::CREATED,
        Json(NoteWriteView {
            note: NoteView::new(write.note, subject.uuid, scope.user.name, None),
            mention_count: write.mention_count,
        }),
    ))
}

pub async fn timeline(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, person)): Path<(String, String)>,
    Query(query): Query<TimelineQuery>,
) -> AppResult<Json<Paginated<NoteView>>> {
    let person_uuid = identity::parse_external_id(&person, "person")?;
    let page = Page::new(query.page, query.page_size)?;

    let mut conn = state.db()?;
    let person = identity::find_active_person(&mut conn, scope.company.id, person_uuid)?;
    let entries = notes::timeline(&mut conn, &person, page, query.unified)?;
    Ok(Json(map_page(entries)))
}

pub async fn mentions(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, person)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Paginated<MentionView>>> {
    let person_uuid = identity::parse_external_id(&person, "person")?;
    let page = Page::new(query.page, query.page_size)?;

    let mut conn = state.db()?;
    let person = identity::find_active_person(&mut conn, scope.company.id, person_uuid)?;
    let entries = notes::mentions_feed(&mut conn, &person, page)?;
    Ok(Json(map_page(entries)))
}

pub async fn get_note(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, note)): Path<(String, String)>,
) -> AppResult<Json<NoteView>> {
    let note_uuid = identity::parse_external_id(&note, "note")?;
    let mut conn = state.db()?;
    let entry = notes::find_live_note(&mut conn, scope.company.id, note_uuid)?;
    Ok(Json(NoteView::from(entry)))
}

pub async fn update_note(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, note)): Path<(String, String)>,
    Json(request): Json<NoteRequest>,
) -> AppResult<Json<NoteWriteView>> {
    let note_uuid = identity::parse_external_id(&note, "note")?;
    let payload = request.into_payload()?;

    let mut conn = state.db()?;
    let write = notes::update_note(
        &mut conn,
        scope.company.id,
        note_uuid,
        &payload,
        state.config.ai.auto_extract,
    )?;
    let entry = notes::find_live_note(&mut conn, scope.company.id, note_uuid)?;

    Ok(Json(NoteWriteView {
        note: NoteView::from(entry),
        mention_count: write.mention_count,
    }))
}

pub async fn delete_note(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, note)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let note_uuid = identity::parse_external_id(&note, "note")?;
    let mut conn = state.db()?;
    notes::delete_note(&mut conn, scope.company.id, note_uuid)?;
    tracing::info!(note_id = %note_uuid, "note deleted");
    Ok(StatusCode::NO_CONTENT)
}
