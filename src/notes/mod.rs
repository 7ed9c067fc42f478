//! Person-scoped notes and the mention index derived from their content.
//!
//! Notes are write-once-then-soft-delete. Every write that touches content
//! rebuilds the note's `note_mentions` rows inside the same transaction, so
//! the mention set of a live note always matches its current content.

pub mod mentions;
pub mod stats;

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::PgConnection;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::jobs::enqueue_note_extraction;
use crate::models::{
    FeedbackCategory, FeedbackType, NewNote, NewNoteMention, Note, NoteType, Person,
};
use crate::schema::{note_mentions, notes, people, users};

const NOTE_UUID_CONSTRAINT: &str = "notes_uuid_key";
const MAX_ID_ATTEMPTS: usize = 3;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone)]
pub struct NotePayload {
    pub note_type: NoteType,
    pub content: String,
    pub feedback_type: Option<FeedbackType>,
    pub feedback_category: Option<FeedbackCategory>,
}

impl NotePayload {
    pub fn validate(&self) -> AppResult<()> {
        if self.content.trim().is_empty() {
            return Err(AppError::bad_request("content must not be empty"));
        }
        if self.note_type != NoteType::Feedback
            && (self.feedback_type.is_some() || self.feedback_category.is_some())
        {
            return Err(AppError::bad_request(
                "feedback_type and feedback_category are only allowed on feedback notes",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NoteWrite {
    pub note: Note,
    pub mention_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub page_size: i64,
}

impl Page {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> AppResult<Self> {
        let page = page.unwrap_or(1);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page < 1 {
            return Err(AppError::bad_request("page must be at least 1"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(AppError::bad_request(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if (page - 1).checked_mul(page_size).is_none() {
            return Err(AppError::bad_request("page is out of range"));
        }
        Ok(Self { page, page_size })
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub note: Note,
    pub subject_uuid: Uuid,
    pub author_name: String,
    /// Subject's name when the entry is a mention of the requested person.
    pub source_person_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MentionEntry {
    pub note: Note,
    pub subject_uuid: Uuid,
    pub subject_name: String,
}

#[derive(Debug, Error)]
enum WriteError {
    #[error("duplicate note external id")]
    DuplicateId,
    #[error(transparent)]
    App(#[from] AppError),
}

impl From<DieselError> for WriteError {
    fn from(value: DieselError) -> Self {
        match &value {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)
                if info.constraint_name() == Some(NOTE_UUID_CONSTRAINT) =>
            {
                WriteError::DuplicateId
            }
            _ => WriteError::App(value.into()),
        }
    }
}

/// Creates a live note about `subject` and materialises its mentions.
pub fn create_note(
    conn: &mut PgConnection,
    subject: &Person,
    author_id: i64,
    payload: &NotePayload,
    enqueue_extraction: bool,
) -> AppResult<NoteWrite> {
    payload.validate()?;
    if !subject.is_active {
        return Err(AppError::not_found());
    }

    let mut attempts = 0;
    loop {
        attempts += 1;
        let new_note = NewNote {
            uuid: Uuid::new_v4(),
            company_id: subject.company_id,
            person_id: subject.id,
            user_id: author_id,
            note_type: payload.note_type.as_str().to_string(),
            content: payload.content.clone(),
            feedback_type: payload.feedback_type.map(|v| v.as_str().to_string()),
            feedback_category: payload.feedback_category.map(|v| v.as_str().to_string()),
        };

        let result = conn.transaction::<NoteWrite, WriteError, _>(|conn| {
            let note: Note = diesel::insert_into(notes::table)
                .values(&new_note)
                .returning(Note::as_returning())
                .get_result(conn)?;
            let mention_count = replace_mentions(conn, &note)?;
            if enqueue_extraction {
                enqueue_note_extraction(conn, note.id).map_err(AppError::from)?;
            }
            Ok(NoteWrite {
                note,
                mention_count,
            })
        });

        match result {
            Ok(write) => return Ok(write),
            Err(WriteError::DuplicateId) if attempts < MAX_ID_ATTEMPTS => {
                debug!(attempts, "note id collision, retrying with a fresh id");
            }
            Err(WriteError::DuplicateId) => {
                return Err(AppError::conflict("could not allocate a unique note id"))
            }
            Err(WriteError::App(err)) => return Err(err),
        }
    }
}

/// Overwrites the mutable fields of a live note and rebuilds its mentions.
pub fn update_note(
    conn: &mut PgConnection,
    company_id: i64,
    note_uuid: Uuid,
    payload: &NotePayload,
    enqueue_extraction: bool,
) -> AppResult<NoteWrite> {
    payload.validate()?;

    conn.transaction::<NoteWrite, AppError, _>(|conn| {
        let existing: Note = notes::table
            .filter(notes::uuid.eq(note_uuid))
            .filter(notes::company_id.eq(company_id))
            .filter(notes::deleted_at.is_null())
            .select(Note::as_select())
            .for_update()
            .first(conn)?;

        let note: Note = diesel::update(notes::table.find(existing.id))
            .set((
                notes::note_type.eq(payload.note_type.as_str()),
                notes::content.eq(&payload.content),
                notes::feedback_type.eq(payload.feedback_type.map(|v| v.as_str())),
                notes::feedback_category.eq(payload.feedback_category.map(|v| v.as_str())),
                notes::updated_at.eq(Utc::now().naive_utc()),
            ))
            .returning(Note::as_returning())
            .get_result(conn)?;

        let mention_count = replace_mentions(conn, &note)?;
        if enqueue_extraction {
            enqueue_note_extraction(conn, note.id)?;
        }

        Ok(NoteWrite {
            note,
            mention_count,
        })
    })
}

/// Soft-deletes a live note. Its mention rows are removed in the same
/// transaction.
pub fn delete_note(conn: &mut PgConnection, company_id: i64, note_uuid: Uuid) -> AppResult<()> {
    conn.transaction::<(), AppError, _>(|conn| {
        let now = Utc::now().naive_utc();
        let note_id: i64 = diesel::update(
            notes::table
                .filter(notes::uuid.eq(note_uuid))
                .filter(notes::company_id.eq(company_id))
                .filter(notes::deleted_at.is_null()),
        )
        .set((notes::deleted_at.eq(now), notes::updated_at.eq(now)))
        .returning(notes::id)
        .get_result(conn)?;

        diesel::delete(note_mentions::table.filter(note_mentions::note_id.eq(note_id)))
            .execute(conn)?;
        Ok(())
    })
}

pub fn find_live_note(
    conn: &mut PgConnection,
    company_id: i64,
    note_uuid: Uuid,
) -> AppResult<TimelineEntry> {
    let (note, author_name, subject_uuid): (Note, String, Uuid) = notes::table
        .inner_join(users::table)
        .inner_join(people::table)
        .filter(notes::uuid.eq(note_uuid))
        .filter(notes::company_id.eq(company_id))
        .filter(notes::deleted_at.is_null())
        .select((Note::as_select(), users::name, people::uuid))
        .first(conn)?;

    Ok(TimelineEntry {
        note,
        subject_uuid,
        author_name,
        source_person_name: None,
    })
}

pub fn find_live_note_by_id(conn: &mut PgConnection, note_id: i64) -> AppResult<Note> {
    notes::table
        .find(note_id)
        .filter(notes::deleted_at.is_null())
        .select(Note::as_select())
        .first(conn)
        .map_err(AppError::from)
}

/// Notes about `person`, newest first. In unified mode the notes in which
/// the person is mentioned are interleaved and tagged with their subject.
pub fn timeline(
    conn: &mut PgConnection,
    person: &Person,
    page: Page,
    unified: bool,
) -> AppResult<Paginated<TimelineEntry>> {
    let person_id = person.id;
    let mentioned_in = || {
        note_mentions::table
            .filter(note_mentions::mentioned_person_id.eq(person_id))
            .select(note_mentions::note_id)
    };

    // Notes whose subject was removed drop out of every feed.
    let mut count_query = notes::table
        .inner_join(people::table)
        .filter(notes::deleted_at.is_null())
        .filter(people::is_active.eq(true))
        .into_boxed();
    let mut rows_query = notes::table
        .inner_join(users::table)
        .inner_join(people::table)
        .filter(notes::deleted_at.is_null())
        .filter(people::is_active.eq(true))
        .into_boxed();

    if unified {
        count_query = count_query.filter(
            notes::person_id
                .eq(person_id)
                .or(notes::id.eq_any(mentioned_in())),
        );
        rows_query = rows_query.filter(
            notes::person_id
                .eq(person_id)
                .or(notes::id.eq_any(mentioned_in())),
        );
    } else {
        count_query = count_query.filter(notes::person_id.eq(person_id));
        rows_query = rows_query.filter(notes::person_id.eq(person_id));
    }

    let total: i64 = count_query.count().get_result(conn)?;
    let rows: Vec<(Note, String, String, Uuid)> = rows_query
        .select((Note::as_select(), users::name, people::name, people::uuid))
        .order((notes::created_at.desc(), notes::id.desc()))
        .limit(page.page_size)
        .offset(page.offset())
        .load(conn)?;

    let items = rows
        .into_iter()
        .map(|(note, author_name, subject_name, subject_uuid)| {
            let source_person_name = (note.person_id != person_id).then_some(subject_name);
            TimelineEntry {
                note,
                subject_uuid,
                author_name,
                source_person_name,
            }
        })
        .collect();

    Ok(Paginated {
        items,
        page: page.page,
        page_size: page.page_size,
        total,
    })
}

/// Live notes in which `person` is mentioned while someone else is subject.
pub fn mentions_feed(
    conn: &mut PgConnection,
    person: &Person,
    page: Page,
) -> AppResult<Paginated<MentionEntry>> {
    let total: i64 = note_mentions::table
        .inner_join(notes::table)
        .inner_join(people::table.on(people::id.eq(notes::person_id)))
        .filter(note_mentions::mentioned_person_id.eq(person.id))
        .filter(notes::deleted_at.is_null())
        .filter(people::is_active.eq(true))
        .count()
        .get_result(conn)?;

    let rows: Vec<(Note, Uuid, String)> = note_mentions::table
        .inner_join(notes::table)
        .inner_join(people::table.on(people::id.eq(notes::person_id)))
        .filter(note_mentions::mentioned_person_id.eq(person.id))
        .filter(notes::deleted_at.is_null())
        .filter(people::is_active.eq(true))
        .select((Note::as_select(), people::uuid, people::name))
        .order((notes::created_at.desc(), notes::id.desc()))
        .limit(page.page_size)
        .offset(page.offset())
        .load(conn)?;

    let items = rows
        .into_iter()
        .map(|(note, subject_uuid, subject_name)| MentionEntry {
            note,
            subject_uuid,
            subject_name,
        })
        .collect();

    Ok(Paginated {
        items,
        page: page.page,
        page_size: page.page_size,
        total,
    })
}

/// Most recent live notes about a person, newest first.
pub fn recent_notes(
    conn: &mut PgConnection,
    person_id: i64,
    limit: i64,
) -> AppResult<Vec<Note>> {
    notes::table
        .filter(notes::person_id.eq(person_id))
        .filter(notes::deleted_at.is_null())
        .select(Note::as_select())
        .order((notes::created_at.desc(), notes::id.desc()))
        .limit(limit)
        .load(conn)
        .map_err(AppError::from)
}

pub fn mention_person_ids(conn: &mut PgConnection, note_id: i64) -> AppResult<Vec<i64>> {
    note_mentions::table
        .filter(note_mentions::note_id.eq(note_id))
        .select(note_mentions::mentioned_person_id)
        .order(note_mentions::mentioned_person_id.asc())
        .load(conn)
        .map_err(AppError::from)
}

/// Replaces the mention rows of `note` with the set parsed from its content.
/// Unknown, inactive, cross-company and self references are dropped.
fn replace_mentions(conn: &mut PgConnection, note: &Note) -> QueryResult<usize> {
    diesel::delete(note_mentions::table.filter(note_mentions::note_id.eq(note.id)))
        .execute(conn)?;

    let referenced = mentions::mentioned_person_ids(&note.content);
    if referenced.is_empty() {
        return Ok(0);
    }

    let person_ids: Vec<i64> = people::table
        .filter(people::uuid.eq_any(&referenced))
        .filter(people::company_id.eq(note.company_id))
        .filter(people::is_active.eq(true))
        .filter(people::id.ne(note.person_id))
        .select(people::id)
        .load(conn)?;
    if person_ids.is_empty() {
        return Ok(0);
    }

    let rows: Vec<NewNoteMention<'_>> = person_ids
        .into_iter()
        .map(|mentioned_person_id| NewNoteMention {
            note_id: note.id,
            mentioned_person_id,
            source_person_id: note.person_id,
            full_content: &note.content,
        })
        .collect();

    diesel::insert_into(note_mentions::table)
        .values(&rows)
        .execute(conn)
}

pub fn format_date(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(note_type: NoteType) -> NotePayload {
        NotePayload {
            note_type,
            content: "Discussed the roadmap".into(),
            feedback_type: None,
            feedback_category: None,
        }
    }

    #[test]
    fn feedback_fields_require_feedback_type() {
        let mut observation = payload(NoteType::Observation);
        observation.feedback_type = Some(FeedbackType::Positive);
        assert!(observation.validate().is_err());

        let mut feedback = payload(NoteType::Feedback);
        feedback.feedback_type = Some(FeedbackType::Constructive);
        feedback.feedback_category = Some(FeedbackCategory::Skill);
        assert!(feedback.validate().is_ok());
    }

    #[test]
    fn blank_content_is_rejected() {
        let mut blank = payload(NoteType::OneOnOne);
        blank.content = "   ".into();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn page_defaults_and_bounds() {
        let page = Page::new(None, None).unwrap();
        assert_eq!(page, Page { page: 1, page_size: DEFAULT_PAGE_SIZE });
        assert_eq!(Page::new(Some(3), Some(10)).unwrap().offset(), 20);
        assert!(Page::new(Some(0), None).is_err());
        assert!(Page::new(None, Some(MAX_PAGE_SIZE + 1)).is_err());
    }

    #[test]
    fn huge_page_numbers_are_rejected() {
        assert!(Page::new(Some(i64::MAX), Some(MAX_PAGE_SIZE)).is_err());
        assert!(Page::new(Some(i64::MAX), Some(1)).is_ok());

        let last = i64::MAX / MAX_PAGE_SIZE + 1;
        let page = Page::new(Some(last), Some(MAX_PAGE_SIZE)).unwrap();
        assert!(page.offset() >= 0);
        assert!(Page::new(Some(last + 1), Some(MAX_PAGE_SIZE)).is_err());
    }
}
