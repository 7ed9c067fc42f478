use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel::PgConnection;

use crate::error::{AppError, AppResult};
use crate::models::{AttributeSource, NewPersonAttribute, PersonAttribute};
use crate::schema::person_attributes;

const MAX_KEY_LENGTH: usize = 255;

pub fn list_attributes(conn: &mut PgConnection, person_id: i64) -> AppResult<Vec<PersonAttribute>> {
    person_attributes::table
        .filter(person_attributes::person_id.eq(person_id))
        .select(PersonAttribute::as_select())
        .order(person_attributes::key.asc())
        .load(conn)
        .map_err(AppError::from)
}

pub fn validate_entries(entries: &[(String, String)]) -> AppResult<()> {
    for (key, value) in entries {
        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::bad_request("attribute key must not be empty"));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(AppError::bad_request(format!(
                "attribute key must be at most {MAX_KEY_LENGTH} characters"
            )));
        }
        if value.trim().is_empty() {
            return Err(AppError::bad_request(format!(
                "attribute '{key}' must have a value"
            )));
        }
    }
    Ok(())
}

/// Writes each entry keyed by `(person, key)`. Existing rows take the new
/// value, source and source note; their creation timestamp is kept.
pub fn upsert_attributes(
    conn: &mut PgConnection,
    person_id: i64,
    entries: &[(String, String)],
    source: AttributeSource,
    source_note_id: Option<i64>,
) -> QueryResult<Vec<PersonAttribute>> {
    let mut rows: Vec<NewPersonAttribute> = entries
        .iter()
        .map(|(key, value)| NewPersonAttribute {
            person_id,
            key: key.trim().to_string(),
            value: value.trim().to_string(),
            source: source.as_str().to_string(),
            source_note_id,
        })
        .collect();
    // One statement may not touch the same conflict target twice.
    rows.sort_by(|a, b| a.key.cmp(&b.key));
    rows.dedup_by(|later, earlier| later.key == earlier.key);
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    diesel::insert_into(person_attributes::table)
        .values(&rows)
        .on_conflict((person_attributes::person_id, person_attributes::key))
        .do_update()
        .set((
            person_attributes::value.eq(excluded(person_attributes::value)),
            person_attributes::source.eq(excluded(person_attributes::source)),
            person_attributes::source_note_id.eq(excluded(person_attributes::source_note_id)),
            person_attributes::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(PersonAttribute::as_returning())
        .get_results(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_keys_and_values() {
        assert!(validate_entries(&[(" ".into(), "x".into())]).is_err());
        assert!(validate_entries(&[("hobby".into(), "".into())]).is_err());
        assert!(validate_entries(&[("k".repeat(MAX_KEY_LENGTH + 1), "x".into())]).is_err());
        assert!(validate_entries(&[("hobby".into(), "chess".into())]).is_ok());
    }
}
