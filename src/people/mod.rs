//! People managed under a company.

pub mod attributes;

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::identity;
use crate::models::{NewPerson, Person};
use crate::schema::people;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonPayload {
    pub name: String,
    pub email: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_manager: bool,
    pub manager_uuid: Option<Uuid>,
    pub notes: Option<String>,
    #[serde(default)]
    pub has_kids: bool,
    pub gender: Option<String>,
    pub interests: Option<String>,
    pub personality: Option<String>,
}

impl PersonPayload {
    fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::bad_request("name must not be empty"));
        }
        if let Some(email) = blank_to_none(&self.email) {
            if !email.contains('@') {
                return Err(AppError::bad_request("email is invalid"));
            }
        }
        Ok(())
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = people, treat_none_as_null = true)]
struct PersonChangeset {
    name: String,
    email: Option<String>,
    position: Option<String>,
    department: Option<String>,
    phone: Option<String>,
    birthday: Option<NaiveDate>,
    start_date: Option<NaiveDate>,
    is_manager: bool,
    manager_id: Option<i64>,
    notes: Option<String>,
    has_kids: bool,
    gender: Option<String>,
    interests: Option<String>,
    personality: Option<String>,
    updated_at: chrono::NaiveDateTime,
}

pub fn create_person(
    conn: &mut PgConnection,
    company_id: i64,
    created_by: i64,
    payload: &PersonPayload,
) -> AppResult<Person> {
    payload.validate()?;
    let manager_id = resolve_manager(conn, company_id, payload.manager_uuid)?;

    let new_person = NewPerson {
        uuid: Uuid::new_v4(),
        company_id,
        name: payload.name.trim().to_string(),
        email: blank_to_none(&payload.email),
        position: blank_to_none(&payload.position),
        department: blank_to_none(&payload.department),
        phone: blank_to_none(&payload.phone),
        birthday: payload.birthday,
        start_date: payload.start_date,
        is_manager: payload.is_manager,
        manager_id,
        notes: blank_to_none(&payload.notes),
        has_kids: payload.has_kids,
        gender: blank_to_none(&payload.gender),
        interests: blank_to_none(&payload.interests),
        personality: blank_to_none(&payload.personality),
        created_by,
    };

    diesel::insert_into(people::table)
        .values(&new_person)
        .returning(Person::as_returning())
        .get_result(conn)
        .map_err(AppError::from)
}

/// Active people of a company ordered by name. `search` matches a
/// case-insensitive substring of name, email, position or department.
pub fn list_people(
    conn: &mut PgConnection,
    company_id: i64,
    search: Option<&str>,
) -> AppResult<Vec<Person>> {
    let mut query = people::table
        .filter(people::company_id.eq(company_id))
        .filter(people::is_active.eq(true))
        .select(Person::as_select())
        .into_boxed();

    if let Some(term) = search.map(str::trim).filter(|term| !term.is_empty()) {
        let pattern = like_pattern(term);
        query = query.filter(
            people::name
                .ilike(pattern.clone())
                .or(people::email.assume_not_null().ilike(pattern.clone()))
                .or(people::position.assume_not_null().ilike(pattern.clone()))
                .or(people::department.assume_not_null().ilike(pattern)),
        );
    }

    query
        .order((people::name.asc(), people::id.asc()))
        .load(conn)
        .map_err(AppError::from)
}

pub fn update_person(
    conn: &mut PgConnection,
    company_id: i64,
    person_uuid: Uuid,
    payload: &PersonPayload,
) -> AppResult<Person> {
    payload.validate()?;
    let existing = identity::find_active_person(conn, company_id, person_uuid)?;
    let manager_id = resolve_manager(conn, company_id, payload.manager_uuid)?;
    if manager_id == Some(existing.id) {
        return Err(AppError::bad_request("a person cannot manage themselves"));
    }

    let changes = PersonChangeset {
        name: payload.name.trim().to_string(),
        email: blank_to_none(&payload.email),
        position: blank_to_none(&payload.position),
        department: blank_to_none(&payload.department),
        phone: blank_to_none(&payload.phone),
        birthday: payload.birthday,
        start_date: payload.start_date,
        is_manager: payload.is_manager,
        manager_id,
        notes: blank_to_none(&payload.notes),
        has_kids: payload.has_kids,
        gender: blank_to_none(&payload.gender),
        interests: blank_to_none(&payload.interests),
        personality: blank_to_none(&payload.personality),
        updated_at: Utc::now().naive_utc(),
    };

    diesel::update(people::table.find(existing.id))
        .set(&changes)
        .returning(Person::as_returning())
        .get_result(conn)
        .map_err(AppError::from)
}

pub fn deactivate_person(conn: &mut PgConnection, company_id: i64, person_uuid: Uuid) -> AppResult<()> {
    let updated = diesel::update(
        people::table
            .filter(people::uuid.eq(person_uuid))
            .filter(people::company_id.eq(company_id))
            .filter(people::is_active.eq(true)),
    )
    .set((
        people::is_active.eq(false),
        people::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(conn)?;

    if updated == 0 {
        return Err(AppError::not_found());
    }
    Ok(())
}

/// External ids for a set of internal person ids.
pub fn external_ids(conn: &mut PgConnection, ids: &[i64]) -> AppResult<HashMap<i64, Uuid>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(i64, Uuid)> = people::table
        .filter(people::id.eq_any(ids))
        .select((people::id, people::uuid))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

fn resolve_manager(
    conn: &mut PgConnection,
    company_id: i64,
    manager_uuid: Option<Uuid>,
) -> AppResult<Option<i64>> {
    let Some(manager_uuid) = manager_uuid else {
        return Ok(None);
    };
    let manager = identity::find_active_person(conn, company_id, manager_uuid).map_err(|_| {
        AppError::bad_request("manager must be an active person of the same company")
    })?;
    Ok(Some(manager.id))
}

fn blank_to_none(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// `%term%` with LIKE wildcards in `term` escaped.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(like_pattern("ana"), "%ana%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn blank_optional_fields_become_null() {
        assert_eq!(blank_to_none(&Some("   ".into())), None);
        assert_eq!(blank_to_none(&Some(" QA ".into())), Some("QA".into()));
        assert_eq!(blank_to_none(&None), None);
    }

    #[test]
    fn payload_requires_name_and_plausible_email() {
        let mut payload = PersonPayload {
            name: "Ana".into(),
            ..PersonPayload::default()
        };
        assert!(payload.validate().is_ok());

        payload.email = Some("not-an-email".into());
        assert!(payload.validate().is_err());

        payload.email = None;
        payload.name = " ".into();
        assert!(payload.validate().is_err());
    }
}
