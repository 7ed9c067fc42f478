use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::CompanyScope,
    error::AppResult,
    identity,
    models::{AttributeSource, Person, PersonAttribute},
    people::{self, attributes, PersonPayload},
    schema::notes,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct PersonView {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub is_manager: bool,
    pub manager_id: Option<Uuid>,
    pub notes: Option<String>,
    pub has_kids: bool,
    pub gender: Option<String>,
    pub interests: Option<String>,
    pub personality: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl PersonView {
    fn new(person: Person, manager_id: Option<Uuid>) -> Self {
        Self {
            id: person.uuid,
            name: person.name,
            email: person.email,
            position: person.position,
            department: person.department,
            phone: person.phone,
            birthday: person.birthday,
            start_date: person.start_date,
            is_manager: person.is_manager,
            manager_id,
            notes: person.notes,
            has_kids: person.has_kids,
            gender: person.gender,
            interests: person.interests,
            personality: person.personality,
            created_at: person.created_at,
            updated_at: person.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PersonDetailView {
    #[serde(flatten)]
    pub person: PersonView,
    pub attributes: Vec<AttributeView>,
}

#[derive(Debug, Serialize)]
pub struct AttributeView {
    pub key: String,
    pub value: String,
    pub source: String,
    pub source_note_id: Option<Uuid>,
    pub updated_at: NaiveDateTime,
}

#[derive(Deserialize)]
pub struct PeopleQuery {
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct AttributesRequest {
    pub attributes: HashMap<String, String>,
}

/// Resolves manager references to external ids in one query.
pub fn person_views(conn: &mut PgConnection, people: Vec<Person>) -> AppResult<Vec<PersonView>> {
    let manager_ids: Vec<i64> = people.iter().filter_map(|person| person.manager_id).collect();
    let managers = people::external_ids(conn, &manager_ids)?;
    Ok(people
        .into_iter()
        .map(|person| {
            let manager = person.manager_id.and_then(|id| managers.get(&id).copied());
            PersonView::new(person, manager)
        })
        .collect())
}

pub fn attribute_views(
    conn: &mut PgConnection,
    attributes: Vec<PersonAttribute>,
) -> AppResult<Vec<AttributeView>> {
    let note_ids: Vec<i64> = attributes
        .iter()
        .filter_map(|attribute| attribute.source_note_id)
        .collect();
    let note_uuids: HashMap<i64, Uuid> = if note_ids.is_empty() {
        HashMap::new()
    } else {
        notes::table
            .filter(notes::id.eq_any(&note_ids))
            .select((notes::id, notes::uuid))
            .load::<(i64, Uuid)>(conn)?
            .into_iter()
            .collect()
    };

    Ok(attributes
        .into_iter()
        .map(|attribute| AttributeView {
            source_note_id: attribute
                .source_note_id
                .and_then(|id| note_uuids.get(&id).copied()),
            key: attribute.key,
            value: attribute.value,
            source: attribute.source,
            updated_at: attribute.updated_at,
        })
        .collect())
}

fn person_detail(conn: &mut PgConnection, person: Person) -> AppResult<PersonDetailView> {
    let attributes = attributes::list_attributes(conn, person.id)?;
    let attributes = attribute_views(conn, attributes)?;
    let person = person_views(conn, vec![person])?
        .pop()
        .ok_or_else(crate::error::AppError::not_found)?;
    Ok(PersonDetailView { person, attributes })
}

pub async fn create_person(
    State(state): State<AppState>,
    scope: CompanyScope,
    Json(payload): Json<PersonPayload>,
) -> AppResult<(StatusCode, Json<PersonDetailView>)> {
    let mut conn = state.db()?;
    let person = people::create_person(&mut conn, scope.company.id, scope.user.id, &payload)?;
    let detail = person_detail(&mut conn, person)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn list_people(
    State(state): State<AppState>,
    scope: CompanyScope,
    Query(query): Query<PeopleQuery>,
) -> AppResult<Json<Vec<PersonView>>> {
    let mut conn = state.db()?;
    let found = people::list_people(&mut conn, scope.company.id, query.search.as_deref())?;
    Ok(Json(person_views(&mut conn, found)?))
}

pub async fn get_person(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, person)): Path<(String, String)>,
) -> AppResult<Json<PersonDetailView>> {
    let person_uuid = identity::parse_external_id(&person, "person")?;
    let mut conn = state.db()?;
    let person = identity::find_active_person(&mut conn, scope.company.id, person_uuid)?;
    Ok(Json(person_detail(&mut conn, person)?))
}

pub async fn update_person(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, person)): Path<(String, String)>,
    Json(payload): Json<PersonPayload>,
) -> AppResult<Json<PersonDetailView>> {
    let person_uuid = identity::parse_external_id(&person, "person")?;
    let mut conn = state.db()?;
    let person = people::update_person(&mut conn, scope.company.id, person_uuid, &payload)?;
    Ok(Json(person_detail(&mut conn, person)?))
}

pub async fn delete_person(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, person)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let person_uuid = identity::parse_external_id(&person, "person")?;
    let mut conn = state.db()?;
    people::deactivate_person(&mut conn, scope.company.id, person_uuid)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_attributes(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, person)): Path<(String, String)>,
) -> AppResult<Json<Vec<AttributeView>>> {
    let person_uuid = identity::parse_external_id(&person, "person")?;
    let mut conn = state.db()?;
    let person = identity::find_active_person(&mut conn, scope.company.id, person_uuid)?;
    let found = attributes::list_attributes(&mut conn, person.id)?;
    Ok(Json(attribute_views(&mut conn, found)?))
}

/// Manual upsert; keys not named in the request are left untouched.
pub async fn put_attributes(
    State(state): State<AppState>,
    scope: CompanyScope,
    Path((_company, person)): Path<(String, String)>,
    Json(payload): Json<AttributesRequest>,
) -> AppResult<Json<Vec<AttributeView>>> {
    let person_uuid = identity::parse_external_id(&person, "person")?;
    let entries: Vec<(String, String)> = payload.attributes.into_iter().collect();
    attributes::validate_entries(&entries)?;

    let mut conn = state.db()?;
    let person = identity::find_active_person(&mut conn, scope.company.id, person_uuid)?;
    conn.transaction(|conn| {
        attributes::upsert_attributes(conn, person.id, &entries, AttributeSource::Manual, None)
    })?;

    let found = attributes::list_attributes(&mut conn, person.id)?;
    Ok(Json(attribute_views(&mut conn, found)?))
}
