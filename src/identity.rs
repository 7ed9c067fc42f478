//! Lookups of users, companies and people by external identifier.
//!
//! Every read here filters on the `is_active` flag: deactivated rows are
//! reported as missing.

use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Company, Person, User};
use crate::schema::{companies, people, users};

pub fn find_active_user(conn: &mut PgConnection, user_uuid: Uuid) -> AppResult<User> {
    users::table
        .filter(users::uuid.eq(user_uuid))
        .filter(users::is_active.eq(true))
        .select(User::as_select())
        .first(conn)
        .map_err(AppError::from)
}

pub fn find_active_user_by_email(
    conn: &mut PgConnection,
    email: &str,
) -> AppResult<Option<User>> {
    let user = users::table
        .filter(users::email.eq(normalize_email(email)))
        .filter(users::is_active.eq(true))
        .select(User::as_select())
        .first(conn)
        .optional()?;
    Ok(user)
}

pub fn find_active_company(conn: &mut PgConnection, company_uuid: Uuid) -> AppResult<Company> {
    companies::table
        .filter(companies::uuid.eq(company_uuid))
        .filter(companies::is_active.eq(true))
        .select(Company::as_select())
        .first(conn)
        .map_err(AppError::from)
}

/// Resolves the company and checks it is owned by the given user. A missing
/// company is `NotFound`; a company owned by someone else is `Unauthorized`.
pub fn validate_company_ownership(
    conn: &mut PgConnection,
    company_uuid: Uuid,
    user_uuid: Uuid,
) -> AppResult<(Company, User)> {
    let company = find_active_company(conn, company_uuid)?;
    let user = find_active_user(conn, user_uuid)
        .map_err(|_| AppError::unauthorized("user not found"))?;

    if company.user_id != user.id {
        return Err(AppError::unauthorized(
            "company does not belong to the authenticated user",
        ));
    }

    Ok((company, user))
}

pub fn find_active_person(
    conn: &mut PgConnection,
    company_id: i64,
    person_uuid: Uuid,
) -> AppResult<Person> {
    people::table
        .filter(people::uuid.eq(person_uuid))
        .filter(people::company_id.eq(company_id))
        .filter(people::is_active.eq(true))
        .select(Person::as_select())
        .first(conn)
        .map_err(AppError::from)
}

pub fn find_person_by_id(conn: &mut PgConnection, person_id: i64) -> AppResult<Person> {
    people::table
        .find(person_id)
        .select(Person::as_select())
        .first(conn)
        .map_err(AppError::from)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn parse_external_id(raw: &str, what: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::bad_request(format!("invalid {what} id")))
}
