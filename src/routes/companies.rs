use std::str::FromStr;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{AuthenticatedUser, CompanyScope},
    error::{AppError, AppResult},
    identity,
    models::{Company, CompanySize, NewCompany},
    schema::companies,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct CompanyView {
    pub id: Uuid,
    pub name: String,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub role: Option<String>,
    pub is_default: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Company> for CompanyView {
    fn from(company: Company) -> Self {
        Self {
            id: company.uuid,
            name: company.name,
            industry: company.industry,
            size: company.size,
            role: company.role,
            is_default: company.is_default,
            created_at: company.created_at,
            updated_at: company.updated_at,
        }
    }
}

#[derive(Deserialize)]
pub struct CompanyRequest {
    pub name: String,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub role: Option<String>,
}

struct ValidCompany {
    name: String,
    industry: Option<String>,
    size: Option<String>,
    role: Option<String>,
}

impl CompanyRequest {
    fn validate(self) -> AppResult<ValidCompany> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::bad_request("name must not be empty"));
        }
        let size = match trimmed(self.size) {
            Some(size) => Some(
                CompanySize::from_str(&size)
                    .map_err(AppError::bad_request)?
                    .as_str()
                    .to_string(),
            ),
            None => None,
        };
        Ok(ValidCompany {
            name,
            industry: trimmed(self.industry),
            size,
            role: trimmed(self.role),
        })
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = companies, treat_none_as_null = true)]
struct CompanyChangeset {
    name: String,
    industry: Option<String>,
    size: Option<String>,
    role: Option<String>,
    updated_at: NaiveDateTime,
}

pub async fn create_company(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CompanyRequest>,
) -> AppResult<(StatusCode, Json<CompanyView>)> {
    let valid = payload.validate()?;
    let mut conn = state.db()?;
    let owner = identity::find_active_user(&mut conn, user.user_id)?;

    let company = conn.transaction::<Company, AppError, _>(|conn| {
        let existing: i64 = companies::table
            .filter(companies::user_id.eq(owner.id))
            .filter(companies::is_active.eq(true))
            .count()
            .get_result(conn)?;

        let company = diesel::insert_into(companies::table)
            .values(&NewCompany {
                uuid: Uuid::new_v4(),
                name: valid.name,
                industry: valid.industry,
                size: valid.size,
                role: valid.role,
                is_default: existing == 0,
                user_id: owner.id,
            })
            .returning(Company::as_returning())
            .get_result(conn)?;
        Ok(company)
    })?;

    info!(user_id = %owner.uuid, company_id = %company.uuid, "company created");
    Ok((StatusCode::CREATED, Json(CompanyView::from(company))))
}

pub async fn list_companies(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<CompanyView>>> {
    let mut conn = state.db()?;
    let owner = identity::find_active_user(&mut conn, user.user_id)?;

    let owned: Vec<Company> = companies::table
        .filter(companies::user_id.eq(owner.id))
        .filter(companies::is_active.eq(true))
        .select(Company::as_select())
        .order((companies::is_default.desc(), companies::name.asc()))
        .load(&mut conn)?;

    Ok(Json(owned.into_iter().map(CompanyView::from).collect()))
}

pub async fn get_company(scope: CompanyScope) -> Json<CompanyView> {
    Json(CompanyView::from(scope.company))
}

pub async fn update_company(
    State(state): State<AppState>,
    scope: CompanyScope,
    Json(payload): Json<CompanyRequest>,
) -> AppResult<Json<CompanyView>> {
    let valid = payload.validate()?;
    let mut conn = state.db()?;

    let company = diesel::update(companies::table.find(scope.company.id))
        .set(&CompanyChangeset {
            name: valid.name,
            industry: valid.industry,
            size: valid.size,
            role: valid.role,
            updated_at: Utc::now().naive_utc(),
        })
        .returning(Company::as_returning())
        .get_result(&mut conn)?;

    Ok(Json(CompanyView::from(company)))
}

pub async fn delete_company(
    State(state): State<AppState>,
    scope: CompanyScope,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    diesel::update(companies::table.find(scope.company.id))
        .set((
            companies::is_active.eq(false),
            companies::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    info!(company_id = %scope.company.uuid, "company deactivated");
    Ok(StatusCode::NO_CONTENT)
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
