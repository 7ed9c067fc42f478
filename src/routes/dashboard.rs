use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthenticatedUser,
    dashboard::{load_dashboard, DashboardStats, DatabaseDashboardSource},
    error::{AppError, AppResult},
    identity,
    routes::{
        companies::CompanyView,
        people::{person_views, PersonView},
    },
    state::AppState,
};

#[derive(Deserialize)]
pub struct DashboardQuery {
    pub company_uuid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DashboardView {
    pub company: CompanyView,
    pub people: Vec<PersonView>,
    pub stats: DashboardStats,
}

pub async fn get_dashboard(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<DashboardQuery>,
) -> AppResult<Json<DashboardView>> {
    let raw = query
        .company_uuid
        .ok_or_else(|| AppError::bad_request("company_uuid is required"))?;
    let company_uuid = identity::parse_external_id(&raw, "company")?;
    let user_uuid = user.user_id;

    let (company, _) = state
        .with_db(move |conn| identity::validate_company_ownership(conn, company_uuid, user_uuid))
        .await?;

    let source = DatabaseDashboardSource::new(state.clone());
    let dashboard = load_dashboard(&source, company.id).await?;

    let people = state
        .with_db(move |conn| person_views(conn, dashboard.people))
        .await?;

    Ok(Json(DashboardView {
        company: CompanyView::from(company),
        people,
        stats: dashboard.stats,
    }))
}
