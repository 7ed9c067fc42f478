use axum::{extract::State, http::StatusCode, Json};
use axum_extra::{headers::UserAgent, typed_header::TypedHeader};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    auth::{
        password,
        session::{self, AuthTokens, RefreshedAccess},
        AuthenticatedUser, ClientIp, REVOCATION_GRACE_MINUTES,
    },
    error::{AppError, AppResult},
    identity,
    models::User,
    routes::users::UserView,
    schema::users,
    state::AppState,
};

const WRONG_CREDENTIALS: &str = "credentials are wrong";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: UserView,
    pub auth: AuthTokens,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn login(
    State(state): State<AppState>,
    user_agent: Option<TypedHeader<UserAgent>>,
    ClientIp(client_ip): ClientIp,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let mut conn = state.db()?;

    let user = identity::find_active_user_by_email(&mut conn, &payload.email)?
        .ok_or_else(|| AppError::unauthorized(WRONG_CREDENTIALS))?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized(WRONG_CREDENTIALS))?;
    if !valid {
        return Err(AppError::unauthorized(WRONG_CREDENTIALS));
    }

    let now = Utc::now().naive_utc();
    let user = diesel::update(users::table.find(user.id))
        .set((users::last_login_at.eq(Some(now)), users::updated_at.eq(now)))
        .returning(User::as_returning())
        .get_result(&mut conn)?;

    let agent = user_agent
        .map(|TypedHeader(agent)| agent.as_str().to_string())
        .unwrap_or_default();
    let auth = session::start_session(&mut conn, &state.tokens, &user, &agent, &client_ip)?;

    Ok(Json(AuthResponse {
        user: UserView::from(user),
        auth,
    }))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<RefreshedAccess>> {
    let token = payload.refresh_token.trim();
    if token.is_empty() {
        return Err(AppError::bad_request("refresh_token is required"));
    }

    let mut conn = state.db()?;
    let refreshed = session::refresh_access(&mut conn, &state.tokens, token)?;
    Ok(Json(refreshed))
}

/// Revokes the presented access token and blocks every session of the user.
pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let ttl = (state.tokens.access_ttl() + chrono::Duration::minutes(REVOCATION_GRACE_MINUTES))
        .to_std()
        .map_err(AppError::internal)?;
    state.revocations.revoke(&user.access_token, ttl).await?;

    let mut conn = state.db()?;
    let account = identity::find_active_user(&mut conn, user.user_id)
        .map_err(|_| AppError::unauthorized("user not found"))?;
    let blocked = session::block_user_sessions(&mut conn, account.id)?;

    info!(user_id = %user.user_id, session_id = %user.session_id, blocked, "user logged out");
    Ok(StatusCode::NO_CONTENT)
}
