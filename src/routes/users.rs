use axum::{extract::State, http::StatusCode, Json};
use axum_extra::{headers::UserAgent, typed_header::TypedHeader};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{
        password::{self, MIN_PASSWORD_LENGTH},
        session, AuthenticatedUser, ClientIp,
    },
    error::{AppError, AppResult},
    identity,
    models::{NewUser, User},
    routes::auth::AuthResponse,
    schema::users,
    state::AppState,
};

const DEFAULT_PLAN: &str = "free";

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
    pub plan: String,
    pub trial_ends_at: Option<NaiveDateTime>,
    pub subscription_status: Option<String>,
    pub email_verified: bool,
    pub last_login_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.uuid,
            email: user.email,
            name: user.name,
            phone: user.phone,
            photo_url: user.photo_url,
            plan: user.plan,
            trial_ends_at: user.trial_ends_at,
            subscription_status: user.subscription_status,
            email_verified: user.email_verified,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    pub phone: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct ProfileChangeset {
    name: Option<String>,
    phone: Option<String>,
    photo_url: Option<String>,
    updated_at: NaiveDateTime,
}

pub async fn create_user(
    State(state): State<AppState>,
    user_agent: Option<TypedHeader<UserAgent>>,
    ClientIp(client_ip): ClientIp,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let email = identity::normalize_email(&payload.email);
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("email is invalid"));
    }
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    let password_hash = password::hash_password(&payload.password)?;
    let new_user = NewUser {
        uuid: Uuid::new_v4(),
        email,
        name: name.to_string(),
        password_hash,
        phone: payload
            .phone
            .map(|phone| phone.trim().to_string())
            .filter(|phone| !phone.is_empty()),
        plan: DEFAULT_PLAN.to_string(),
        trial_ends_at: None,
    };

    let mut conn = state.db()?;
    let user = match diesel::insert_into(users::table)
        .values(&new_user)
        .returning(User::as_returning())
        .get_result(&mut conn)
    {
        Ok(user) => user,
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::conflict("email is already registered"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    let agent = user_agent
        .map(|TypedHeader(agent)| agent.as_str().to_string())
        .unwrap_or_default();
    let auth = session::start_session(&mut conn, &state.tokens, &user, &agent, &client_ip)?;
    info!(user_id = %user.uuid, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: UserView::from(user),
            auth,
        }),
    ))
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserView>> {
    let mut conn = state.db()?;
    let user = identity::find_active_user(&mut conn, user.user_id)?;
    Ok(Json(UserView::from(user)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<UserView>> {
    let name = match payload.name {
        Some(name) if name.trim().is_empty() => {
            return Err(AppError::bad_request("name must not be empty"))
        }
        Some(name) => Some(name.trim().to_string()),
        None => None,
    };

    let mut conn = state.db()?;
    let existing = identity::find_active_user(&mut conn, user.user_id)?;
    let changes = ProfileChangeset {
        name,
        phone: payload.phone.map(|phone| phone.trim().to_string()),
        photo_url: payload.photo_url.map(|url| url.trim().to_string()),
        updated_at: Utc::now().naive_utc(),
    };

    let updated = diesel::update(users::table.find(existing.id))
        .set(&changes)
        .returning(User::as_returning())
        .get_result(&mut conn)?;
    Ok(Json(UserView::from(updated)))
}
