//! Refresh sessions: issued on login, checked on refresh, blocked on logout.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::jwt::{TokenKind, TokenService};
use crate::error::{AppError, AppResult};
use crate::identity;
use crate::models::{NewSession, Session, User};
use crate::schema::{sessions, users};

#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub session_id: Uuid,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshedAccess {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
}

/// Mints a session id and both tokens, then stores the session row.
pub fn start_session(
    conn: &mut PgConnection,
    tokens: &TokenService,
    user: &User,
    user_agent: &str,
    client_ip: &str,
) -> AppResult<AuthTokens> {
    let session_id = Uuid::new_v4();
    let access = tokens.issue(TokenKind::Access, user.uuid, session_id)?;
    let refresh = tokens.issue(TokenKind::Refresh, user.uuid, session_id)?;

    diesel::insert_into(sessions::table)
        .values(&NewSession {
            uuid: session_id,
            user_id: user.id,
            refresh_token: refresh.token.clone(),
            user_agent: user_agent.to_string(),
            client_ip: client_ip.to_string(),
            expires_at: refresh.expires_at.naive_utc(),
        })
        .execute(conn)?;

    info!(user_id = %user.uuid, session_id = %session_id, "session started");
    Ok(AuthTokens {
        session_id,
        access_token: access.token,
        access_token_expires_at: access.expires_at,
        refresh_token: refresh.token,
        refresh_token_expires_at: refresh.expires_at,
    })
}

/// Exchanges a refresh token for a new access token bound to the same
/// session. The refresh token itself is not rotated.
pub fn refresh_access(
    conn: &mut PgConnection,
    tokens: &TokenService,
    refresh_token: &str,
) -> AppResult<RefreshedAccess> {
    let claims = tokens
        .verify(TokenKind::Refresh, refresh_token)
        .map_err(|_| AppError::unauthorized("invalid or expired refresh token"))?;

    let (session, owner): (Session, Uuid) = sessions::table
        .inner_join(users::table)
        .filter(sessions::uuid.eq(claims.sid))
        .select((Session::as_select(), users::uuid))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::unauthorized("session not found"))?;

    check_session(&session, owner, claims.sub, refresh_token, Utc::now())?;

    identity::find_active_user(conn, owner)
        .map_err(|_| AppError::unauthorized("user is no longer active"))?;

    let access = tokens.issue(TokenKind::Access, owner, session.uuid)?;
    debug!(user_id = %owner, session_id = %session.uuid, "access token refreshed");
    Ok(RefreshedAccess {
        access_token: access.token,
        access_token_expires_at: access.expires_at,
    })
}

pub fn check_session(
    session: &Session,
    session_owner: Uuid,
    token_user: Uuid,
    presented: &str,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if session.is_blocked {
        return Err(AppError::unauthorized("session blocked"));
    }
    if session_owner != token_user {
        return Err(AppError::unauthorized("incorrect session user"));
    }
    if session.refresh_token != presented {
        return Err(AppError::unauthorized("mismatched session token"));
    }
    if session.expires_at < now.naive_utc() {
        return Err(AppError::unauthorized("expired session"));
    }
    Ok(())
}

/// Blocks every session of the user, not just the caller's.
pub fn block_user_sessions(conn: &mut PgConnection, user_id: i64) -> QueryResult<usize> {
    diesel::update(
        sessions::table
            .filter(sessions::user_id.eq(user_id))
            .filter(sessions::is_blocked.eq(false)),
    )
    .set((
        sessions::is_blocked.eq(true),
        sessions::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(conn)
}
