pub mod jwt;
pub mod password;
pub mod revocation;
pub mod session;

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Path},
    http::request::Parts,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    identity,
    models::{Company, User},
    state::AppState,
};

use self::jwt::TokenKind;

/// Header carrying the access token on every protected request.
pub const USER_TOKEN_HEADER: &str = "user-token";

/// Grace period added to the access-token lifetime when revoking on logout.
pub const REVOCATION_GRACE_MINUTES: i64 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub session_id: Uuid,
    #[serde(skip)]
    pub access_token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }

        let token = parts
            .headers
            .get(USER_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::unauthorized("missing access token"))?
            .to_string();

        let claims = state
            .tokens
            .verify(TokenKind::Access, &token)
            .map_err(|_| AppError::unauthorized("invalid or expired access token"))?;

        if state.revocations.is_revoked(&token).await? {
            return Err(AppError::unauthorized("access token revoked"));
        }

        let user = AuthenticatedUser {
            user_id: claims.sub,
            session_id: claims.sid,
            access_token: token,
        };
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

/// Authorises routes nested under `/companies/:company`.
#[derive(Debug, Clone)]
pub struct CompanyScope {
    pub company: Company,
    pub user: User,
}

#[async_trait]
impl FromRequestParts<AppState> for CompanyScope {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(scope) = parts.extensions.get::<CompanyScope>() {
            return Ok(scope.clone());
        }

        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::bad_request("company id is required"))?;
        let raw_company = params
            .get("company")
            .ok_or_else(|| AppError::bad_request("company id is required"))?;
        let company_uuid = identity::parse_external_id(raw_company, "company")?;

        let user = AuthenticatedUser::from_request_parts(parts, state).await?;

        let mut conn = state.db()?;
        let (company, user) =
            identity::validate_company_ownership(&mut conn, company_uuid, user.user_id)?;

        let scope = CompanyScope { company, user };
        parts.extensions.insert(scope.clone());
        Ok(scope)
    }
}

/// Best-effort caller address: proxy headers first, then the socket peer.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let ip = header("x-forwarded-for")
            .or_else(|| header("x-real-ip"))
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_default();
        Ok(ClientIp(ip))
    }
}
