use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Signs and verifies the access/refresh token pair. Both flavours carry the
/// same payload and differ only in audience and lifetime.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_audience: String,
    refresh_audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp as i64, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

impl TokenService {
    pub fn new(
        secret: &str,
        issuer: impl Into<String>,
        access_audience: impl Into<String>,
        refresh_audience: impl Into<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            access_audience: access_audience.into(),
            refresh_audience: refresh_audience.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            config.jwt_issuer.clone(),
            config.jwt_audience.clone(),
            config.refresh_token_audience.clone(),
            Duration::minutes(config.access_token_ttl_minutes),
            Duration::hours(config.refresh_token_ttl_hours),
        )
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn issue(
        &self,
        kind: TokenKind,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let (audience, ttl) = self.audience_and_ttl(kind);
        let expires_at = now + ttl;
        let claims = Claims {
            sub: user_id,
            sid: session_id,
            iss: self.issuer.clone(),
            aud: audience.to_string(),
            iat: now.timestamp() as usize,
            exp: expires_at.timestamp().max(0) as usize,
        };

        let token = encode(&Header::default(), &claims, &self.encoding)?;
        Ok(IssuedToken {
            token,
            claims,
            expires_at,
        })
    }

    pub fn verify(
        &self,
        kind: TokenKind,
        token: &str,
    ) -> Result<Claims, jsonwebtoken::errors::Error> {
        let (audience, _) = self.audience_and_ttl(kind);
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(&[audience]);
        validation.set_issuer(&[self.issuer.as_str()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    fn audience_and_ttl(&self, kind: TokenKind) -> (&str, Duration) {
        match kind {
            TokenKind::Access => (&self.access_audience, self.access_ttl),
            TokenKind::Refresh => (&self.refresh_audience, self.refresh_ttl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(access_ttl: Duration) -> TokenService {
        TokenService::new(
            "test-secret",
            "leadhub",
            "clients",
            "refresh",
            access_ttl,
            Duration::hours(24),
        )
    }

    #[test]
    fn access_token_roundtrips_user_and_session() {
        let tokens = service(Duration::minutes(15));
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();

        let issued = tokens.issue(TokenKind::Access, user, session).unwrap();
        let claims = tokens.verify(TokenKind::Access, &issued.token).unwrap();

        assert_eq!(claims.sub, user);
        assert_eq!(claims.sid, session);
        assert_eq!(claims.expires_at().timestamp(), issued.expires_at.timestamp());
    }

    #[test]
    fn refresh_token_is_not_accepted_as_access_token() {
        let tokens = service(Duration::minutes(15));
        let issued = tokens
            .issue(TokenKind::Refresh, Uuid::new_v4(), Uuid::new_v4())
            .unwrap();

        assert!(tokens.verify(TokenKind::Access, &issued.token).is_err());
        assert!(tokens.verify(TokenKind::Refresh, &issued.token).is_ok());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let tokens = service(Duration::minutes(-5));
        let issued = tokens
            .issue(TokenKind::Access, Uuid::new_v4(), Uuid::new_v4())
            .unwrap();

        let err = tokens.verify(TokenKind::Access, &issued.token).unwrap_err();
        assert!(matches!(
            err.kind(),
            jsonwebtoken::errors::ErrorKind::ExpiredSignature
        ));
    }

    #[test]
    fn tokens_signed_with_another_key_are_rejected() {
        let tokens = service(Duration::minutes(15));
        let other = TokenService::new(
            "other-secret",
            "leadhub",
            "clients",
            "refresh",
            Duration::minutes(15),
            Duration::hours(24),
        );
        let issued = other
            .issue(TokenKind::Access, Uuid::new_v4(), Uuid::new_v4())
            .unwrap();

        assert!(tokens.verify(TokenKind::Access, &issued.token).is_err());
    }
}
