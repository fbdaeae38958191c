//! Identity resolution: bearer token issue and verification, and the
//! `CurrentUser` extractor.
//!
//! The extractor runs before any handler body, so no storage call can be
//! made for a request whose subject has not been resolved. Signed-out
//! tokens are refused through the store's revocation list.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::{ApiError, AuthError};
use crate::store::Database;

/// Claims carried by a TaskFlow token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    /// Token id, the handle used to revoke it.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Verifies bearer credentials against the configured HS256 secret.
pub struct IdentityResolver {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    token_ttl: Duration,
}

impl IdentityResolver {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            token_ttl: config.token_ttl,
        }
    }

    /// Resolve a raw `Authorization` header value into verified claims.
    pub fn resolve(&self, header: Option<&str>) -> Result<Claims, AuthError> {
        let header = header.map(str::trim).filter(|h| !h.is_empty());
        let Some(header) = header else {
            return Err(AuthError::Missing);
        };

        let (scheme, token) = header.split_once(' ').ok_or(AuthError::Malformed)?;
        let token = token.trim();
        if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
            return Err(AuthError::Malformed);
        }

        self.verify(token)
    }

    /// Verify a bare token and return its claims. The subject is opaque and
    /// returned exactly as signed; only a blank one is refused.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::Malformed,
            }
        })?;

        if data.claims.sub.trim().is_empty() || data.claims.jti.is_empty() {
            return Err(AuthError::Malformed);
        }
        Ok(data.claims)
    }

    /// Issue a token for `subject`, valid for the configured lifetime.
    pub fn issue(&self, subject: &str) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
        self.issue_at(subject, Utc::now())
    }

    /// Issue a token as if it had been created at `issued_at`.
    pub fn issue_at(
        &self,
        subject: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
        let ttl = chrono::Duration::from_std(self.token_ttl).unwrap_or(chrono::Duration::days(7));
        let expires_at = issued_at + ttl;
        let claims = Claims {
            sub: subject.to_string(),
            jti: uuid::Uuid::new_v4().simple().to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(IssuedToken {
            token,
            token_id: claims.jti,
            expires_at,
        })
    }

    /// Shorthand for [`issue`](Self::issue) when only the token is needed.
    pub fn issue_token(&self, subject: &str) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue(subject).map(|issued| issued.token)
    }

    pub fn issue_token_at(
        &self,
        subject: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_at(subject, issued_at).map(|issued| issued.token)
    }
}

/// The resolved subject of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    /// `jti` of the presented token.
    pub token_id: String,
    pub token_expires_at: DateTime<Utc>,
}

impl From<Claims> for CurrentUser {
    fn from(claims: Claims) -> Self {
        let token_expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            id: claims.sub,
            token_id: claims.jti,
            token_expires_at,
        }
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    Arc<IdentityResolver>: FromRef<S>,
    Arc<dyn Database>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolver = <Arc<IdentityResolver> as FromRef<S>>::from_ref(state);

        let header = match parts.headers.get(AUTHORIZATION) {
            None => None,
            Some(value) => Some(value.to_str().map_err(|_| AuthError::Malformed)?),
        };

        let claims = match resolver.resolve(header) {
            Ok(claims) => claims,
            Err(AuthError::Missing) => {
                debug!(path = %parts.uri.path(), "Request without credential");
                return Err(AuthError::Missing.into());
            }
            Err(e) => {
                warn!(reason = %e, path = %parts.uri.path(), "Rejected credential");
                return Err(e.into());
            }
        };

        let db = <Arc<dyn Database> as FromRef<S>>::from_ref(state);
        if db.is_token_revoked(&claims.jti).await? {
            warn!(path = %parts.uri.path(), "Rejected signed-out credential");
            return Err(AuthError::Revoked.into());
        }
        Ok(claims.into())
    }
}
