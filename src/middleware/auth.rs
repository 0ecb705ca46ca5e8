//! Bearer-token identity extraction.
//!
//! Tokens are HS256 JWTs issued elsewhere; the `sub` claim names the owner every
//! task operation is scoped to.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts};
use garde::Validate;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::TaskError;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Claims {
    /// Owner identity.
    #[garde(length(min = 1, max = 255))]
    pub sub: String,

    #[garde(skip)]
    pub exp: u64,

    #[garde(skip)]
    #[serde(default)]
    pub username: Option<String>,
}

/// Verifies bearer tokens against the shared secret.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TaskError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| TaskError::Unauthorized(format!("invalid token: {e}")))?;

        data.claims
            .validate()
            .map_err(|e| TaskError::Unauthorized(format!("invalid claims: {e}")))?;

        Ok(data.claims)
    }
}

/// Authenticated owner extracted from `Authorization: Bearer <jwt>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = TaskError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TaskError::Unauthorized("missing bearer token".to_string()))?;

        let verifier = Arc::<TokenVerifier>::from_ref(state);
        let claims = verifier.verify(token)?;
        Ok(AuthUser(claims.sub))
    }
}
