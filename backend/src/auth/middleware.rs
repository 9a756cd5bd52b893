use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use std::sync::Arc;

use super::{jwt, CallerIdentity};
use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extractor
///
/// Identity is established upstream; this only verifies the bearer token and
/// lifts the user ID and role IDs out of its claims.
#[derive(Debug, Clone)]
pub struct AuthUser(pub CallerIdentity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()))?;

        let token_data = jwt::verify_jwt(&state.config.jwt_secret, &token)?;
        let claims = token_data.claims;

        Ok(AuthUser(CallerIdentity::new(claims.sub, claims.role_ids)))
    }
}

/// Pull the bearer token out of the `Authorization` header
pub fn extract_token(headers: &axum::http::HeaderMap) -> Option<String> {
    let auth_str = headers.get("authorization")?.to_str().ok()?;
    auth_str
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
