//! Bearer-token principal extraction.
//!
//! Tokens are configured in `[auth].tokens` as `token = "user-id"`. A request
//! is authenticated when its `Authorization: Bearer <token>` header names a
//! configured token; the mapped user id then scopes every datastore access.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};

use inkling_core::error::AnalysisError;

use crate::config::AuthConfig;
use crate::server::{AppError, AppState};

/// Resolves the user id for a request, or [`AnalysisError::AuthRequired`].
pub fn authenticate(headers: &HeaderMap, auth: &AuthConfig) -> Result<String, AnalysisError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AnalysisError::AuthRequired)?;

    auth.tokens
        .get(token)
        .cloned()
        .ok_or(AnalysisError::AuthRequired)
}

/// The authenticated owner of a request.
///
/// Use this extractor when authentication is the first check. Handlers that
/// validate the body first call [`authenticate`] themselves.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        authenticate(&parts.headers, &state.config.auth)
            .map(CurrentUser)
            .map_err(AppError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn auth() -> AuthConfig {
        let mut config = AuthConfig::default();
        config.tokens.insert("s3cret".into(), "writer".into());
        config
    }

    #[test]
    fn test_known_bearer_token_resolves_owner() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(authenticate(&headers, &auth()), Ok("writer".to_string()));
    }

    #[test]
    fn test_missing_or_unknown_token_is_rejected() {
        let mut headers = HeaderMap::new();
        assert_eq!(authenticate(&headers, &auth()), Err(AnalysisError::AuthRequired));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert_eq!(authenticate(&headers, &auth()), Err(AnalysisError::AuthRequired));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic s3cret"));
        assert_eq!(authenticate(&headers, &auth()), Err(AnalysisError::AuthRequired));
    }
}
