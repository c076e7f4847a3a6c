use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::security::directory::DirectoryError;

/// Denial and failure taxonomy for the access-control core. Every variant
/// carries a stable machine-readable kind plus a human-readable message;
/// internal detail stays in the logs, never in a response body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// Anonymous caller hit a gated endpoint, or a presented credential
    /// was structurally invalid. The message never says why a token was
    /// rejected.
    #[error("authentication required")]
    AuthenticationRequired,

    /// Signature checked out but the token is past its expiry, so the
    /// client should re-login rather than retry the identical token.
    #[error("session expired, please re-authenticate")]
    ExpiredCredential,

    /// Login with a bad username or password; does not reveal which.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Authenticated, but not the owner and not an admin.
    #[error("you do not have access to this resource")]
    OwnershipDenied,

    /// No such resource. Kept distinct from `OwnershipDenied`: this
    /// service discloses existence (404 vs 403).
    #[error("resource not found")]
    NotFound,

    #[error("too many requests, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("username already taken")]
    Conflict,

    /// Everything else. The client-facing message is deliberately generic.
    #[error("internal error")]
    Internal,
}

impl AccessError {
    pub fn kind(&self) -> &'static str {
        match self {
            AccessError::AuthenticationRequired => "authentication_required",
            AccessError::ExpiredCredential => "expired_credential",
            AccessError::InvalidCredentials => "invalid_credentials",
            AccessError::OwnershipDenied => "ownership_denied",
            AccessError::NotFound => "not_found",
            AccessError::RateLimited { .. } => "rate_limited",
            AccessError::Conflict => "conflict",
            AccessError::Internal => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AccessError::AuthenticationRequired
            | AccessError::ExpiredCredential
            | AccessError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AccessError::OwnershipDenied => StatusCode::FORBIDDEN,
            AccessError::NotFound => StatusCode::NOT_FOUND,
            AccessError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AccessError::Conflict => StatusCode::CONFLICT,
            AccessError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            AccessError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
            retry_after_secs: retry_after,
        };
        let mut response = (self.status(), Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<anyhow::Error> for AccessError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "internal failure");
        AccessError::Internal
    }
}

impl From<DirectoryError> for AccessError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::UsernameTaken => AccessError::Conflict,
            DirectoryError::Hash(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_status_mapping() {
        assert_eq!(AccessError::AuthenticationRequired.kind(), "authentication_required");
        assert_eq!(
            AccessError::AuthenticationRequired.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AccessError::ExpiredCredential.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AccessError::OwnershipDenied.status(), StatusCode::FORBIDDEN);
        assert_eq!(AccessError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AccessError::RateLimited { retry_after_secs: 30 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AccessError::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rate_limited_sets_retry_after_header() {
        let response = AccessError::RateLimited { retry_after_secs: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from_static("42")
        );
    }

    #[test]
    fn test_expired_and_malformed_messages_differ() {
        // Clients must be able to tell "re-login" apart from a plain 401.
        assert_ne!(
            AccessError::ExpiredCredential.to_string(),
            AccessError::AuthenticationRequired.to_string()
        );
    }
}
