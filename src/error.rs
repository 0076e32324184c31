//! Error taxonomy for the HTTP surface.  Every failure a handler can
//! produce maps to exactly one variant, and every variant maps to exactly
//! one status code, so no error is ever silently swallowed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or too-short input (400).
    #[error("{0}")]
    Validation(String),
    /// Missing or invalid credential (401).
    #[error("missing or invalid credentials")]
    Auth,
    /// Threat assessor veto (403).
    #[error("request blocked by threat policy: {0}")]
    PolicyBlock(String),
    /// Sliding window exceeded (429).
    #[error("rate limit exceeded")]
    RateLimited { retry_after_ms: u64 },
    /// AI proxy asked for a provider outside the closed dispatch table (400).
    #[error("unsupported provider '{0}'")]
    UnknownProvider(String),
    /// Marketplace posting asked for an unknown platform (400).
    #[error("unsupported platform '{0}'")]
    UnknownPlatform(String),
    /// Downstream API or storage failure, underlying message surfaced (500).
    #[error("{0}")]
    Collaborator(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::UnknownProvider(_)
            | ApiError::UnknownPlatform(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth => StatusCode::UNAUTHORIZED,
            ApiError::PolicyBlock(_) => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Collaborator(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable kind label used in response bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Auth => "auth",
            ApiError::PolicyBlock(_) => "policy_block",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::UnknownProvider(_) => "unknown_provider",
            ApiError::UnknownPlatform(_) => "unknown_platform",
            ApiError::Collaborator(_) => "collaborator",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Collaborator(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        if let ApiError::RateLimited { retry_after_ms } = &self {
            body["retryAfterMs"] = (*retry_after_ms).into();
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_map_to_expected_statuses() {
        assert_eq!(
            ApiError::Validation("too short".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Auth.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::PolicyBlock("destructive_shell".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::RateLimited { retry_after_ms: 10 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Collaborator("db down".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::UnknownProvider("gpt9".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn collaborator_message_is_surfaced() {
        let err = ApiError::Collaborator("enrichment endpoint returned 502".into());
        assert_eq!(err.to_string(), "enrichment endpoint returned 502");
        assert_eq!(err.kind(), "collaborator");
    }
}
