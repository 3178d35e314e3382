/// Unified error types for the pinning service
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum PinError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// No recognized principal
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Principal recognized but not the resource owner
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Malformed or missing input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate pin for the same owner and CID
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Owner has used up their storage quota
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Upload body above the configured maximum
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Content-addressable storage network errors
    #[error("Storage network error: {0}")]
    Network(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error envelope: `{"error": {"code": ..., "message": ...}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl PinError {
    /// HTTP status and stable error code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PinError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            PinError::Authentication(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            PinError::Authorization(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            PinError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            PinError::Conflict(_) => (StatusCode::CONFLICT, "DUPLICATE_CONTENT"),
            PinError::QuotaExceeded(_) => (StatusCode::PAYMENT_REQUIRED, "QUOTA_EXCEEDED"),
            PinError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE"),
            PinError::RateLimitExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            PinError::Network(_) => (StatusCode::BAD_GATEWAY, "STORAGE_NETWORK_ERROR"),
            PinError::Database(_)
            | PinError::Migration(_)
            | PinError::Internal(_)
            | PinError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

/// Convert PinError to HTTP response
impl IntoResponse for PinError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            PinError::Database(_) | PinError::Migration(_) | PinError::Internal(_) | PinError::Io(_) => {
                tracing::error!("Internal error while handling request: {}", self);
                "Internal server error".to_string() // Don't leak details
            }
            PinError::Network(_) => {
                tracing::warn!("Storage network error while handling request: {}", self);
                "Storage network unavailable".to_string()
            }
            PinError::Authentication(msg)
            | PinError::Authorization(msg)
            | PinError::Validation(msg)
            | PinError::NotFound(msg)
            | PinError::Conflict(msg)
            | PinError::QuotaExceeded(msg)
            | PinError::PayloadTooLarge(msg) => msg.clone(),
            PinError::RateLimitExceeded { .. } => "Rate limit exceeded".to_string(),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: ErrorDetail {
                    code: code.to_string(),
                    message,
                },
            }),
        )
            .into_response();

        if let PinError::RateLimitExceeded { retry_after } = self {
            if let Ok(value) = retry_after.as_secs().max(1).to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}

/// Result type alias for service operations
pub type PinResult<T> = Result<T, PinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            PinError::Validation("x".into()).status_and_code(),
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
        );
        assert_eq!(
            PinError::Authentication("x".into()).status_and_code().0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PinError::Conflict("x".into()).status_and_code().0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            PinError::Internal("x".into()).status_and_code(),
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        );
    }

    #[tokio::test]
    async fn test_internal_error_does_not_leak() {
        let response = PinError::Internal("secret connection string".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error.code, "INTERNAL_ERROR");
        assert!(!parsed.error.message.contains("secret"));
    }
}
