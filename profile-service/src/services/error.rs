use crate::models::DocumentSlot;
use service_core::error::AppError;
use thiserror::Error;

/// Failures raised by the session guard, the document registry and the
/// profile update dispatcher.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("csrf check failed: {0}")]
    CsrfMismatch(String),

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("content type {content_type} is not accepted for {slot}")]
    UnsupportedType {
        slot: DocumentSlot,
        content_type: String,
    },

    #[error("payload of {actual} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize, actual: usize },

    #[error("no document stored for {0}")]
    NotFound(DocumentSlot),

    #[error("profile not found")]
    ProfileNotFound,

    #[error("malformed request: {0}")]
    MalformedBody(String),

    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("identifier is not a valid email address or phone number")]
    InvalidIdentifier,

    #[error("verification code expired")]
    CodeExpired,

    #[error("verification code mismatch")]
    CodeMismatch,

    #[error("too many verification attempts")]
    TooManyAttempts,

    #[error("persistence failure: {0}")]
    Persistence(anyhow::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

const AUTH_REQUIRED: &str = "Authentication required";

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            // Both collapse to the same response so callers cannot tell them apart.
            ServiceError::Unauthenticated(reason) | ServiceError::CsrfMismatch(reason) => {
                tracing::warn!(reason = %reason, "Rejected request");
                AppError::Unauthorized(anyhow::anyhow!(AUTH_REQUIRED))
            }
            ServiceError::Validation { field, message } => AppError::InvalidField { field, message },
            e @ ServiceError::UnsupportedType { .. } => {
                AppError::UnsupportedMediaType(anyhow::anyhow!(e.to_string()))
            }
            e @ ServiceError::PayloadTooLarge { .. } => {
                AppError::PayloadTooLarge(anyhow::anyhow!(e.to_string()))
            }
            e @ ServiceError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(e.to_string())),
            ServiceError::ProfileNotFound => AppError::NotFound(anyhow::anyhow!("Profile not found")),
            ServiceError::MalformedBody(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::RateLimited { retry_after } => AppError::TooManyRequests(
                "Too many requests. Please try again later.".to_string(),
                Some(retry_after),
            ),
            ServiceError::StorageUnavailable(detail) => {
                tracing::error!(detail = %detail, "Storage unavailable");
                AppError::ServiceUnavailable
            }
            e @ ServiceError::InvalidIdentifier => AppError::BadRequest(anyhow::anyhow!(e.to_string())),
            e @ (ServiceError::CodeExpired | ServiceError::CodeMismatch) => {
                AppError::AuthError(anyhow::anyhow!(e.to_string()))
            }
            e @ ServiceError::TooManyAttempts => AppError::TooManyRequests(e.to_string(), None),
            ServiceError::Persistence(e) => AppError::DatabaseError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    async fn body_of(err: ServiceError) -> (StatusCode, String) {
        let response = AppError::from(err).into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn csrf_and_session_failures_are_indistinguishable() {
        let missing = body_of(ServiceError::Unauthenticated("no session".into())).await;
        let forged = body_of(ServiceError::CsrfMismatch("token from another session".into())).await;
        assert_eq!(missing, forged);
        assert_eq!(missing.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_codes_follow_error_kind() {
        let cases = vec![
            (ServiceError::validation("city", "is required"), StatusCode::UNPROCESSABLE_ENTITY),
            (
                ServiceError::UnsupportedType {
                    slot: DocumentSlot::Photo,
                    content_type: "application/pdf".into(),
                },
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (
                ServiceError::PayloadTooLarge { limit: 10, actual: 11 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (ServiceError::NotFound(DocumentSlot::Cv), StatusCode::NOT_FOUND),
            (ServiceError::RateLimited { retry_after: 30 }, StatusCode::TOO_MANY_REQUESTS),
            (ServiceError::StorageUnavailable("timeout".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, expected) in cases {
            assert_eq!(body_of(err).await.0, expected);
        }
    }

    #[tokio::test]
    async fn validation_names_the_field() {
        let (_, body) = body_of(ServiceError::validation("bar_number", "is required")).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["field"], "bar_number");
    }
}
