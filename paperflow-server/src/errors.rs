use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use paperflow_core::CoreError;
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

/// HTTP-facing error: a stable kind, a human message, optional details.
/// Stack traces never reach clients.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION", message)
    }

    pub fn auth_required() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "AUTH_REQUIRED",
            "authentication required",
        )
    }

    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "AUTH_INVALID", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "AUTHZ", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "kind": self.kind,
            "message": self.message,
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let kind = err.kind();
        let status = match kind {
            "VALIDATION" => StatusCode::BAD_REQUEST,
            "AUTH_REQUIRED" => StatusCode::UNAUTHORIZED,
            "AUTH_INVALID" => StatusCode::UNAUTHORIZED,
            "AUTHZ" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            "UPSTREAM_TRANSIENT" | "UPSTREAM_REJECT" => StatusCode::BAD_GATEWAY,
            "STORAGE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match kind {
            // Internal messages may carry connection strings or paths.
            "INTERNAL" => "internal error".to_string(),
            _ => err.to_string(),
        };
        Self::new(status, kind, message)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "unhandled error reached the API surface");
        Self::internal("internal error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_documented_statuses() {
        let cases = [
            (CoreError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (CoreError::AuthRequired, StatusCode::UNAUTHORIZED),
            (CoreError::AuthInvalid("x".into()), StatusCode::UNAUTHORIZED),
            (CoreError::Authz("x".into()), StatusCode::FORBIDDEN),
            (CoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (CoreError::AlreadyInFlight, StatusCode::CONFLICT),
            (
                CoreError::UpstreamTransient("x".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                CoreError::UpstreamReject("x".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                CoreError::StorageUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CoreError::Internal("secret".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status, expected);
        }
    }

    #[test]
    fn internal_messages_are_redacted() {
        let app_err = AppError::from(CoreError::Internal("postgres://user:pw@host".into()));
        assert_eq!(app_err.message, "internal error");
    }
}
