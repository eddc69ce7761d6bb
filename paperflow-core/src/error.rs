use thiserror::Error;

/// Error taxonomy surfaced to API clients and the audit log.
///
/// Each variant maps to a stable `kind` identifier; the server layer turns
/// the kind into an HTTP status. Leaf components classify at the point of
/// failure so callers never have to re-interpret error strings.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("invalid credentials or token: {0}")]
    AuthInvalid(String),

    #[error("permission denied: {0}")]
    Authz(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("submission already in flight")]
    AlreadyInFlight,

    #[error("upstream transient failure: {0}")]
    UpstreamTransient(String),

    #[error("upstream rejected the request: {0}")]
    UpstreamReject(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable identifier recorded in audit entries and returned to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION",
            CoreError::AuthRequired => "AUTH_REQUIRED",
            CoreError::AuthInvalid(_) => "AUTH_INVALID",
            CoreError::Authz(_) => "AUTHZ",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Conflict(_) | CoreError::AlreadyInFlight => "CONFLICT",
            CoreError::UpstreamTransient(_) => "UPSTREAM_TRANSIENT",
            CoreError::UpstreamReject(_) => "UPSTREAM_REJECT",
            CoreError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            CoreError::Io(_) | CoreError::Serialization(_) | CoreError::Internal(_) => "INTERNAL",
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        CoreError::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
            other => CoreError::Internal(format!("database error: {other}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(CoreError::Validation("x".into()).kind(), "VALIDATION");
        assert_eq!(CoreError::AlreadyInFlight.kind(), "CONFLICT");
        assert_eq!(CoreError::Conflict("dup".into()).kind(), "CONFLICT");
        assert_eq!(
            CoreError::StorageUnavailable("both backends".into()).kind(),
            "STORAGE_UNAVAILABLE"
        );
    }
}
