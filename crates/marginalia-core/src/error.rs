//! Error types for marginalia.

use thiserror::Error;

/// Result type alias using marginalia's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for marginalia operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found, or not owned by the caller.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Note not found (or owned by another user)
    #[error("Note not found: {0}")]
    NoteNotFound(uuid::Uuid),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unique constraint conflict (duplicate username, email, ...)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Blob exceeds the configured size ceiling
    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// Operation exceeded its time budget and was rolled back
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Blob store failure that is not a plain I/O error
    #[error("Blob storage error: {0}")]
    BlobStorage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing fields.
    Validation,
    /// Absent or not owned. Ownership failures never leak as "forbidden".
    NotFound,
    /// Duplicate of a unique value.
    Conflict,
    /// Upload over the ceiling, pool exhausted, or time budget exceeded.
    Capacity,
    /// Relational transaction or blob I/O failure.
    Storage,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Anything else.
    Internal,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::Validation,
            Error::NotFound(_) | Error::NoteNotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::PayloadTooLarge { .. } | Error::Timeout(_) => ErrorKind::Capacity,
            Error::Database(sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed) => {
                ErrorKind::Capacity
            }
            Error::Database(_) | Error::Io(_) | Error::BlobStorage(_) => ErrorKind::Storage,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Config(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the error is transient and the request may be retried.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Capacity && !matches!(self, Error::PayloadTooLarge { .. })
    }

    /// True for a blob or row that does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            other => other.kind() == ErrorKind::NotFound,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidInput(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_note_not_found() {
        let id = Uuid::nil();
        let err = Error::NoteNotFound(id);
        assert_eq!(err.to_string(), format!("Note not found: {}", id));
    }

    #[test]
    fn test_error_display_payload_too_large() {
        let err = Error::PayloadTooLarge {
            size: 11,
            limit: 10,
        };
        assert_eq!(
            err.to_string(),
            "Payload too large: 11 bytes exceeds limit of 10 bytes"
        );
    }

    #[test]
    fn test_kind_validation() {
        let err = Error::InvalidInput("empty content".to_string());
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_kind_not_found_covers_both_variants() {
        assert_eq!(
            Error::NotFound("attachment".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::NoteNotFound(Uuid::new_v4()).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_kind_pool_exhaustion_is_capacity() {
        let err = Error::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert!(err.is_transient());
    }

    #[test]
    fn test_kind_other_database_errors_are_storage() {
        let err = Error::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_payload_too_large_is_capacity_but_not_transient() {
        let err = Error::PayloadTooLarge { size: 2, limit: 1 };
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = Error::Timeout("create_note".into());
        assert!(err.is_transient());
    }

    #[test]
    fn test_io_not_found_detection() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_not_found());

        let err: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no").into();
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
