//! Error types for Mnemos

use thiserror::Error;

/// Result type alias for Mnemos operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Main error type for Mnemos
///
/// Variants are stable: callers match on them to distinguish validation,
/// auth, rate-limit, and backend failures.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MemoryError {
    /// Check if the operation that produced this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoryError::Storage(_)
                | MemoryError::Database(_)
                | MemoryError::BackendUnavailable(_)
        )
    }

    /// Redacted form for external callers in production mode
    pub fn redacted(&self) -> String {
        match self {
            MemoryError::Internal(_) => "Internal error".to_string(),
            MemoryError::Database(_) | MemoryError::Storage(_) => "Storage error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MemoryError::Storage("boom".into()).is_retryable());
        assert!(!MemoryError::Validation("bad".into()).is_retryable());
        assert!(!MemoryError::RateLimited(30).is_retryable());
    }

    #[test]
    fn test_redaction_hides_internals() {
        let err = MemoryError::Internal("connection string leaked".into());
        assert_eq!(err.redacted(), "Internal error");

        let err = MemoryError::Auth("Token expired".into());
        assert!(err.redacted().contains("Token expired"));
    }
}
