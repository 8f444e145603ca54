//! Error types for the store crate.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a document store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The document does not exist.
    #[error("document not found: {path}")]
    NotFound {
        /// Path of the missing document.
        path: String,
    },

    /// A path or query could not be interpreted.
    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference {
        /// The rejected reference text.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The caller is not allowed to read or write the target.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The store is temporarily unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The write was rejected by the store.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// Internal store failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Creates a not-found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates an invalid-reference error.
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(StoreError::Unavailable("offline".into()).is_retryable());
        assert!(!StoreError::not_found("users/a").is_retryable());
        assert!(!StoreError::PermissionDenied("rules".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = StoreError::not_found("users/alice");
        assert_eq!(err.to_string(), "document not found: users/alice");

        let err = StoreError::invalid_reference("users", "not a document path");
        assert!(err.to_string().contains("not a document path"));
    }
}
