//! Error types for mirrors and the registry.

use mirrorsync_store::StoreError;
use mirrorsync_value::ValueKind;
use thiserror::Error;

/// Result type for mirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Errors surfaced by mirrors.
///
/// Errors are cloneable because a mirror keeps the last one it saw while
/// also handing it to the caller's error hook.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MirrorError {
    /// The change feed could not be opened or failed later.
    #[error("subscription to {reference} failed: {source}")]
    Subscription {
        /// Key of the subscribed reference.
        reference: String,
        /// Error reported by the store.
        #[source]
        source: StoreError,
    },

    /// A partial update was rejected.
    #[error("update of {path} failed: {source}")]
    Write {
        /// Path of the document being written.
        path: String,
        /// Error reported by the store.
        #[source]
        source: StoreError,
    },

    /// No usable reference was given.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// The mirror was closed and cannot be reopened.
    #[error("mirror has been disposed")]
    Disposed,

    /// The reference kind does not match the mirror kind.
    #[error("{mirror} mirror cannot follow {reference}")]
    KindMismatch {
        /// Kind of the mirror.
        mirror: &'static str,
        /// Key of the offending reference.
        reference: String,
    },

    /// A query mirror has no member with this id.
    #[error("no member {id:?} in query result")]
    UnknownMember {
        /// The requested document id.
        id: String,
    },

    /// A local value that is not a map cannot be written as a document.
    #[error("cannot write a {kind} value as a document")]
    NotADocument {
        /// Kind of the rejected value.
        kind: ValueKind,
    },
}

impl MirrorError {
    /// Creates a subscription error.
    pub fn subscription(reference: impl Into<String>, source: StoreError) -> Self {
        Self::Subscription {
            reference: reference.into(),
            source,
        }
    }

    /// Creates a write error.
    pub fn write(path: impl Into<String>, source: StoreError) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid-reference error.
    pub fn invalid_reference(reason: impl Into<String>) -> Self {
        Self::InvalidReference(reason.into())
    }

    /// Returns the store error behind this error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            MirrorError::Subscription { source, .. } | MirrorError::Write { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    /// Returns true if the failure came from a write.
    pub fn is_write(&self) -> bool {
        matches!(self, MirrorError::Write { .. })
    }
}

impl From<StoreError> for MirrorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidReference { reference, reason } => {
                MirrorError::InvalidReference(format!("{reference:?}: {reason}"))
            }
            other => MirrorError::subscription("", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = MirrorError::write("users/alice", StoreError::Rejected("rules".into()));
        assert_eq!(
            err.to_string(),
            "update of users/alice failed: write rejected: rules"
        );

        let err = MirrorError::NotADocument {
            kind: ValueKind::Array,
        };
        assert_eq!(err.to_string(), "cannot write a array value as a document");
    }

    #[test]
    fn store_error_is_exposed() {
        let source = StoreError::PermissionDenied("no access".into());
        let err = MirrorError::subscription("users", source.clone());
        assert_eq!(err.store_error(), Some(&source));
        assert!(!err.is_write());
        assert_eq!(MirrorError::Disposed.store_error(), None);
    }

    #[test]
    fn invalid_reference_converts() {
        let err: MirrorError = StoreError::invalid_reference("a/", "empty segment").into();
        assert!(matches!(err, MirrorError::InvalidReference(_)));
    }
}
