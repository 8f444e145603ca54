//! Error types for the value crate.

use crate::value::ValueKind;
use thiserror::Error;

/// Result type for value operations.
pub type ValueResult<T> = Result<T, ValueError>;

/// Errors that can occur when manipulating values and patches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The operation needs a map but found another kind of value.
    #[error("expected a map, found {kind}")]
    NotAMap {
        /// Kind of the value that was found.
        kind: ValueKind,
    },

    /// A field path had no segments.
    #[error("field path is empty")]
    EmptyPath,

    /// A field path contained an empty segment.
    #[error("invalid field path: {path:?}")]
    InvalidPath {
        /// The offending path.
        path: String,
    },
}

impl ValueError {
    /// Create a not-a-map error for the given kind.
    pub fn not_a_map(kind: ValueKind) -> Self {
        Self::NotAMap { kind }
    }

    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }
}
