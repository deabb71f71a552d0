//! Error types for grantward

use thiserror::Error;

/// Coarse classification of a [`GrantError`], used by outer layers to pick a
/// status code without matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AuthorizationDenied,
    Validation,
    Conflict,
    Storage,
}

/// The main error type for grantward operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrantError {
    /// A group or user id does not resolve to a stored entity.
    #[error("{kind} {id} does not exist")]
    NotFound { kind: &'static str, id: String },

    /// The gate denied the caller; the guarded operation was never entered.
    #[error("{caller} lacks {required}")]
    AuthorizationDenied { caller: String, required: String },

    /// Malformed grant, duplicate or empty name, or an otherwise invalid request.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The persistence layer saw a concurrent write to the same entity.
    #[error("concurrent modification of {kind} {id}")]
    Conflict { kind: &'static str, id: String },

    /// The underlying store failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl GrantError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        GrantError::NotFound { kind, id: id.into() }
    }

    pub fn conflict(kind: &'static str, id: impl Into<String>) -> Self {
        GrantError::Conflict { kind, id: id.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        GrantError::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GrantError::NotFound { .. } => ErrorKind::NotFound,
            GrantError::AuthorizationDenied { .. } => ErrorKind::AuthorizationDenied,
            GrantError::Validation(_) => ErrorKind::Validation,
            GrantError::Conflict { .. } => ErrorKind::Conflict,
            GrantError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Result type alias for grantward operations
pub type Result<T> = std::result::Result<T, GrantError>;

/// Convert any storage-level error to GrantError
pub fn err<E: std::error::Error>(e: E) -> GrantError {
    GrantError::Storage(e.to_string())
}
