//! Core error types for cluster object operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.
//! Store implementations must map their failures onto these kinds so the
//! reconciler can tell a missing object from a concurrent write.

use thiserror::Error;

use crate::kind::Kind;

/// Core error type for object store and model operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    // Store outcomes the engine branches on
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: String },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: String, key: String },

    #[error("conflict writing {kind} '{key}': {reason}")]
    Conflict {
        kind: String,
        key: String,
        reason: String,
    },

    // Model errors
    #[error("invalid object: {reason}")]
    Invalid { reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    // Generic errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: impl std::fmt::Display, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: impl std::fmt::Display, key: impl std::fmt::Display) -> Self {
        Self::AlreadyExists {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    /// Create an optimistic concurrency conflict error.
    pub fn conflict(
        kind: impl std::fmt::Display,
        key: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an invalid object error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// Convenience for a missing dependent object.
    pub fn object_not_found(kind: Kind, key: impl std::fmt::Display) -> Self {
        Self::not_found(kind, key)
    }

    /// Whether the error means the target object does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the error means the object was already present.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Whether the error is an optimistic concurrency rejection.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Machine readable reason, in the style of API status reasons.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::AlreadyExists { .. } => "AlreadyExists",
            Self::Conflict { .. } => "Conflict",
            Self::Invalid { .. } => "Invalid",
            Self::Serialization { .. } => "BadRequest",
            Self::Internal(_) => "InternalError",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
