//! Error types for the reconciler crate.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Turning the Application into a rollout failed.
    #[error("prepare failed: {reason}")]
    Prepare { reason: String },

    /// The desired-state generator rejected the spec.
    #[error("generate failed: {reason}")]
    Generate { reason: String },

    /// A commit against the object store failed.
    #[error("persisting {target} to cluster: {}: {source}", .source.reason())]
    Commit {
        target: String,
        source: appsync_core::Error,
    },

    /// Enumerating objects for garbage collection failed.
    #[error("unable to clean up obsolete resources: {reason}")]
    Cleanup { reason: String },

    /// Writing the Application status failed.
    #[error("status update failed: {reason}")]
    StatusUpdate { reason: String },

    /// Recording a cluster event failed.
    #[error("event error: {reason}")]
    Event { reason: String },

    /// A unit of work ran past its deadline.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Object store error outside a commit.
    #[error(transparent)]
    Store(#[from] appsync_core::Error),

    /// Controller loop was stopped.
    #[error("controller stopped")]
    Stopped,
}

impl Error {
    /// Create a prepare error.
    pub fn prepare(reason: impl Into<String>) -> Self {
        Self::Prepare {
            reason: reason.into(),
        }
    }

    /// Create a generate error.
    pub fn generate(reason: impl Into<String>) -> Self {
        Self::Generate {
            reason: reason.into(),
        }
    }

    /// Create a commit error.
    pub fn commit(target: impl Into<String>, source: appsync_core::Error) -> Self {
        Self::Commit {
            target: target.into(),
            source,
        }
    }

    /// Create a cleanup error.
    pub fn cleanup(reason: impl Into<String>) -> Self {
        Self::Cleanup {
            reason: reason.into(),
        }
    }

    /// Create a status update error.
    pub fn status_update(reason: impl Into<String>) -> Self {
        Self::StatusUpdate {
            reason: reason.into(),
        }
    }

    /// Create an event error.
    pub fn event(reason: impl Into<String>) -> Self {
        Self::Event {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether a failed synchronization should be retried right away.
    ///
    /// True only for optimistic concurrency conflicts. A retryable failure
    /// does not advance the synchronization hash.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Commit { source, .. } | Self::Store(source) => source.is_conflict(),
            _ => false,
        }
    }
}
