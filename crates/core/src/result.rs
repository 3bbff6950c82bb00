//! Result type definition and extension traits.
//!
//! Provides combinators for the idempotent store operations, so callers can
//! state which error kinds they treat as success without unwrap/expect.

use crate::error::Error;

/// The standard Result type for appsync object operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for tolerating the error kinds that idempotent operations
/// consider a no-op.
///
/// # Examples
///
/// ```ignore
/// // A delete of something already gone is fine
/// store.delete(Kind::Service, &key).await.ignore_not_found()?;
///
/// // A get that may legitimately miss
/// let existing = store.get(Kind::Deployment, &key).await.found()?;
/// ```
pub trait StoreResultExt<T> {
    /// Turn `NotFound` into `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns every other error unchanged.
    fn found(self) -> Result<Option<T>>;

    /// Turn `NotFound` into `Ok(())`, discarding the value.
    ///
    /// # Errors
    ///
    /// Returns every other error unchanged.
    fn ignore_not_found(self) -> Result<()>;

    /// Turn `AlreadyExists` into `Ok(())`, discarding the value.
    ///
    /// # Errors
    ///
    /// Returns every other error unchanged.
    fn ignore_already_exists(self) -> Result<()>;
}

impl<T> StoreResultExt<T> for Result<T> {
    fn found(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn ignore_not_found(self) -> Result<()> {
        self.found().map(|_| ())
    }

    fn ignore_already_exists(self) -> Result<()> {
        match self {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Extension trait providing logging combinators for Results.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error if present.
    fn into_option_logged(self, context: &str) -> Option<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, "{context}");
                None
            }
        }
    }
}
