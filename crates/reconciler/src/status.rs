//! Serialized status writes.
//!
//! A normal reconciliation pass and a rollout monitor finishing late may
//! both want to write the same Application's status. Every status write in
//! the process goes through one [`StatusUpdater`] lock: fetch the latest
//! copy, mutate its status, write it back. The lock covers all
//! Applications.

use std::sync::Arc;

use appsync_core::{Application, ApplicationStatus, ObjectKey};
use appsync_store::ObjectStore;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Read-modify-write guard for Application status.
#[derive(Clone)]
pub struct StatusUpdater {
    store: Arc<dyn ObjectStore>,
    lock: Arc<Mutex<()>>,
}

impl StatusUpdater {
    /// Create an updater. Clones share the same lock.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Apply `mutate` to the freshest status of the Application at `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::StatusUpdate` if the Application cannot be fetched
    /// or written.
    pub async fn update<F>(&self, key: &ObjectKey, mutate: F) -> Result<Application>
    where
        F: FnOnce(&mut ApplicationStatus) + Send,
    {
        let _guard = self.lock.lock().await;

        let mut latest = self
            .store
            .get_application(key)
            .await
            .map_err(|e| Error::status_update(format!("get newest version of {key}: {e}")))?;

        mutate(&mut latest.status);

        let written = self
            .store
            .update_application_status(latest)
            .await
            .map_err(|e| Error::status_update(format!("write status of {key}: {e}")))?;

        debug!(
            key = %key,
            state = ?written.status.synchronization_state,
            "Application status updated"
        );
        Ok(written)
    }

    /// Replace the whole status of the Application at `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::StatusUpdate` if the Application cannot be fetched
    /// or written.
    pub async fn replace(&self, key: &ObjectKey, status: ApplicationStatus) -> Result<Application> {
        self.update(key, move |current| *current = status).await
    }
}
