//! Object store trait and tracing decorator.

use appsync_core::{Application, ClusterEvent, Kind, LabelSelector, Object, ObjectKey, Result};
use async_trait::async_trait;

use crate::watch::WatchSubscription;

/// Read/write access to cluster state.
///
/// Implementations provide optimistic concurrency: an update carrying a
/// stale `resource_version` fails with `Error::Conflict`. Missing objects
/// are reported as `Error::NotFound` and duplicate creates as
/// `Error::AlreadyExists`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an Application.
    async fn get_application(&self, key: &ObjectKey) -> Result<Application>;

    /// List every Application in every namespace.
    async fn list_applications(&self) -> Result<Vec<Application>>;

    /// Store a new Application.
    async fn create_application(&self, app: Application) -> Result<Application>;

    /// Replace an Application's metadata and spec. Status is left alone.
    async fn update_application(&self, app: Application) -> Result<Application>;

    /// Replace an Application's status only.
    async fn update_application_status(&self, app: Application) -> Result<Application>;

    /// Remove an Application.
    async fn delete_application(&self, key: &ObjectKey) -> Result<()>;

    /// Fetch a dependent object.
    async fn get(&self, kind: Kind, key: &ObjectKey) -> Result<Object>;

    /// List objects of a kind in a namespace matching a label selector.
    async fn list(&self, kind: Kind, namespace: &str, selector: &LabelSelector)
    -> Result<Vec<Object>>;

    /// Store a new object.
    async fn create(&self, object: Object) -> Result<Object>;

    /// Replace an object's metadata and spec. Status is left alone.
    async fn update(&self, object: Object) -> Result<Object>;

    /// Replace an object's status only.
    async fn update_status(&self, object: Object) -> Result<Object>;

    /// Remove an object.
    async fn delete(&self, kind: Kind, key: &ObjectKey) -> Result<()>;

    /// List events about the object with the given name and uid.
    async fn list_events(
        &self,
        namespace: &str,
        involved_name: &str,
        involved_uid: &str,
    ) -> Result<Vec<ClusterEvent>>;

    /// Store a new event.
    async fn create_event(&self, event: ClusterEvent) -> Result<ClusterEvent>;

    /// Replace an existing event.
    async fn update_event(&self, event: ClusterEvent) -> Result<ClusterEvent>;

    /// Subscribe to change notifications.
    fn watch(&self) -> WatchSubscription;
}

/// A wrapper that adds tracing to an object store.
pub struct TracingObjectStore<S: ObjectStore> {
    inner: S,
}

impl<S: ObjectStore> TracingObjectStore<S> {
    /// Create a new tracing object store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Get the wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for TracingObjectStore<S> {
    async fn get_application(&self, key: &ObjectKey) -> Result<Application> {
        tracing::debug!(key = %key, "Getting application");
        self.inner.get_application(key).await
    }

    async fn list_applications(&self) -> Result<Vec<Application>> {
        tracing::debug!("Listing applications");
        self.inner.list_applications().await
    }

    async fn create_application(&self, app: Application) -> Result<Application> {
        tracing::debug!(key = %app.key(), "Creating application");
        self.inner.create_application(app).await
    }

    async fn update_application(&self, app: Application) -> Result<Application> {
        tracing::debug!(key = %app.key(), version = ?app.metadata.resource_version, "Updating application");
        self.inner.update_application(app).await
    }

    async fn update_application_status(&self, app: Application) -> Result<Application> {
        tracing::debug!(key = %app.key(), version = ?app.metadata.resource_version, "Updating application status");
        let result = self.inner.update_application_status(app).await;
        if let Ok(ref stored) = result {
            tracing::trace!(version = ?stored.metadata.resource_version, "Application status stored");
        }
        result
    }

    async fn delete_application(&self, key: &ObjectKey) -> Result<()> {
        tracing::debug!(key = %key, "Deleting application");
        self.inner.delete_application(key).await
    }

    async fn get(&self, kind: Kind, key: &ObjectKey) -> Result<Object> {
        tracing::debug!(kind = %kind, key = %key, "Getting object");
        self.inner.get(kind, key).await
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Object>> {
        tracing::debug!(kind = %kind, namespace, selector = ?selector.match_labels, "Listing objects");
        self.inner.list(kind, namespace, selector).await
    }

    async fn create(&self, object: Object) -> Result<Object> {
        tracing::debug!(object = %object.describe(), "Creating object");
        self.inner.create(object).await
    }

    async fn update(&self, object: Object) -> Result<Object> {
        tracing::debug!(object = %object.describe(), version = ?object.metadata.resource_version, "Updating object");
        self.inner.update(object).await
    }

    async fn update_status(&self, object: Object) -> Result<Object> {
        tracing::debug!(object = %object.describe(), "Updating object status");
        self.inner.update_status(object).await
    }

    async fn delete(&self, kind: Kind, key: &ObjectKey) -> Result<()> {
        tracing::debug!(kind = %kind, key = %key, "Deleting object");
        self.inner.delete(kind, key).await
    }

    async fn list_events(
        &self,
        namespace: &str,
        involved_name: &str,
        involved_uid: &str,
    ) -> Result<Vec<ClusterEvent>> {
        tracing::debug!(namespace, involved_name, "Listing events");
        self.inner
            .list_events(namespace, involved_name, involved_uid)
            .await
    }

    async fn create_event(&self, event: ClusterEvent) -> Result<ClusterEvent> {
        tracing::debug!(reason = %event.reason, involved = %event.involved_object.name, "Creating event");
        self.inner.create_event(event).await
    }

    async fn update_event(&self, event: ClusterEvent) -> Result<ClusterEvent> {
        tracing::debug!(reason = %event.reason, count = event.count, "Updating event");
        self.inner.update_event(event).await
    }

    fn watch(&self) -> WatchSubscription {
        self.inner.watch()
    }
}
