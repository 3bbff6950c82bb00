//! Core types for reconciliation.

use std::time::Duration;

use appsync_core::{Application, Object, SyncState};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::monitor::MonitorOutcome;

/// How a desired object should be written to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Create the object, or update the existing one in place.
    CreateOrUpdate,
    /// Delete any existing object, then create. For immutable-field changes.
    CreateOrRecreate,
    /// Create the object; an existing one is left untouched.
    CreateIfNotExists,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateOrUpdate => write!(f, "CreateOrUpdate"),
            Self::CreateOrRecreate => write!(f, "CreateOrRecreate"),
            Self::CreateIfNotExists => write!(f, "CreateIfNotExists"),
        }
    }
}

/// A desired object paired with the way it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOperation {
    pub object: Object,
    pub operation: Operation,
}

impl ResourceOperation {
    /// Create a new resource operation.
    pub const fn new(object: Object, operation: Operation) -> Self {
        Self { object, operation }
    }

    pub const fn create_or_update(object: Object) -> Self {
        Self::new(object, Operation::CreateOrUpdate)
    }

    pub const fn create_or_recreate(object: Object) -> Self {
        Self::new(object, Operation::CreateOrRecreate)
    }

    pub const fn create_if_not_exists(object: Object) -> Self {
        Self::new(object, Operation::CreateIfNotExists)
    }
}

/// Environment-dependent inputs to the desired-state generator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceOptions {
    /// Replica count for the Deployment.
    pub num_replicas: i32,
    /// Namespace is part of the Istio mesh.
    pub istio: bool,
    /// Namespace is part of the Linkerd mesh.
    pub linkerd: bool,
    /// Generate network policies.
    pub access_policy: bool,
    /// Cluster-wide Google project.
    pub google_project_id: Option<String>,
    /// Team project owning the Application's cloud resources.
    pub google_team_project_id: Option<String>,
    pub cluster_name: String,
}

/// One reconciliation pass worth of work for an Application.
///
/// Never persisted; lives for a single `Reconciler::reconcile` call.
#[derive(Debug, Clone)]
pub struct Rollout {
    /// Defaulted snapshot of the Application being processed.
    pub app: Application,
    pub options: ResourceOptions,
    pub synchronization_hash: String,
    pub correlation_id: String,
    pub operations: Vec<ResourceOperation>,
}

/// When the controller should look at an Application again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Wait for the next change notification.
    Never,
    /// Re-trigger after a delay.
    After(Duration),
}

/// Result of a reconciliation pass that did not error.
#[derive(Debug)]
pub struct Reconciled {
    pub requeue: Requeue,
    /// State written to status, or `None` when nothing was done.
    pub state: Option<SyncState>,
    /// Rollout monitor spawned by a successful synchronization.
    pub monitor: Option<JoinHandle<MonitorOutcome>>,
}

impl Reconciled {
    /// Nothing to do.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            requeue: Requeue::Never,
            state: None,
            monitor: None,
        }
    }

    /// A pass that ended in `state`.
    #[must_use]
    pub const fn finished(state: SyncState, requeue: Requeue) -> Self {
        Self {
            requeue,
            state: Some(state),
            monitor: None,
        }
    }

    /// Attach the spawned rollout monitor.
    #[must_use]
    pub fn with_monitor(mut self, monitor: JoinHandle<MonitorOutcome>) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appsync_core::{Kind, ObjectMeta};

    #[test]
    fn test_operation_serde_rejects_unknown() {
        let parsed: std::result::Result<Operation, _> = serde_json::from_str("\"Patch\"");
        assert!(parsed.is_err());

        let known: std::result::Result<Operation, _> = serde_json::from_str("\"CreateOrRecreate\"");
        assert_eq!(known.ok(), Some(Operation::CreateOrRecreate));
    }

    #[test]
    fn test_resource_operation_constructors() {
        let object = Object::new(
            Kind::Service,
            ObjectMeta::new("team", "web"),
            serde_json::Value::Null,
        );
        let op = ResourceOperation::create_if_not_exists(object);
        assert_eq!(op.operation, Operation::CreateIfNotExists);
        assert_eq!(op.object.identity(), (Kind::Service, "web"));
    }

    #[test]
    fn test_reconciled_idle() {
        let idle = Reconciled::idle();
        assert_eq!(idle.requeue, Requeue::Never);
        assert!(idle.state.is_none());
        assert!(idle.monitor.is_none());
    }
}
