//! Deployment notifications for external systems.

use appsync_core::Application;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Progress of a rollout as seen by external systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutStatus {
    /// Resources were written to the cluster.
    Initialized,
    /// The workload converged.
    Complete,
}

impl RolloutStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deployment notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub correlation_id: String,
    pub application: String,
    pub namespace: String,
    pub cluster: String,
    pub image: String,
    pub rollout_status: RolloutStatus,
    pub timestamp: DateTime<Utc>,
}

impl DeploymentEvent {
    /// Build an event describing `app` in `cluster`.
    #[must_use]
    pub fn new(app: &Application, cluster: &str, rollout_status: RolloutStatus) -> Self {
        Self {
            correlation_id: app.correlation_id().to_string(),
            application: app.name().to_string(),
            namespace: app.namespace().to_string(),
            cluster: cluster.to_string(),
            image: app.spec.image.clone(),
            rollout_status,
            timestamp: Utc::now(),
        }
    }
}

/// Fire-and-forget sink for deployment notifications.
pub trait Publisher: Send + Sync {
    /// Hand an event off. Must not block.
    fn publish(&self, event: DeploymentEvent);
}

/// Publisher backed by a bounded channel.
///
/// Events are dropped with a warning when the consumer falls behind.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: mpsc::Sender<DeploymentEvent>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiving end of its channel.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<DeploymentEvent>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, event: DeploymentEvent) {
        let correlation_id = event.correlation_id.clone();
        match self.sender.try_send(event) {
            Ok(()) => debug!(correlation_id, "Deployment event queued"),
            Err(mpsc::error::TrySendError::Full(dropped)) => warn!(
                correlation_id,
                application = %dropped.application,
                "Deployment event channel full, dropping event"
            ),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(correlation_id, "Deployment event channel closed");
            }
        }
    }
}

/// Send a notification unless the Application opted out.
pub(crate) fn publish_unless_opted_out(
    publisher: Option<&dyn Publisher>,
    app: &Application,
    cluster: &str,
    status: RolloutStatus,
) -> bool {
    let Some(publisher) = publisher else {
        return false;
    };
    if app.skip_deployment_message() {
        debug!(
            namespace = app.namespace(),
            application = app.name(),
            "Application opted out of deployment messages"
        );
        return false;
    }
    publisher.publish(DeploymentEvent::new(app, cluster, status));
    true
}
