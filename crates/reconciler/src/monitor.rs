//! Background watcher for workload rollouts.
//!
//! After a successful synchronization the reconciler spawns one monitor per
//! Application. The monitor polls the Deployment until every desired
//! replica is updated and available, then reports `RolloutComplete`. It
//! runs on its own deadline and never fails the Application: a rollout
//! that does not converge in time is only logged.

use std::sync::Arc;
use std::time::Duration;

use appsync_core::{Application, EventType, Kind, SyncState};
use appsync_store::ObjectStore;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::publisher::{Publisher, RolloutStatus, publish_unless_opted_out};
use crate::reporter::EventReporter;
use crate::status::StatusUpdater;

/// Configuration for the rollout monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// How often to check the workload.
    pub poll_interval: Duration,
    /// How long to keep checking before giving up.
    pub timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

/// How a monitor ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The rollout converged and was reported.
    Completed,
    /// The deadline passed first.
    TimedOut,
}

/// Polls a Deployment until its rollout completes.
#[derive(Clone)]
pub struct RolloutMonitor {
    store: Arc<dyn ObjectStore>,
    reporter: EventReporter,
    status: StatusUpdater,
    publisher: Option<Arc<dyn Publisher>>,
    cluster_name: String,
    config: MonitorConfig,
}

impl RolloutMonitor {
    /// Create a new rollout monitor.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        reporter: EventReporter,
        status: StatusUpdater,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            reporter,
            status,
            publisher: None,
            cluster_name: String::new(),
            config,
        }
    }

    /// Publish a completion notification through `publisher`.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>, cluster_name: &str) -> Self {
        self.publisher = Some(publisher);
        self.cluster_name = cluster_name.to_string();
        self
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Watch `app`'s rollout on a detached task.
    ///
    /// The task owns a snapshot of the Application; dropping the handle
    /// does not stop it.
    pub fn spawn(&self, app: Application) -> JoinHandle<MonitorOutcome> {
        let monitor = self.clone();
        tokio::spawn(async move { monitor.run(app).await })
    }

    /// Watch `app`'s rollout until it completes or the deadline passes.
    pub async fn run(&self, app: Application) -> MonitorOutcome {
        debug!(
            namespace = app.namespace(),
            application = app.name(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            timeout_secs = self.config.timeout.as_secs(),
            "Rollout monitor started"
        );

        let poll = async {
            loop {
                tokio::time::sleep(self.config.poll_interval).await;
                if self.is_complete(&app).await {
                    return;
                }
            }
        };

        if tokio::time::timeout(self.config.timeout, poll).await.is_err() {
            info!(
                namespace = app.namespace(),
                application = app.name(),
                correlation_id = app.correlation_id(),
                "Rollout did not complete before the monitor timed out"
            );
            return MonitorOutcome::TimedOut;
        }

        self.complete(&app).await;
        MonitorOutcome::Completed
    }

    async fn is_complete(&self, app: &Application) -> bool {
        match self.store.get(Kind::Deployment, &app.key()).await {
            Ok(deployment) => {
                let desired = deployment.desired_replicas().unwrap_or(1);
                let status = deployment.deployment_status();
                debug!(
                    namespace = app.namespace(),
                    application = app.name(),
                    desired,
                    updated = status.updated_replicas,
                    available = status.available_replicas,
                    "Checking rollout"
                );
                status.is_complete(desired, deployment.metadata.generation)
            }
            Err(e) if e.is_not_found() => {
                debug!(
                    namespace = app.namespace(),
                    application = app.name(),
                    "Deployment not found, waiting"
                );
                false
            }
            Err(e) => {
                warn!(
                    namespace = app.namespace(),
                    application = app.name(),
                    error = %e,
                    "Unable to check rollout"
                );
                false
            }
        }
    }

    async fn complete(&self, app: &Application) {
        info!(
            namespace = app.namespace(),
            application = app.name(),
            correlation_id = app.correlation_id(),
            "Rollout complete"
        );

        publish_unless_opted_out(
            self.publisher.as_deref(),
            app,
            &self.cluster_name,
            RolloutStatus::Complete,
        );

        if let Err(e) = self
            .reporter
            .report(
                app,
                SyncState::RolloutComplete,
                "Deployment rollout has completed",
                EventType::Normal,
            )
            .await
        {
            warn!(
                namespace = app.namespace(),
                application = app.name(),
                error = %e,
                "Unable to report rollout complete event"
            );
        }

        let completed_at = Utc::now();
        let result = self
            .status
            .update(&app.key(), |status| {
                status.synchronization_state = Some(SyncState::RolloutComplete);
                status.rollout_complete_time = Some(completed_at);
                status.deployment_rollout_status = Some(RolloutStatus::Complete.to_string());
            })
            .await;

        if let Err(e) = result {
            self.reporter
                .report_error(app, SyncState::FailedStatusUpdate, &e)
                .await;
        }
    }
}
