//! Reconciliation state machine for Applications.
//!
//! One call to [`Reconciler::reconcile`] is one pass for one Application:
//!
//! 1. **Fetch** the Application. A missing one is treated as deleted.
//! 2. **Prepare** a [`Rollout`]: defaults, hash gate, correlation ID,
//!    namespace features, generated operations.
//! 3. **Sync** the rollout: unreferenced objects are deleted first, then
//!    the generated operations are applied in order.
//! 4. **Write back** status through the serialized status path and spawn a
//!    rollout monitor on success.

use std::sync::Arc;

use appsync_core::{
    Application, EventType, Kind, ObjectKey, StoreResultExt, SyncState,
};
use appsync_store::ObjectStore;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::applier::{self, Applier, Commit, CommitExecutor};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gc::GarbageCollector;
use crate::generator::{DesiredStateGenerator, PROJECT_ID_ANNOTATION, StandardGenerator};
use crate::metrics::SyncMetrics;
use crate::monitor::{MonitorConfig, RolloutMonitor};
use crate::publisher::{Publisher, RolloutStatus, publish_unless_opted_out};
use crate::registry::RoutingRegistry;
use crate::reporter::EventReporter;
use crate::status::StatusUpdater;
use crate::types::{Reconciled, Requeue, ResourceOperation, ResourceOptions, Rollout};

/// Namespace label naming the Istio revision injected into pods.
pub const ISTIO_REVISION_LABEL: &str = "istio.io/rev";
/// Namespace annotation enabling Linkerd injection.
pub const LINKERD_INJECT_ANNOTATION: &str = "linkerd.io/inject";

const SUCCESS_MESSAGE: &str = "Successfully synchronized all application resources";

/// Drives Applications toward their desired state.
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    generator: Arc<dyn DesiredStateGenerator>,
    applier: Applier,
    gc: GarbageCollector,
    reporter: EventReporter,
    status: StatusUpdater,
    monitor: RolloutMonitor,
    registry: Option<Arc<RoutingRegistry>>,
    publisher: Option<Arc<dyn Publisher>>,
    metrics: Arc<SyncMetrics>,
    config: Config,
}

impl Reconciler {
    /// Create a reconciler with the standard generator and no publisher.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if `config` does not validate.
    pub fn new(store: Arc<dyn ObjectStore>, config: Config) -> Result<Self> {
        ReconcilerBuilder::new()
            .with_store(store)
            .with_config(config)
            .build()
    }

    /// Run one reconciliation pass for the Application at `key`.
    ///
    /// The pass is bounded by `synchronizer.synchronization_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error when the Application should be retried: the fetch
    /// failed, a commit hit a conflict (`Retrying`), or the pass timed out. Failures that are recorded in status are otherwise
    /// swallowed and reflected in the returned [`Reconciled`].
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Reconciled> {
        let timeout = self.config.synchronizer.synchronization_timeout;
        match tokio::time::timeout(timeout, self.reconcile_pass(key)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(key = %key, timeout_ms = timeout.as_millis(), "Reconciliation timed out");
                Err(Error::timeout(format!("reconcile {key}"), timeout))
            }
        }
    }

    async fn reconcile_pass(&self, key: &ObjectKey) -> Result<Reconciled> {
        let Some(fetched) = self.store.get_application(key).await.found()? else {
            self.cleanup_deleted(key).await;
            return Ok(Reconciled::idle());
        };

        let rollout = match self.prepare(&fetched).await {
            Ok(Some(rollout)) => rollout,
            Ok(None) => {
                debug!(
                    namespace = fetched.namespace(),
                    application = fetched.name(),
                    "Synchronization hash not changed; skipping synchronization"
                );
                return Ok(Reconciled::idle());
            }
            Err(err) => return Ok(self.failed_prepare(fetched, &err).await),
        };

        let mut app = rollout.app.clone();
        app.status.correlation_id.clone_from(&rollout.correlation_id);
        self.metrics.application_processed();
        self.metrics.resources_generated(rollout.operations.len());

        info!(
            namespace = app.namespace(),
            application = app.name(),
            correlation_id = %rollout.correlation_id,
            operations = rollout.operations.len(),
            "Starting synchronization"
        );

        if let Err(err) = self.sync(&rollout).await {
            if err.is_retryable() {
                app.status.synchronization_state = Some(SyncState::Retrying);
                self.metrics.retry();
                self.reporter
                    .report_error(&app, SyncState::Retrying, &err)
                    .await;
                self.write_status(&app).await;
                return Err(err);
            }

            app.status.synchronization_state = Some(SyncState::FailedSynchronization);
            app.status
                .synchronization_hash
                .clone_from(&rollout.synchronization_hash);
            self.metrics.application_failed();
            self.reporter
                .report_error(&app, SyncState::FailedSynchronization, &err)
                .await;
            self.write_status(&app).await;
            return Ok(Reconciled::finished(
                SyncState::FailedSynchronization,
                Requeue::Never,
            ));
        }

        app.status.synchronization_state = Some(SyncState::Synchronized);
        app.status
            .synchronization_hash
            .clone_from(&rollout.synchronization_hash);
        app.status.synchronization_time = Some(Utc::now());
        self.metrics.deployment();

        if let Err(e) = self
            .reporter
            .report(&app, SyncState::Synchronized, SUCCESS_MESSAGE, EventType::Normal)
            .await
        {
            warn!(
                namespace = app.namespace(),
                application = app.name(),
                error = %e,
                "Unable to report synchronization event"
            );
        }

        if publish_unless_opted_out(
            self.publisher.as_deref(),
            &app,
            &self.config.cluster_name,
            RolloutStatus::Initialized,
        ) {
            app.status.deployment_rollout_status = Some(RolloutStatus::Initialized.to_string());
        }

        info!(
            namespace = app.namespace(),
            application = app.name(),
            correlation_id = %rollout.correlation_id,
            "Successfully synchronized all application resources"
        );

        // Status goes out before the monitor starts so a fast rollout's
        // completion is never overwritten by this pass.
        self.write_status(&app).await;
        let monitor = self.monitor.spawn(app);

        Ok(Reconciled::finished(SyncState::Synchronized, Requeue::Never).with_monitor(monitor))
    }

    /// Turn an Application into a rollout.
    ///
    /// Returns `Ok(None)` when the effective spec hash matches the one in
    /// status and nothing needs doing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Prepare` when the Application cannot be rolled out
    /// in its namespace as configured.
    pub async fn prepare(&self, fetched: &Application) -> Result<Option<Rollout>> {
        let mut app = fetched.clone();
        app.apply_defaults()
            .map_err(|e| Error::prepare(format!("merge default values into application: {e}")))?;

        let synchronization_hash = app
            .hash()
            .map_err(|e| Error::prepare(format!("create application hash: {e}")))?;
        if app.status.synchronization_hash == synchronization_hash {
            return Ok(None);
        }

        app.ensure_correlation_id();
        let correlation_id = app.correlation_id().to_string();

        let mut options = self.base_options();
        options.num_replicas = self.resolve_replicas(&app).await?;
        self.inspect_namespace(&app, &mut options).await?;

        let mut operations = self
            .generator
            .generate(&app, &options)
            .map_err(|e| Error::prepare(format!("creating cluster resource operations: {e}")))?;

        if let Some(registry) = &self.registry {
            let vacated = registry.add(&app).await?;
            operations.extend(
                vacated
                    .into_iter()
                    .chain(registry.virtual_services(&app).await)
                    .map(ResourceOperation::create_or_update),
            );
        }

        Ok(Some(Rollout {
            app,
            options,
            synchronization_hash,
            correlation_id,
            operations,
        }))
    }

    async fn sync(&self, rollout: &Rollout) -> Result<()> {
        let unreferenced = match self
            .gc
            .unreferenced(&rollout.app, &rollout.operations)
            .await
        {
            Ok(objects) => objects,
            Err(e) => {
                warn!(
                    namespace = rollout.app.namespace(),
                    application = rollout.app.name(),
                    error = %e,
                    "Skipping cleanup of obsolete resources"
                );
                self.reporter
                    .report_error(&rollout.app, SyncState::FailedSynchronization, &e)
                    .await;
                Vec::new()
            }
        };

        let commits = applier::plan(&rollout.operations, unreferenced);
        let applied = self.applier.apply(&commits).await?;
        debug!(
            namespace = rollout.app.namespace(),
            application = rollout.app.name(),
            applied,
            "All commits applied"
        );
        Ok(())
    }

    fn base_options(&self) -> ResourceOptions {
        ResourceOptions {
            num_replicas: 0,
            istio: false,
            linkerd: false,
            access_policy: self.config.features.access_policy,
            google_project_id: self.config.google_project_id.clone(),
            google_team_project_id: None,
            cluster_name: self.config.cluster_name.clone(),
        }
    }

    /// Keep the running replica count so a rollout does not scale the
    /// workload back to its minimum.
    async fn resolve_replicas(&self, app: &Application) -> Result<i32> {
        let previous = self
            .store
            .get(Kind::Deployment, &app.key())
            .await
            .found()
            .map_err(|e| Error::prepare(format!("query existing deployment: {e}")))?;

        let min = app.spec.replicas.map_or(1, |r| r.min);
        Ok(previous
            .and_then(|deployment| deployment.desired_replicas())
            .map_or(min, |replicas| replicas.max(1)))
    }

    async fn inspect_namespace(&self, app: &Application, options: &mut ResourceOptions) -> Result<()> {
        let namespace = self
            .store
            .get(Kind::Namespace, &ObjectKey::cluster(app.namespace()))
            .await
            .found()
            .map_err(|e| Error::prepare(format!("query namespace: {e}")))?;
        let (labels, annotations) = namespace
            .map(|ns| (ns.metadata.labels, ns.metadata.annotations))
            .unwrap_or_default();

        if app.spec.cloud.as_ref().is_some_and(|c| !c.is_empty()) {
            let project = annotations.get(PROJECT_ID_ANNOTATION).ok_or_else(|| {
                Error::prepare(format!(
                    "cloud resources requested, but no team project ID annotation set on namespace {}",
                    app.namespace()
                ))
            })?;
            options.google_team_project_id = Some(project.clone());
        }

        let features = self.config.features;
        options.istio = features.istio
            && labels
                .get(ISTIO_REVISION_LABEL)
                .is_some_and(|rev| !rev.is_empty());
        options.linkerd = features.linkerd
            && annotations
                .get(LINKERD_INJECT_ANNOTATION)
                .is_some_and(|v| v == "enabled");

        if options.istio && options.linkerd {
            return Err(Error::prepare(format!(
                "refusing to roll out application in namespace {} with both Istio and Linkerd enabled",
                app.namespace()
            )));
        }
        Ok(())
    }

    async fn failed_prepare(&self, mut app: Application, err: &Error) -> Reconciled {
        app.status.synchronization_state = Some(SyncState::FailedPrepare);
        self.metrics.application_failed();
        self.reporter
            .report_error(&app, SyncState::FailedPrepare, err)
            .await;
        self.write_status(&app).await;

        let retry_in = self.config.synchronizer.prepare_retry_interval;
        info!(
            namespace = app.namespace(),
            application = app.name(),
            retry_in_secs = retry_in.as_secs(),
            "Scheduling prepare retry"
        );
        Reconciled::finished(SyncState::FailedPrepare, Requeue::After(retry_in))
    }

    /// Persist `app.status`. Failures become `FailedStatusUpdate` events.
    async fn write_status(&self, app: &Application) {
        let status = app.status.clone();
        if let Err(err) = self.status.replace(&app.key(), status).await {
            self.reporter
                .report_error(app, SyncState::FailedStatusUpdate, &err)
                .await;
        }
    }

    async fn cleanup_deleted(&self, key: &ObjectKey) {
        info!(key = %key, "Application has been deleted from the cluster");

        let Some(registry) = &self.registry else {
            return;
        };

        let commits: Vec<Commit> = registry
            .remove(&key.name, &key.namespace)
            .await
            .into_iter()
            .map(Commit::CreateOrUpdate)
            .collect();
        if commits.is_empty() {
            return;
        }

        if let Err(e) = self.applier.apply(&commits).await {
            error!(key = %key, error = %e, "Unable to update routing after deletion");
        }
    }

    /// Get the metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    /// Get the routing registry, when enabled.
    #[must_use]
    pub fn registry(&self) -> Option<&Arc<RoutingRegistry>> {
        self.registry.as_ref()
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the object store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    store: Option<Arc<dyn ObjectStore>>,
    generator: Option<Arc<dyn DesiredStateGenerator>>,
    executor: Option<Arc<dyn CommitExecutor>>,
    publisher: Option<Arc<dyn Publisher>>,
    registry: Option<Arc<RoutingRegistry>>,
    metrics: Option<Arc<SyncMetrics>>,
    config: Config,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: None,
            generator: None,
            executor: None,
            publisher: None,
            registry: None,
            metrics: None,
            config: Config::default(),
        }
    }

    /// Set the object store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set a custom desired-state generator.
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn DesiredStateGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set a custom commit executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn CommitExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the deployment event publisher.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Share a routing registry instead of creating one from config.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<RoutingRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share metrics counters.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if no store was set or the
    /// configuration does not validate.
    pub fn build(self) -> Result<Reconciler> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("Object store is required"))?;
        self.config.validate()?;

        let config = self.config;
        let metrics = self.metrics.unwrap_or_default();
        let generator = self
            .generator
            .unwrap_or_else(|| Arc::new(StandardGenerator::new()));
        let applier = match self.executor {
            Some(executor) => Applier::new(executor, Arc::clone(&metrics)),
            None => Applier::for_store(Arc::clone(&store), Arc::clone(&metrics)),
        };
        let gc = GarbageCollector::for_cluster(
            Arc::clone(&store),
            config.google_project_id.as_deref(),
        );
        let reporter = EventReporter::new(Arc::clone(&store));
        let status = StatusUpdater::new(Arc::clone(&store));
        let publisher = self.publisher.filter(|_| config.publisher.enabled);
        let registry = self.registry.or_else(|| {
            config
                .registry
                .enabled
                .then(|| Arc::new(RoutingRegistry::new(config.registry.namespace.clone())))
        });

        let mut monitor = RolloutMonitor::new(
            Arc::clone(&store),
            reporter.clone(),
            status.clone(),
            MonitorConfig {
                poll_interval: config.synchronizer.rollout_check_interval,
                timeout: config.synchronizer.rollout_timeout,
            },
        );
        if let Some(publisher) = &publisher {
            monitor = monitor.with_publisher(Arc::clone(publisher), &config.cluster_name);
        }

        Ok(Reconciler {
            store,
            generator,
            applier,
            gc,
            reporter,
            status,
            monitor,
            registry,
            publisher,
            metrics,
            config,
        })
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
