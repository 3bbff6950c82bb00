//! End-to-end reconciliation scenarios against the in-memory store.
//!
//! Tests verify that:
//! - A spec edit converges the owned object set and advances the hash
//! - An unchanged spec causes no writes at all
//! - Objects without the owner reference are never collected
//! - Conflicts retry without advancing the hash; permanent failures advance it
//! - A cleanup listing failure is reported but the pass still synchronizes
//! - A pass that overruns its deadline times out without writing status
//! - Repeated failures coalesce into one event
//! - Prepare failures, status write failures and deletions are handled

mod common;

use std::sync::Arc;
use std::time::Duration;

use appsync_core::{
    EventType, Kind, Labels, Object, ObjectKey, ObjectMeta, StoreResultExt, SyncState,
};
use appsync_reconciler::reconciler::{ISTIO_REVISION_LABEL, LINKERD_INJECT_ANNOTATION};
use appsync_reconciler::{
    ChannelPublisher, Commit, CommitExecutor, Error, MonitorOutcome, ReconcilerBuilder, Requeue,
    RolloutStatus,
};
use appsync_store::{InMemoryObjectStore, ObjectStore, StoreOp};
use async_trait::async_trait;
use common::{
    Harness, identities, quiet_config, scripted_app, unwrap_option, unwrap_result,
};
use serde_json::json;

// ==========================================================================
// CONVERGENCE
// ==========================================================================

#[tokio::test]
async fn spec_edit_replaces_service_with_ingress() {
    // GIVEN: an Application wanting Deployment d and Service s, no prior status
    let h = Harness::scripted(quiet_config());
    let app = h.create(scripted_app("a", &["Deployment/d", "Service/s"])).await;
    let key = app.key();

    // WHEN: it is reconciled
    let first = unwrap_result(h.reconciler.reconcile(&key).await, "first pass");

    // THEN: d and s exist and status is Synchronized with hash H1
    assert_eq!(first.state, Some(SyncState::Synchronized));
    assert_eq!(
        h.owned(&app.metadata.uid).await,
        identities(&["Deployment/d", "Service/s"])
    );
    let synced = h.application(&key).await;
    assert_eq!(synced.status.synchronization_state, Some(SyncState::Synchronized));
    assert!(synced.status.synchronization_time.is_some());
    assert!(!synced.status.correlation_id.is_empty());
    let h1 = synced.status.synchronization_hash.clone();
    assert!(!h1.is_empty());

    let d_before = unwrap_result(
        h.store.get(Kind::Deployment, &ObjectKey::new("team", "d")).await,
        "deployment d",
    );

    // WHEN: the spec drops s and adds Ingress i
    h.edit_objects(&key, &["Deployment/d", "Ingress/i"]).await;
    let second = unwrap_result(h.reconciler.reconcile(&key).await, "second pass");

    // THEN: i is created, s deleted, d updated in place, hash moves to H2
    assert_eq!(second.state, Some(SyncState::Synchronized));
    assert_eq!(
        h.owned(&app.metadata.uid).await,
        identities(&["Deployment/d", "Ingress/i"])
    );
    let d_after = unwrap_result(
        h.store.get(Kind::Deployment, &ObjectKey::new("team", "d")).await,
        "deployment d",
    );
    assert_eq!(d_after.metadata.uid, d_before.metadata.uid);
    assert!(d_after.metadata.resource_version > d_before.metadata.resource_version);

    let h2 = h.application(&key).await.status.synchronization_hash;
    assert_ne!(h1, h2);
}

#[tokio::test]
async fn unchanged_spec_performs_no_writes() {
    // GIVEN: a synchronized Application
    let h = Harness::scripted(quiet_config());
    let app = h.create(scripted_app("a", &["Deployment/d", "Service/s"])).await;
    unwrap_result(h.reconciler.reconcile(&app.key()).await, "first pass");
    let mutations = h.store.mutation_count();

    // WHEN: it is reconciled again without a spec change
    let again = unwrap_result(h.reconciler.reconcile(&app.key()).await, "second pass");

    // THEN: nothing was written, not even status
    assert!(again.state.is_none());
    assert!(again.monitor.is_none());
    assert_eq!(again.requeue, Requeue::Never);
    assert_eq!(h.store.mutation_count(), mutations);
}

#[tokio::test]
async fn unowned_objects_survive_collection() {
    // GIVEN: a Service labeled for the Application but without its owner reference
    let h = Harness::scripted(quiet_config());
    let app = h.create(scripted_app("a", &["Deployment/d"])).await;
    let mut meta = ObjectMeta::new("team", "legacy");
    meta.labels = Labels::from([("app".to_string(), "a".to_string())]);
    unwrap_result(
        h.store.create(Object::new(Kind::Service, meta, json!({}))).await,
        "create legacy service",
    );

    // WHEN: the Application is reconciled with a desired set that omits it
    unwrap_result(h.reconciler.reconcile(&app.key()).await, "pass");

    // THEN: the legacy Service is still there
    let legacy = h
        .store
        .get(Kind::Service, &ObjectKey::new("team", "legacy"))
        .await
        .found();
    assert!(matches!(legacy, Ok(Some(_))));
}

// ==========================================================================
// FAILURE CLASSIFICATION
// ==========================================================================

#[tokio::test]
async fn conflict_retries_without_advancing_hash() {
    // GIVEN: the Service create will hit an optimistic-concurrency conflict
    let h = Harness::scripted(quiet_config());
    let app = h.create(scripted_app("a", &["Deployment/d", "Service/s"])).await;
    h.store
        .fail_next(
            StoreOp::Create(Kind::Service),
            appsync_core::Error::conflict("Service", "team/s", "object has been modified"),
        )
        .await;

    // WHEN: it is reconciled
    let result = h.reconciler.reconcile(&app.key()).await;

    // THEN: the pass errors for an immediate requeue, status is Retrying, hash untouched
    assert!(result.as_ref().is_err_and(Error::is_retryable));
    let stored = h.application(&app.key()).await;
    assert_eq!(stored.status.synchronization_state, Some(SyncState::Retrying));
    assert!(stored.status.synchronization_hash.is_empty());

    // AND: the next pass completes the rollout
    let retried = unwrap_result(h.reconciler.reconcile(&app.key()).await, "retry");
    assert_eq!(retried.state, Some(SyncState::Synchronized));
    assert_eq!(h.reconciler.metrics().snapshot().retries, 1);
}

#[tokio::test]
async fn repeated_conflicts_coalesce_into_one_event() {
    // GIVEN: two passes that both conflict on the same Service
    let h = Harness::scripted(quiet_config());
    let app = h.create(scripted_app("a", &["Service/s"])).await;

    for _ in 0..2 {
        h.store
            .fail_next(
                StoreOp::Create(Kind::Service),
                appsync_core::Error::conflict("Service", "team/s", "object has been modified"),
            )
            .await;
        // WHEN: each is reconciled
        assert!(h.reconciler.reconcile(&app.key()).await.is_err());
    }

    // THEN: there is a single Retrying warning with count 2
    let retrying: Vec<_> = h
        .store
        .events()
        .await
        .into_iter()
        .filter(|e| e.reason == SyncState::Retrying.as_str())
        .collect();
    assert_eq!(retrying.len(), 1);
    assert_eq!(retrying[0].count, 2);
    assert_eq!(retrying[0].event_type, EventType::Warning);
}

#[tokio::test]
async fn permanent_failure_advances_hash() {
    // GIVEN: the Service create is rejected outright
    let h = Harness::scripted(quiet_config());
    let app = h.create(scripted_app("a", &["Deployment/d", "Service/s"])).await;
    h.store
        .fail_next(
            StoreOp::Create(Kind::Service),
            appsync_core::Error::invalid("admission webhook denied the request"),
        )
        .await;

    // WHEN: it is reconciled
    let result = unwrap_result(h.reconciler.reconcile(&app.key()).await, "pass");

    // THEN: the error is swallowed, state is FailedSynchronization and the hash advanced
    assert_eq!(result.state, Some(SyncState::FailedSynchronization));
    assert_eq!(result.requeue, Requeue::Never);
    let stored = h.application(&app.key()).await;
    assert_eq!(
        stored.status.synchronization_state,
        Some(SyncState::FailedSynchronization)
    );
    assert!(!stored.status.synchronization_hash.is_empty());

    // AND: the same spec is not attempted again
    let again = unwrap_result(h.reconciler.reconcile(&app.key()).await, "second pass");
    assert!(again.state.is_none());
}

#[tokio::test]
async fn cleanup_listing_failure_does_not_block_apply() {
    // GIVEN: listing Ingresses for garbage collection fails, and nothing conflicts
    let h = Harness::scripted(quiet_config());
    let app = h.create(scripted_app("a", &["Deployment/d", "Service/s"])).await;
    h.store
        .fail_next(
            StoreOp::List(Kind::Ingress),
            appsync_core::Error::internal("apiserver unavailable"),
        )
        .await;

    // WHEN: it is reconciled
    let result = unwrap_result(h.reconciler.reconcile(&app.key()).await, "pass");

    // THEN: the desired objects were written and the pass synchronized
    assert_eq!(result.state, Some(SyncState::Synchronized));
    assert_eq!(
        h.owned(&app.metadata.uid).await,
        identities(&["Deployment/d", "Service/s"])
    );
    let stored = h.application(&app.key()).await;
    assert_eq!(stored.status.synchronization_state, Some(SyncState::Synchronized));
    assert!(!stored.status.synchronization_hash.is_empty());

    // AND: the listing failure was reported once, as a warning
    let cleanup: Vec<_> = h
        .store
        .events()
        .await
        .into_iter()
        .filter(|e| e.message.contains("unable to clean up obsolete resources"))
        .collect();
    assert_eq!(cleanup.len(), 1);
    assert_eq!(cleanup[0].count, 1);
    assert_eq!(cleanup[0].reason, SyncState::FailedSynchronization.as_str());
    assert_eq!(cleanup[0].event_type, EventType::Warning);
    assert!(h
        .store
        .events()
        .await
        .iter()
        .all(|e| e.reason != SyncState::Retrying.as_str()));
}

/// Executor that never finishes a commit within any reasonable deadline.
struct StalledExecutor;

#[async_trait]
impl CommitExecutor for StalledExecutor {
    async fn execute(&self, _commit: &Commit) -> appsync_reconciler::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn slow_pass_times_out_without_status() {
    // GIVEN: commits that stall past the synchronization timeout
    let store = InMemoryObjectStore::new_arc();
    let dyn_store: Arc<dyn ObjectStore> = store.clone();
    let reconciler = unwrap_result(
        ReconcilerBuilder::new()
            .with_store(dyn_store)
            .with_generator(Arc::new(common::ScriptedGenerator))
            .with_executor(Arc::new(StalledExecutor))
            .with_config(quiet_config())
            .build(),
        "reconciler should build",
    );
    let app = unwrap_result(
        store
            .create_application(scripted_app("a", &["Deployment/d"]))
            .await,
        "create application",
    );

    // WHEN: it is reconciled
    let result = reconciler.reconcile(&app.key()).await;

    // THEN: the pass ends in a timeout and nothing is written back
    assert!(matches!(result, Err(Error::Timeout { .. })));
    assert!(result.as_ref().is_err_and(|e| !e.is_retryable()));
    let stored = unwrap_result(store.get_application(&app.key()).await, "application");
    assert!(stored.status.synchronization_state.is_none());
    assert!(stored.status.synchronization_hash.is_empty());
    assert!(store.objects_of(Kind::Deployment).await.is_empty());
    assert!(store.events().await.is_empty());
}

#[tokio::test]
async fn both_meshes_fail_prepare() {
    // GIVEN: both mesh features enabled and a namespace opting into both
    let mut config = quiet_config();
    config.features.istio = true;
    config.features.linkerd = true;
    let h = Harness::scripted(config);
    let mut ns = ObjectMeta::new("", "team");
    ns.labels = Labels::from([(ISTIO_REVISION_LABEL.to_string(), "stable".to_string())]);
    ns.annotations = Labels::from([(LINKERD_INJECT_ANNOTATION.to_string(), "enabled".to_string())]);
    unwrap_result(
        h.store.create(Object::new(Kind::Namespace, ns, json!({}))).await,
        "create namespace",
    );
    let app = h.create(scripted_app("a", &["Deployment/d"])).await;

    // WHEN: it is reconciled
    let result = unwrap_result(h.reconciler.reconcile(&app.key()).await, "pass");

    // THEN: FailedPrepare, delayed retry, no objects, hash untouched, warning event
    assert_eq!(result.state, Some(SyncState::FailedPrepare));
    assert_eq!(result.requeue, Requeue::After(Duration::from_secs(30 * 60)));
    assert!(h.owned(&app.metadata.uid).await.is_empty());

    let stored = h.application(&app.key()).await;
    assert_eq!(stored.status.synchronization_state, Some(SyncState::FailedPrepare));
    assert!(stored.status.synchronization_hash.is_empty());

    let events = h.store.events().await;
    assert!(events
        .iter()
        .any(|e| e.reason == SyncState::FailedPrepare.as_str() && e.event_type == EventType::Warning));
}

#[tokio::test]
async fn status_write_failure_is_reported() {
    // GIVEN: the status write will fail
    let h = Harness::scripted(quiet_config());
    let app = h.create(scripted_app("a", &["Deployment/d"])).await;
    h.store
        .fail_next(
            StoreOp::UpdateApplicationStatus,
            appsync_core::Error::internal("etcd timeout"),
        )
        .await;

    // WHEN: it is reconciled
    let result = unwrap_result(h.reconciler.reconcile(&app.key()).await, "pass");

    // THEN: the pass still succeeds and a FailedStatusUpdate event exists
    assert_eq!(result.state, Some(SyncState::Synchronized));
    assert!(h
        .store
        .events()
        .await
        .iter()
        .any(|e| e.reason == SyncState::FailedStatusUpdate.as_str()));
    assert!(h.application(&app.key()).await.status.synchronization_hash.is_empty());
}

// ==========================================================================
// PUBLISHING, ROLLOUT AND DELETION
// ==========================================================================

#[tokio::test]
async fn success_publishes_unless_opted_out() {
    // GIVEN: a reconciler with a channel publisher and two Applications, one opted out
    let store = InMemoryObjectStore::new_arc();
    let dyn_store: Arc<dyn ObjectStore> = store.clone();
    let (publisher, mut receiver) = ChannelPublisher::new(8);
    let reconciler = unwrap_result(
        ReconcilerBuilder::new()
            .with_store(dyn_store)
            .with_generator(Arc::new(common::ScriptedGenerator))
            .with_publisher(Arc::new(publisher))
            .with_config(quiet_config())
            .build(),
        "reconciler should build",
    );

    let loud = unwrap_result(
        store.create_application(scripted_app("loud", &["Deployment/loud"])).await,
        "create loud",
    );
    let mut quiet = scripted_app("quiet", &["Deployment/quiet"]);
    quiet.metadata.annotations.insert(
        appsync_core::application::SKIP_DEPLOYMENT_MESSAGE_ANNOTATION.to_string(),
        "true".to_string(),
    );
    let quiet = unwrap_result(store.create_application(quiet).await, "create quiet");

    // WHEN: both are reconciled
    unwrap_result(reconciler.reconcile(&loud.key()).await, "loud pass");
    unwrap_result(reconciler.reconcile(&quiet.key()).await, "quiet pass");

    // THEN: only the first produced a deployment event
    let event = unwrap_result(receiver.try_recv(), "one event expected");
    assert_eq!(event.application, "loud");
    assert_eq!(event.rollout_status, RolloutStatus::Initialized);
    assert!(receiver.try_recv().is_err());

    let stored = unwrap_result(store.get_application(&loud.key()).await, "loud");
    assert_eq!(stored.status.deployment_rollout_status.as_deref(), Some("initialized"));
    assert_eq!(event.correlation_id, stored.status.correlation_id);
}

#[tokio::test(start_paused = true)]
async fn monitor_reports_completion_exactly_once() {
    // GIVEN: a synchronized Application whose Deployment wants 3 replicas
    let mut config = quiet_config();
    config.synchronizer.rollout_check_interval = Duration::from_secs(1);
    config.synchronizer.rollout_timeout = Duration::from_secs(120);
    let h = Harness::scripted(config);
    let app = h.create(scripted_app("a", &["Deployment/a"])).await;
    let result = unwrap_result(h.reconciler.reconcile(&app.key()).await, "pass");
    let monitor = unwrap_option(result.monitor, "monitor should be spawned");

    let set_available = |available: i32| {
        let store = h.store.clone();
        async move {
            let mut deployment = unwrap_result(
                store.get(Kind::Deployment, &ObjectKey::new("team", "a")).await,
                "deployment",
            );
            deployment.status = json!({
                "observedGeneration": deployment.metadata.generation,
                "replicas": 3,
                "updatedReplicas": 3,
                "availableReplicas": available,
            });
            unwrap_result(store.update_status(deployment).await, "status write");
        }
    };

    // WHEN: only 2 replicas are available
    set_available(2).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    // THEN: the monitor has not reported completion
    assert!(!monitor.is_finished());
    assert_eq!(
        h.application(&app.key()).await.status.synchronization_state,
        Some(SyncState::Synchronized)
    );

    // WHEN: the third replica becomes available
    set_available(3).await;

    // THEN: RolloutComplete is reported once
    assert_eq!(monitor.await.ok(), Some(MonitorOutcome::Completed));
    let stored = h.application(&app.key()).await;
    assert_eq!(stored.status.synchronization_state, Some(SyncState::RolloutComplete));
    assert!(stored.status.rollout_complete_time.is_some());
    let complete: Vec<_> = h
        .store
        .events()
        .await
        .into_iter()
        .filter(|e| e.reason == SyncState::RolloutComplete.as_str())
        .collect();
    assert_eq!(complete.len(), 1);
    assert_eq!(complete[0].count, 1);
}

#[tokio::test]
async fn deleted_application_is_a_noop() {
    // GIVEN: no Application at the key
    let h = Harness::scripted(quiet_config());

    // WHEN: it is reconciled twice
    let first = h.reconciler.reconcile(&ObjectKey::new("team", "gone")).await;
    let second = h.reconciler.reconcile(&ObjectKey::new("team", "gone")).await;

    // THEN: both passes succeed without writes
    assert!(first.is_ok_and(|r| r.state.is_none()));
    assert!(second.is_ok_and(|r| r.state.is_none()));
    assert_eq!(h.store.mutation_count(), 0);
}

#[tokio::test]
async fn deletion_updates_shared_routing() {
    // GIVEN: two Applications sharing an ingress host, with the routing registry on
    let mut config = quiet_config();
    config.registry.enabled = true;
    let store = InMemoryObjectStore::new_arc();
    let dyn_store: Arc<dyn ObjectStore> = store.clone();
    let reconciler = unwrap_result(
        ReconcilerBuilder::new()
            .with_store(dyn_store)
            .with_config(config)
            .build(),
        "reconciler should build",
    );

    let mut web = scripted_app("web", &[]);
    web.spec.ingresses = vec!["https://www.example.com/".to_string()];
    let mut api = scripted_app("api", &[]);
    api.spec.ingresses = vec!["https://www.example.com/api".to_string()];
    let web = unwrap_result(store.create_application(web).await, "create web");
    let api = unwrap_result(store.create_application(api).await, "create api");
    unwrap_result(reconciler.reconcile(&web.key()).await, "web pass");
    unwrap_result(reconciler.reconcile(&api.key()).await, "api pass");

    let routes = |object: &Object| -> usize {
        object.spec["http"].as_array().map_or(0, Vec::len)
    };
    let host_key = ObjectKey::new("istio-system", "www-example-com");
    let before = unwrap_result(
        store.get(Kind::VirtualService, &host_key).await,
        "virtual service",
    );
    assert_eq!(routes(&before), 2);

    // WHEN: api is deleted and its key reconciled
    unwrap_result(store.delete_application(&api.key()).await, "delete api");
    let result = unwrap_result(reconciler.reconcile(&api.key()).await, "deletion pass");

    // THEN: the shared routing object only routes to web
    assert!(result.state.is_none());
    let after = unwrap_result(
        store.get(Kind::VirtualService, &host_key).await,
        "virtual service",
    );
    assert_eq!(routes(&after), 1);
    assert!(after.spec.to_string().contains("web.team.svc.cluster.local"));
}
