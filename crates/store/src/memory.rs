//! In-memory object store.
//!
//! Mirrors the API server semantics the engine depends on: store-assigned
//! uids, a monotonically increasing resource version, generation bumps on
//! spec change, optimistic concurrency on update, and a watch channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use appsync_core::{
    Application, ClusterEvent, Error, Kind, LabelSelector, Object, ObjectKey, ObjectMeta, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use ulid::Ulid;

use crate::store::ObjectStore;
use crate::watch::{WatchAction, WatchEvent, WatchSubscription, WatchTarget};

const WATCH_CAPACITY: usize = 1024;

/// Store operation a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    GetApplication,
    UpdateApplicationStatus,
    Get(Kind),
    List(Kind),
    Create(Kind),
    Update(Kind),
    Delete(Kind),
    ListEvents,
    CreateEvent,
}

#[derive(Default)]
struct State {
    applications: BTreeMap<ObjectKey, Application>,
    objects: BTreeMap<(Kind, ObjectKey), Object>,
    events: BTreeMap<ObjectKey, ClusterEvent>,
    faults: Vec<(StoreOp, Error)>,
    revision: u64,
}

impl State {
    fn next_revision(&mut self) -> u64 {
        self.revision = self.revision.saturating_add(1);
        self.revision
    }

    /// Pop the first fault registered for `op`, if any.
    fn take_fault(&mut self, op: StoreOp) -> Result<()> {
        match self.faults.iter().position(|(o, _)| *o == op) {
            Some(pos) => Err(self.faults.remove(pos).1),
            None => Ok(()),
        }
    }
}

/// In-memory cluster state for tests and local runs.
pub struct InMemoryObjectStore {
    state: RwLock<State>,
    watch: broadcast::Sender<WatchEvent>,
    mutations: AtomicU64,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        let (watch, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            state: RwLock::new(State::default()),
            watch,
            mutations: AtomicU64::new(0),
        }
    }

    /// Create a new empty store wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make the next call of `op` fail with `error`.
    ///
    /// Faults queue up; each one is consumed by a single matching call.
    pub async fn fail_next(&self, op: StoreOp, error: Error) {
        self.state.write().await.faults.push((op, error));
    }

    /// Number of successful writes of any record type since creation.
    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    /// Every object of a kind, regardless of namespace or labels.
    pub async fn objects_of(&self, kind: Kind) -> Vec<Object> {
        self.state
            .read()
            .await
            .objects
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, object)| object.clone())
            .collect()
    }

    /// Every stored event.
    pub async fn events(&self) -> Vec<ClusterEvent> {
        self.state.read().await.events.values().cloned().collect()
    }

    fn notify(&self, target: WatchTarget, action: WatchAction, key: ObjectKey) {
        self.mutations.fetch_add(1, Ordering::Relaxed);
        // No receivers is not an error
        let _ = self.watch.send(WatchEvent {
            target,
            action,
            key,
        });
    }
}

/// Assign the server-managed metadata of a freshly created record.
fn admit(meta: &mut ObjectMeta, revision: u64) {
    if meta.uid.is_empty() {
        meta.uid = Ulid::new().to_string().to_lowercase();
    }
    meta.resource_version = Some(revision);
    meta.generation = 1;
    meta.creation_timestamp = Some(Utc::now());
}

/// Check the optimistic concurrency token of an update.
fn check_version(kind: &str, incoming: &ObjectMeta, stored: &ObjectMeta) -> Result<()> {
    match incoming.resource_version {
        Some(version) if Some(version) != stored.resource_version => Err(Error::conflict(
            kind,
            stored.key(),
            format!(
                "the object has been modified; resource version {version} is stale (current {:?})",
                stored.resource_version
            ),
        )),
        _ => Ok(()),
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_application(&self, key: &ObjectKey) -> Result<Application> {
        let mut state = self.state.write().await;
        state.take_fault(StoreOp::GetApplication)?;
        state
            .applications
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(appsync_core::application::KIND, key))
    }

    async fn list_applications(&self) -> Result<Vec<Application>> {
        Ok(self.state.read().await.applications.values().cloned().collect())
    }

    async fn create_application(&self, mut app: Application) -> Result<Application> {
        let key = app.key();
        {
            let mut state = self.state.write().await;
            if state.applications.contains_key(&key) {
                return Err(Error::already_exists(appsync_core::application::KIND, &key));
            }
            let revision = state.next_revision();
            admit(&mut app.metadata, revision);
            state.applications.insert(key.clone(), app.clone());
        }
        self.notify(WatchTarget::Application, WatchAction::Added, key);
        Ok(app)
    }

    async fn update_application(&self, app: Application) -> Result<Application> {
        let key = app.key();
        let updated = {
            let mut state = self.state.write().await;
            let stored = state
                .applications
                .get(&key)
                .cloned()
                .ok_or_else(|| Error::not_found(appsync_core::application::KIND, &key))?;
            check_version(appsync_core::application::KIND, &app.metadata, &stored.metadata)?;

            let spec_changed = stored.spec != app.spec;
            let mut updated = Application {
                status: stored.status.clone(),
                ..app
            };
            updated.metadata.copy_server_managed(&stored.metadata);
            if spec_changed {
                updated.metadata.generation = stored.metadata.generation.saturating_add(1);
            }
            updated.metadata.resource_version = Some(state.next_revision());
            state.applications.insert(key.clone(), updated.clone());
            updated
        };
        self.notify(WatchTarget::Application, WatchAction::Modified, key);
        Ok(updated)
    }

    async fn update_application_status(&self, app: Application) -> Result<Application> {
        let key = app.key();
        let updated = {
            let mut state = self.state.write().await;
            state.take_fault(StoreOp::UpdateApplicationStatus)?;
            let stored = state
                .applications
                .get(&key)
                .cloned()
                .ok_or_else(|| Error::not_found(appsync_core::application::KIND, &key))?;
            check_version(appsync_core::application::KIND, &app.metadata, &stored.metadata)?;

            let mut updated = Application {
                status: app.status,
                ..stored
            };
            updated.metadata.resource_version = Some(state.next_revision());
            state.applications.insert(key.clone(), updated.clone());
            updated
        };
        self.notify(WatchTarget::Application, WatchAction::StatusModified, key);
        Ok(updated)
    }

    async fn delete_application(&self, key: &ObjectKey) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.applications.remove(key).is_none() {
                return Err(Error::not_found(appsync_core::application::KIND, key));
            }
        }
        self.notify(WatchTarget::Application, WatchAction::Deleted, key.clone());
        Ok(())
    }

    async fn get(&self, kind: Kind, key: &ObjectKey) -> Result<Object> {
        let mut state = self.state.write().await;
        state.take_fault(StoreOp::Get(kind))?;
        state
            .objects
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| Error::object_not_found(kind, key))
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Object>> {
        let mut state = self.state.write().await;
        state.take_fault(StoreOp::List(kind))?;
        Ok(state
            .objects
            .iter()
            .filter(|((k, key), _)| *k == kind && key.namespace == namespace)
            .filter(|(_, object)| selector.matches(&object.metadata.labels))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, mut object: Object) -> Result<Object> {
        let kind = object.kind;
        let key = object.key();
        {
            let mut state = self.state.write().await;
            state.take_fault(StoreOp::Create(kind))?;
            if state.objects.contains_key(&(kind, key.clone())) {
                return Err(Error::already_exists(kind, &key));
            }
            let revision = state.next_revision();
            admit(&mut object.metadata, revision);
            state.objects.insert((kind, key.clone()), object.clone());
        }
        self.notify(WatchTarget::Object(kind), WatchAction::Added, key);
        Ok(object)
    }

    async fn update(&self, object: Object) -> Result<Object> {
        let kind = object.kind;
        let key = object.key();
        let updated = {
            let mut state = self.state.write().await;
            state.take_fault(StoreOp::Update(kind))?;
            let stored = state
                .objects
                .get(&(kind, key.clone()))
                .cloned()
                .ok_or_else(|| Error::object_not_found(kind, &key))?;
            check_version(&kind.to_string(), &object.metadata, &stored.metadata)?;

            let spec_changed = stored.spec != object.spec;
            let mut updated = Object {
                status: stored.status.clone(),
                ..object
            };
            updated.metadata.copy_server_managed(&stored.metadata);
            if spec_changed {
                updated.metadata.generation = stored.metadata.generation.saturating_add(1);
            }
            updated.metadata.resource_version = Some(state.next_revision());
            state.objects.insert((kind, key.clone()), updated.clone());
            updated
        };
        self.notify(WatchTarget::Object(kind), WatchAction::Modified, key);
        Ok(updated)
    }

    async fn update_status(&self, object: Object) -> Result<Object> {
        let kind = object.kind;
        let key = object.key();
        let updated = {
            let mut state = self.state.write().await;
            let stored = state
                .objects
                .get(&(kind, key.clone()))
                .cloned()
                .ok_or_else(|| Error::object_not_found(kind, &key))?;
            check_version(&kind.to_string(), &object.metadata, &stored.metadata)?;

            let mut updated = Object {
                status: object.status,
                ..stored
            };
            updated.metadata.resource_version = Some(state.next_revision());
            state.objects.insert((kind, key.clone()), updated.clone());
            updated
        };
        self.notify(WatchTarget::Object(kind), WatchAction::StatusModified, key);
        Ok(updated)
    }

    async fn delete(&self, kind: Kind, key: &ObjectKey) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.take_fault(StoreOp::Delete(kind))?;
            if state.objects.remove(&(kind, key.clone())).is_none() {
                return Err(Error::object_not_found(kind, key));
            }
        }
        self.notify(WatchTarget::Object(kind), WatchAction::Deleted, key.clone());
        Ok(())
    }

    async fn list_events(
        &self,
        namespace: &str,
        involved_name: &str,
        involved_uid: &str,
    ) -> Result<Vec<ClusterEvent>> {
        let mut state = self.state.write().await;
        state.take_fault(StoreOp::ListEvents)?;
        Ok(state
            .events
            .values()
            .filter(|e| e.metadata.namespace == namespace)
            .filter(|e| {
                e.involved_object.name == involved_name && e.involved_object.uid == involved_uid
            })
            .cloned()
            .collect())
    }

    async fn create_event(&self, mut event: ClusterEvent) -> Result<ClusterEvent> {
        let key = event.metadata.key();
        {
            let mut state = self.state.write().await;
            state.take_fault(StoreOp::CreateEvent)?;
            if state.events.contains_key(&key) {
                return Err(Error::already_exists("Event", &key));
            }
            let revision = state.next_revision();
            admit(&mut event.metadata, revision);
            state.events.insert(key.clone(), event.clone());
        }
        self.notify(WatchTarget::Event, WatchAction::Added, key);
        Ok(event)
    }

    async fn update_event(&self, mut event: ClusterEvent) -> Result<ClusterEvent> {
        let key = event.metadata.key();
        {
            let mut state = self.state.write().await;
            let stored = state
                .events
                .get(&key)
                .ok_or_else(|| Error::not_found("Event", &key))?;
            check_version("Event", &event.metadata, &stored.metadata)?;
            let stored_meta = stored.metadata.clone();
            event.metadata.copy_server_managed(&stored_meta);
            event.metadata.resource_version = Some(state.next_revision());
            state.events.insert(key.clone(), event.clone());
        }
        self.notify(WatchTarget::Event, WatchAction::Modified, key);
        Ok(event)
    }

    fn watch(&self) -> WatchSubscription {
        WatchSubscription::new(self.watch.subscribe())
    }
}
