//! Shared fixtures for reconciliation integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use appsync_core::{Application, ApplicationSpec, Kind, Object, ObjectKey};
use appsync_reconciler::generator::dependent_meta;
use appsync_reconciler::{
    Config, DesiredStateGenerator, Error, Reconciler, ReconcilerBuilder, ResourceOperation,
    ResourceOptions, Result,
};
use appsync_store::{InMemoryObjectStore, ObjectStore};
use serde_json::{Value, json};

/// Test helper: Unwrap a Result or panic with context
pub fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

/// Test helper: Unwrap an Option or panic with context
pub fn unwrap_option<T>(option: Option<T>, context: &str) -> T {
    match option {
        Some(value) => value,
        None => panic!("{}", context),
    }
}

/// Generator driven by the Application spec itself.
///
/// `spec.objects` lists `"Kind/name"` entries; each becomes a
/// `CreateOrUpdate` of an owned object. Deployments ask for three replicas.
pub struct ScriptedGenerator;

impl DesiredStateGenerator for ScriptedGenerator {
    fn generate(
        &self,
        app: &Application,
        _options: &ResourceOptions,
    ) -> Result<Vec<ResourceOperation>> {
        let entries = app
            .spec
            .extra
            .get("objects")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        entries
            .iter()
            .map(|entry| {
                let raw = entry
                    .as_str()
                    .ok_or_else(|| Error::generate("object entries must be strings"))?;
                let (kind, name) = raw
                    .split_once('/')
                    .ok_or_else(|| Error::generate(format!("malformed entry {raw}")))?;
                let kind: Kind = serde_json::from_value(json!(kind))
                    .map_err(|e| Error::generate(format!("unknown kind {kind}: {e}")))?;

                let spec = match kind {
                    Kind::Deployment => json!({ "image": app.spec.image, "replicas": 3 }),
                    _ => json!({ "image": app.spec.image }),
                };
                Ok(ResourceOperation::create_or_update(Object::new(
                    kind,
                    dependent_meta(app, name),
                    spec,
                )))
            })
            .collect()
    }
}

/// Config with a monitor that stays out of the way of short tests.
pub fn quiet_config() -> Config {
    let mut config = Config::default();
    config.synchronizer.rollout_check_interval = Duration::from_secs(600);
    config.synchronizer.rollout_timeout = Duration::from_secs(1200);
    config
}

pub fn scripted_app(name: &str, objects: &[&str]) -> Application {
    let mut spec = ApplicationSpec {
        image: "registry/app:1".to_string(),
        ..ApplicationSpec::default()
    };
    spec.extra.insert("objects".to_string(), json!(objects));
    Application::new("team", name, spec)
}

pub struct Harness {
    pub store: Arc<InMemoryObjectStore>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn scripted(config: Config) -> Self {
        let store = InMemoryObjectStore::new_arc();
        let dyn_store: Arc<dyn ObjectStore> = store.clone();
        let reconciler = unwrap_result(
            ReconcilerBuilder::new()
                .with_store(dyn_store)
                .with_generator(Arc::new(ScriptedGenerator))
                .with_config(config)
                .build(),
            "reconciler should build",
        );
        Self { store, reconciler }
    }

    pub async fn create(&self, app: Application) -> Application {
        unwrap_result(
            self.store.create_application(app).await,
            "create application should succeed",
        )
    }

    pub async fn application(&self, key: &ObjectKey) -> Application {
        unwrap_result(
            self.store.get_application(key).await,
            "application should exist",
        )
    }

    /// Replace the scripted object list of an existing Application.
    pub async fn edit_objects(&self, key: &ObjectKey, objects: &[&str]) {
        let mut app = self.application(key).await;
        app.spec.extra.insert("objects".to_string(), json!(objects));
        unwrap_result(
            self.store.update_application(app).await,
            "update application should succeed",
        );
    }

    /// `(kind, name)` of every object in the namespace owned by `uid`.
    pub async fn owned(&self, uid: &str) -> BTreeSet<(Kind, String)> {
        let mut owned = BTreeSet::new();
        for kind in Kind::generic() {
            for object in self.store.objects_of(*kind).await {
                if object.metadata.is_owned_by(uid) {
                    owned.insert((object.kind, object.metadata.name.clone()));
                }
            }
        }
        owned
    }
}

pub fn identities(objects: &[&str]) -> BTreeSet<(Kind, String)> {
    objects
        .iter()
        .filter_map(|raw| raw.split_once('/'))
        .filter_map(|(kind, name)| {
            serde_json::from_value::<Kind>(json!(kind))
                .ok()
                .map(|k| (k, name.to_string()))
        })
        .collect()
}
