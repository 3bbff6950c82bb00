//! Dependent cluster objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kind::Kind;
use crate::meta::{ObjectKey, ObjectMeta};

/// A dependent object stored in the cluster.
///
/// The spec and status bodies are opaque JSON; the engine only reads the
/// few fields it needs through typed views such as [`DeploymentStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub kind: Kind,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: Value,
}

impl Object {
    /// Create an object with an empty status.
    #[must_use]
    pub const fn new(kind: Kind, metadata: ObjectMeta, spec: Value) -> Self {
        Self {
            kind,
            metadata,
            spec,
            status: Value::Null,
        }
    }

    /// The object's key.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Logical identity used when matching desired against existing objects.
    ///
    /// Only kind and name are compared; externally fetched objects do not
    /// reliably carry anything richer.
    #[must_use]
    pub fn identity(&self) -> (Kind, &str) {
        (self.kind, self.metadata.name.as_str())
    }

    /// Human readable `Kind namespace/name`.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}", self.kind, self.key())
    }

    /// Carry immutable spec fields over from the live object.
    ///
    /// Fields missing from the live object are left untouched.
    pub fn copy_immutable(&mut self, live: &Self) {
        for field in self.kind.immutable_spec_fields() {
            let Some(value) = live.spec.get(*field) else {
                continue;
            };
            if let Value::Object(spec) = &mut self.spec {
                spec.insert((*field).to_string(), value.clone());
            }
        }
    }

    /// Replica count requested by a Deployment's spec.
    #[must_use]
    pub fn desired_replicas(&self) -> Option<i32> {
        self.spec
            .get("replicas")
            .and_then(Value::as_i64)
            .and_then(|n| i32::try_from(n).ok())
    }

    /// Typed view of a Deployment's status.
    ///
    /// A missing or malformed status reads as all-zero.
    #[must_use]
    pub fn deployment_status(&self) -> DeploymentStatus {
        serde_json::from_value(self.status.clone()).unwrap_or_default()
    }
}

/// Observed state of a Deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentStatus {
    pub observed_generation: i64,
    pub replicas: i32,
    pub updated_replicas: i32,
    pub available_replicas: i32,
}

impl DeploymentStatus {
    /// Whether a rollout towards `desired` replicas of `generation` is done.
    ///
    /// All desired replicas must be updated and available, no surplus pods
    /// may remain, and the controller must have observed the latest spec.
    #[must_use]
    pub const fn is_complete(&self, desired: i32, generation: i64) -> bool {
        self.updated_replicas == desired
            && self.replicas == desired
            && self.available_replicas == desired
            && self.observed_generation >= generation
    }
}
