//! The Application resource: the user's declared desired state.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::meta::{Labels, ObjectKey, ObjectMeta, OwnerReference};
use crate::result::Result;

/// API version of the Application kind.
pub const API_VERSION: &str = "appsync.io/v1alpha1";
/// Kind name of the Application resource.
pub const KIND: &str = "Application";

/// Annotation carrying the deployment correlation ID.
pub const CORRELATION_ID_ANNOTATION: &str = "appsync.io/deployment-correlation-id";
/// Annotation opting an Application out of deployment notifications.
pub const SKIP_DEPLOYMENT_MESSAGE_ANNOTATION: &str = "appsync.io/skip-deployment-message";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MIN_REPLICAS: i32 = 2;
const DEFAULT_MAX_REPLICAS: i32 = 4;

/// Outcome of the most recent reconciliation pass, as recorded in status.
///
/// The string forms double as event reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    Synchronized,
    RolloutComplete,
    FailedPrepare,
    FailedSynchronization,
    FailedStatusUpdate,
    Retrying,
}

impl SyncState {
    /// Reason string used for events and status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synchronized => "Synchronized",
            Self::RolloutComplete => "RolloutComplete",
            Self::FailedPrepare => "FailedPrepare",
            Self::FailedSynchronization => "FailedSynchronization",
            Self::FailedStatusUpdate => "FailedStatusUpdate",
            Self::Retrying => "Retrying",
        }
    }

    /// Whether the state records a failure.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        !matches!(self, Self::Synchronized | Self::RolloutComplete)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replica bounds for the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replicas {
    pub min: i32,
    pub max: i32,
}

/// Workload update strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Strategy {
    #[default]
    RollingUpdate,
    Recreate,
}

/// Cloud resources requested by the Application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudResources {
    #[serde(default)]
    pub buckets: Vec<String>,
    #[serde(default)]
    pub sql_instances: Vec<String>,
}

impl CloudResources {
    /// Whether anything is requested at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.buckets.is_empty() && self.sql_instances.is_empty()
    }
}

/// Desired state declared by the user.
///
/// Fields the engine does not interpret are kept in `extra` so they still
/// take part in change detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<Replicas>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub ingresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudResources>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Status block written back by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub synchronization_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization_state: Option<SyncState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_complete_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_rollout_status: Option<String>,
}

/// The Application custom resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ApplicationSpec,
    #[serde(default)]
    pub status: ApplicationStatus,
}

#[derive(Serialize)]
struct HashInput<'a> {
    spec: &'a ApplicationSpec,
    labels: &'a Labels,
}

impl Application {
    /// Create an Application with the given spec.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ApplicationSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: ApplicationStatus::default(),
        }
    }

    /// The Application's key.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Name of the Application.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Namespace of the Application.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Fill in defaults for unset spec fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::Invalid` when the effective spec is contradictory.
    pub fn apply_defaults(&mut self) -> Result<()> {
        let spec = &mut self.spec;
        spec.port.get_or_insert(DEFAULT_PORT);
        spec.strategy.get_or_insert_with(Strategy::default);
        let replicas = *spec.replicas.get_or_insert(Replicas {
            min: DEFAULT_MIN_REPLICAS,
            max: DEFAULT_MAX_REPLICAS,
        });

        if replicas.min < 0 || replicas.max < replicas.min {
            return Err(Error::invalid(format!(
                "replicas: max ({}) must be at least min ({}) and min non-negative",
                replicas.max, replicas.min
            )));
        }
        if spec.image.is_empty() {
            return Err(Error::invalid("spec.image must be set"));
        }
        Ok(())
    }

    /// Hash of the effective spec and labels, hex encoded.
    ///
    /// Call after [`Application::apply_defaults`] so that equivalent
    /// specs hash identically.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the spec cannot be encoded.
    pub fn hash(&self) -> Result<String> {
        let input = HashInput {
            spec: &self.spec,
            labels: &self.metadata.labels,
        };
        let bytes = serde_json::to_vec(&input)?;
        let digest = Sha256::digest(&bytes);
        Ok(digest.iter().map(|b| format!("{b:02x}")).join(""))
    }

    /// Make sure the Application carries a correlation ID annotation.
    pub fn ensure_correlation_id(&mut self) {
        let annotations = &mut self.metadata.annotations;
        if annotations
            .get(CORRELATION_ID_ANNOTATION)
            .is_none_or(String::is_empty)
        {
            annotations.insert(
                CORRELATION_ID_ANNOTATION.to_string(),
                uuid::Uuid::new_v4().to_string(),
            );
        }
    }

    /// The correlation ID annotation, empty when unset.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        self.metadata
            .annotations
            .get(CORRELATION_ID_ANNOTATION)
            .map_or("", String::as_str)
    }

    /// Whether the Application opted out of deployment notifications.
    #[must_use]
    pub fn skip_deployment_message(&self) -> bool {
        self.metadata
            .annotations
            .get(SKIP_DEPLOYMENT_MESSAGE_ANNOTATION)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Owner reference that dependent objects carry.
    #[must_use]
    pub fn owner_reference(&self) -> OwnerReference {
        self.metadata.owner_reference(KIND, API_VERSION)
    }
}
