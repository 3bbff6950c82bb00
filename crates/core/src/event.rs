//! Cluster-visible events attached to Applications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::application::{self, Application, CORRELATION_ID_ANNOTATION};
use crate::meta::{ObjectMeta, ObjectReference};

/// Severity of a cluster event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

/// A human readable outcome notification recorded against an object.
///
/// Events with the same involved object and message are coalesced by
/// bumping `count` and `last_timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEvent {
    pub metadata: ObjectMeta,
    pub involved_object: ObjectReference,
    pub reason: String,
    pub message: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub count: u32,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
}

impl ClusterEvent {
    /// Build a fresh event about an Application.
    ///
    /// The event name is unique; the correlation ID is copied into the
    /// event's annotations so deployment tooling can follow a rollout.
    #[must_use]
    pub fn for_application(
        app: &Application,
        reason: impl Into<String>,
        message: impl Into<String>,
        event_type: EventType,
    ) -> Self {
        let now = Utc::now();
        let name = format!("{}.{}", app.name(), Ulid::new().to_string().to_lowercase());
        let mut metadata = ObjectMeta::new(app.namespace(), name);
        let correlation_id = app.correlation_id();
        if !correlation_id.is_empty() {
            metadata.annotations.insert(
                CORRELATION_ID_ANNOTATION.to_string(),
                correlation_id.to_string(),
            );
        }

        Self {
            metadata,
            involved_object: ObjectReference {
                kind: application::KIND.to_string(),
                namespace: app.namespace().to_string(),
                name: app.name().to_string(),
                uid: app.metadata.uid.clone(),
            },
            reason: reason.into(),
            message: message.into(),
            event_type,
            count: 1,
            first_timestamp: now,
            last_timestamp: now,
            source: "appsync".to_string(),
        }
    }
}
