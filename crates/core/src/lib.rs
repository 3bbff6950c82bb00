//! Cluster object model for the appsync reconciliation engine.
//!
//! This crate holds the types every other crate speaks:
//!
//! - **Application**: the declared desired state, its defaults, hash and status
//! - **Object**: a dependent cluster object of a closed set of [`Kind`]s
//! - **ClusterEvent**: a coalescable outcome notification
//! - **Error**: store error kinds the engine branches on (not found,
//!   already exists, optimistic concurrency conflict)

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod application;
pub mod error;
pub mod event;
pub mod kind;
pub mod meta;
pub mod object;
pub mod result;

// Re-export main types
pub use application::{
    Application, ApplicationSpec, ApplicationStatus, CloudResources, Replicas, Strategy,
    SyncState,
};
pub use error::Error;
pub use event::{ClusterEvent, EventType};
pub use kind::Kind;
pub use meta::{LabelSelector, Labels, ObjectKey, ObjectMeta, ObjectReference, OwnerReference};
pub use object::{DeploymentStatus, Object};
pub use result::{Result, ResultExt, StoreResultExt};
