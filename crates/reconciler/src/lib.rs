//! K8s-style reconciliation engine for Application resources.
//!
//! This crate drives a cluster toward the state an Application declares:
//!
//! - **Change detection**: a hash of the effective spec gates all work
//! - **Desired state**: a generator maps the Application to dependent objects
//! - **Apply**: ordered, idempotent commits against the object store
//! - **Garbage collection**: owned objects no longer desired are deleted
//! - **Reporting**: coalesced events and serialized status writes
//! - **Rollout monitoring**: a detached task reports when the workload converges
//!
//! # Key Concepts
//!
//! ## Reconciliation pass
//!
//! One [`Reconciler::reconcile`] call handles one Application:
//! 1. Fetch it (missing means deleted)
//! 2. Prepare a rollout, or skip when the hash is unchanged
//! 3. Delete unreferenced objects, then apply generated operations
//! 4. Write status and spawn a [`RolloutMonitor`]
//!
//! ## Outcomes
//!
//! - `Synchronized` - everything applied
//! - `RolloutComplete` - the workload converged afterwards
//! - `FailedPrepare` - retried after a fixed delay
//! - `Retrying` - a write conflicted; retried right away
//! - `FailedSynchronization` - permanent failure; not retried until the spec changes
//! - `FailedStatusUpdate` - status could not be written
//!
//! # Example
//!
//! ```ignore
//! use appsync_reconciler::{Config, Controller, ControllerConfig, ReconcilerBuilder};
//! use appsync_store::InMemoryObjectStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let reconciler = Arc::new(
//!         ReconcilerBuilder::new()
//!             .with_store(InMemoryObjectStore::new_arc())
//!             .with_config(config.clone())
//!             .build()?,
//!     );
//!
//!     let mut controller = Controller::new(reconciler, ControllerConfig::from(&config));
//!
//!     // Run until stopped
//!     // controller.run().await;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod applier;
pub mod config;
pub mod controller;
pub mod error;
pub mod gc;
pub mod generator;
pub mod metrics;
pub mod monitor;
pub mod publisher;
pub mod reconciler;
pub mod registry;
pub mod reporter;
pub mod status;
pub mod types;

// Re-export main types
pub use applier::{Applier, Commit, CommitExecutor, StoreCommitExecutor};
pub use config::Config;
pub use controller::{Controller, ControllerConfig, ControllerStopper};
pub use error::{Error, Result};
pub use gc::GarbageCollector;
pub use generator::{DesiredStateGenerator, StandardGenerator};
pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use monitor::{MonitorConfig, MonitorOutcome, RolloutMonitor};
pub use publisher::{ChannelPublisher, DeploymentEvent, Publisher, RolloutStatus};
pub use reconciler::{Reconciler, ReconcilerBuilder};
pub use registry::RoutingRegistry;
pub use reporter::EventReporter;
pub use status::StatusUpdater;
pub use types::{Operation, Reconciled, Requeue, ResourceOperation, ResourceOptions, Rollout};
