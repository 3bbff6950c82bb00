//! Object store interface for the appsync reconciliation engine.
//!
//! The engine never talks to a cluster directly; everything goes through
//! [`ObjectStore`]:
//!
//! - **Get/List**: by key, or by kind, namespace and label selector
//! - **Create/Update/Delete**: with distinguishable not-found,
//!   already-exists and conflict errors
//! - **Watch**: a broadcast stream of change notifications
//!
//! [`InMemoryObjectStore`] implements the same semantics in process and is
//! what tests and local runs use.
//!
//! # Example
//!
//! ```ignore
//! use appsync_store::{InMemoryObjectStore, ObjectStore, TracingObjectStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = TracingObjectStore::new(InMemoryObjectStore::new());
//!     let mut changes = store.watch();
//!     // store.create_application(app).await?;
//!     // let change = changes.recv().await?;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod memory;
pub mod store;
pub mod watch;

// Re-export main types
pub use memory::{InMemoryObjectStore, StoreOp};
pub use store::{ObjectStore, TracingObjectStore};
pub use watch::{WatchAction, WatchError, WatchEvent, WatchSubscription, WatchTarget};
