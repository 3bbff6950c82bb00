#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # appsync
//!
//! Application synchronizer. Watches Application resources and drives the
//! cluster toward the objects each one declares.
//!
//! This library re-exports the workspace crates and holds the pieces the
//! `appsync` binary is assembled from.

// Re-export all crates
pub use appsync_core;
pub use appsync_reconciler;
pub use appsync_store;

pub mod cli;
pub mod seed;
pub mod telemetry;
