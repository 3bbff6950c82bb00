//! Ordered, idempotent application of commits to the object store.

use std::sync::Arc;
use std::time::Instant;

use appsync_core::{Object, StoreResultExt};
use appsync_store::ObjectStore;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics::SyncMetrics;
use crate::types::{Operation, ResourceOperation};

/// A deferred write against the object store.
#[derive(Debug, Clone)]
pub enum Commit {
    /// Create, or update in place carrying server-managed fields forward.
    CreateOrUpdate(Object),
    /// Delete if present, then create.
    CreateOrRecreate(Object),
    /// Create; an existing object is fine.
    CreateIfNotExists(Object),
    /// Delete; a missing object is fine.
    DeleteIfExists(Object),
}

impl Commit {
    /// Wrap a generated operation.
    #[must_use]
    pub fn from_operation(op: ResourceOperation) -> Self {
        match op.operation {
            Operation::CreateOrUpdate => Self::CreateOrUpdate(op.object),
            Operation::CreateOrRecreate => Self::CreateOrRecreate(op.object),
            Operation::CreateIfNotExists => Self::CreateIfNotExists(op.object),
        }
    }

    /// Short description for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::CreateOrUpdate(o) => format!("CreateOrUpdate {}", o.describe()),
            Self::CreateOrRecreate(o) => format!("CreateOrRecreate {}", o.describe()),
            Self::CreateIfNotExists(o) => format!("CreateIfNotExists {}", o.describe()),
            Self::DeleteIfExists(o) => format!("DeleteIfExists {}", o.describe()),
        }
    }
}

/// Executes a single commit.
#[async_trait]
pub trait CommitExecutor: Send + Sync {
    /// Execute one commit.
    async fn execute(&self, commit: &Commit) -> Result<()>;
}

/// Executes commits against an [`ObjectStore`].
pub struct StoreCommitExecutor {
    store: Arc<dyn ObjectStore>,
}

impl StoreCommitExecutor {
    /// Create a new executor.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn create_or_update(&self, desired: &Object) -> Result<()> {
        let key = desired.key();
        let live = self
            .store
            .get(desired.kind, &key)
            .await
            .found()
            .map_err(|e| Error::commit(format!("get {}", desired.describe()), e))?;

        match live {
            None => {
                self.store
                    .create(desired.clone())
                    .await
                    .map_err(|e| Error::commit(format!("create {}", desired.describe()), e))?;
            }
            Some(live) => {
                let mut updated = desired.clone();
                updated.metadata.copy_server_managed(&live.metadata);
                updated.copy_immutable(&live);
                self.store
                    .update(updated)
                    .await
                    .map_err(|e| Error::commit(format!("update {}", desired.describe()), e))?;
            }
        }
        Ok(())
    }

    async fn create_or_recreate(&self, desired: &Object) -> Result<()> {
        self.store
            .delete(desired.kind, &desired.key())
            .await
            .ignore_not_found()
            .map_err(|e| Error::commit(format!("delete {}", desired.describe()), e))?;
        self.store
            .create(desired.clone())
            .await
            .map_err(|e| Error::commit(format!("create {}", desired.describe()), e))?;
        Ok(())
    }

    async fn create_if_not_exists(&self, desired: &Object) -> Result<()> {
        self.store
            .create(desired.clone())
            .await
            .ignore_already_exists()
            .map_err(|e| Error::commit(format!("create {}", desired.describe()), e))
    }

    async fn delete_if_exists(&self, object: &Object) -> Result<()> {
        self.store
            .delete(object.kind, &object.key())
            .await
            .ignore_not_found()
            .map_err(|e| Error::commit(format!("delete {}", object.describe()), e))
    }
}

#[async_trait]
impl CommitExecutor for StoreCommitExecutor {
    async fn execute(&self, commit: &Commit) -> Result<()> {
        match commit {
            Commit::CreateOrUpdate(o) => self.create_or_update(o).await,
            Commit::CreateOrRecreate(o) => self.create_or_recreate(o).await,
            Commit::CreateIfNotExists(o) => self.create_if_not_exists(o).await,
            Commit::DeleteIfExists(o) => self.delete_if_exists(o).await,
        }
    }
}

/// Order a pass's commits: deletions first, then the generated operations.
#[must_use]
pub fn plan(operations: &[ResourceOperation], unreferenced: Vec<Object>) -> Vec<Commit> {
    unreferenced
        .into_iter()
        .map(Commit::DeleteIfExists)
        .chain(operations.iter().cloned().map(Commit::from_operation))
        .collect()
}

/// Runs commit lists sequentially, stopping at the first failure.
pub struct Applier {
    executor: Arc<dyn CommitExecutor>,
    metrics: Arc<SyncMetrics>,
}

impl Applier {
    /// Create an applier writing through `executor`.
    pub fn new(executor: Arc<dyn CommitExecutor>, metrics: Arc<SyncMetrics>) -> Self {
        Self { executor, metrics }
    }

    /// Create an applier writing straight to `store`.
    pub fn for_store(store: Arc<dyn ObjectStore>, metrics: Arc<SyncMetrics>) -> Self {
        Self::new(Arc::new(StoreCommitExecutor::new(store)), metrics)
    }

    /// Apply commits in order.
    ///
    /// Commits already applied when one fails are not rolled back; the next
    /// pass repairs whatever is left.
    ///
    /// # Errors
    ///
    /// Returns the first failing commit's error. Use
    /// [`Error::is_retryable`] to classify it.
    pub async fn apply(&self, commits: &[Commit]) -> Result<usize> {
        for (index, commit) in commits.iter().enumerate() {
            let started = Instant::now();
            let result = self.executor.execute(commit).await;
            let elapsed = started.elapsed();
            self.metrics.commit(elapsed);

            match result {
                Ok(()) => {
                    debug!(
                        commit = %commit.describe(),
                        elapsed_ms = elapsed.as_millis(),
                        "Commit applied"
                    );
                }
                Err(e) => {
                    warn!(
                        commit = %commit.describe(),
                        applied = index,
                        remaining = commits.len() - index - 1,
                        error = %e,
                        "Commit failed, aborting remaining commits"
                    );
                    return Err(e);
                }
            }
        }

        Ok(commits.len())
    }
}
