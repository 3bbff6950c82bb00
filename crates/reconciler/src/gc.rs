//! Garbage collection of objects an Application no longer wants.

use std::collections::HashSet;
use std::sync::Arc;

use appsync_core::{Application, Kind, LabelSelector, Object};
use appsync_store::ObjectStore;
use futures::future::try_join_all;
use tracing::debug;

use crate::error::{Error, Result};
use crate::generator::APP_LABEL;
use crate::types::ResourceOperation;

/// Finds owned objects absent from the desired list.
pub struct GarbageCollector {
    store: Arc<dyn ObjectStore>,
    kinds: Vec<Kind>,
}

impl GarbageCollector {
    /// Create a collector listing the given kinds.
    pub fn new(store: Arc<dyn ObjectStore>, kinds: Vec<Kind>) -> Self {
        Self { store, kinds }
    }

    /// Create a collector for every kind the standard generator produces.
    /// Cloud kinds are only listed when a Google project is configured.
    pub fn for_cluster(store: Arc<dyn ObjectStore>, google_project_id: Option<&str>) -> Self {
        let mut kinds = Kind::generic().to_vec();
        if google_project_id.is_some_and(|id| !id.is_empty()) {
            kinds.extend_from_slice(Kind::cloud());
        }
        Self::new(store, kinds)
    }

    /// Kinds this collector lists.
    #[must_use]
    pub fn kinds(&self) -> &[Kind] {
        &self.kinds
    }

    /// Objects labeled for `app`, owned by it, and not in `desired`.
    ///
    /// Objects that carry the label but not the owner reference are never
    /// returned. Matching against the desired list is by kind and name.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cleanup` if any kind cannot be listed.
    pub async fn unreferenced(
        &self,
        app: &Application,
        desired: &[ResourceOperation],
    ) -> Result<Vec<Object>> {
        let selector = LabelSelector::equals(APP_LABEL, app.name());
        let listings = self
            .kinds
            .iter()
            .map(|kind| self.store.list(*kind, app.namespace(), &selector));

        let existing = try_join_all(listings)
            .await
            .map_err(|e| Error::cleanup(format!("discovering unreferenced resources: {e}")))?;

        let wanted: HashSet<(Kind, &str)> =
            desired.iter().map(|op| op.object.identity()).collect();
        let uid = app.metadata.uid.as_str();

        let unreferenced: Vec<Object> = existing
            .into_iter()
            .flatten()
            .filter(|object| object.metadata.is_owned_by(uid))
            .filter(|object| !wanted.contains(&object.identity()))
            .collect();

        debug!(
            namespace = app.namespace(),
            application = app.name(),
            count = unreferenced.len(),
            "Found unreferenced resources"
        );
        Ok(unreferenced)
    }
}
