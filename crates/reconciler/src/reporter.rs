//! Cluster event reporting with coalescing.

use std::sync::Arc;

use appsync_core::{Application, ClusterEvent, EventType, SyncState};
use appsync_store::ObjectStore;
use tracing::{error, warn};

use crate::error::{Error, Result};

/// Records outcome events against Applications.
///
/// An event with the same message as an existing one for the same
/// Application is not duplicated; the existing event's count is bumped and
/// its timestamp refreshed instead.
#[derive(Clone)]
pub struct EventReporter {
    store: Arc<dyn ObjectStore>,
}

impl EventReporter {
    /// Create a reporter writing to `store`.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Record an event about `app`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Event` if existing events cannot be listed or the
    /// event cannot be written.
    pub async fn report(
        &self,
        app: &Application,
        reason: SyncState,
        message: impl Into<String>,
        event_type: EventType,
    ) -> Result<ClusterEvent> {
        let message = message.into();
        let existing = self
            .store
            .list_events(app.namespace(), app.name(), &app.metadata.uid)
            .await
            .map_err(|e| Error::event(format!("get events for {}: {e}", app.key())))?;

        let fresh = ClusterEvent::for_application(app, reason.as_str(), message, event_type);

        let written = match existing.into_iter().find(|e| e.message == fresh.message) {
            Some(mut event) => {
                event.count = event.count.saturating_add(1);
                event.last_timestamp = fresh.last_timestamp;
                event.reason = fresh.reason;
                event.event_type = fresh.event_type;
                event.metadata.annotations = fresh.metadata.annotations;
                self.store.update_event(event).await
            }
            None => self.store.create_event(fresh).await,
        };

        written.map_err(|e| Error::event(format!("write event for {}: {e}", app.key())))
    }

    /// Log an error and record it as a warning event.
    ///
    /// Failing to record the event is logged and otherwise ignored.
    pub async fn report_error(&self, app: &Application, reason: SyncState, err: &Error) {
        error!(
            namespace = app.namespace(),
            application = app.name(),
            correlation_id = app.correlation_id(),
            state = %reason,
            error = %err,
            "Reconciliation step failed"
        );

        if let Err(report_err) = self
            .report(app, reason, err.to_string(), EventType::Warning)
            .await
        {
            warn!(
                namespace = app.namespace(),
                application = app.name(),
                error = %report_err,
                "Unable to report error event"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use appsync_core::ApplicationSpec;
    use appsync_store::{InMemoryObjectStore, StoreOp};

    fn app() -> Application {
        let mut app = Application::new(
            "team",
            "web",
            ApplicationSpec {
                image: "img".to_string(),
                ..ApplicationSpec::default()
            },
        );
        app.metadata.uid = "app-uid".to_string();
        app
    }

    fn reporter(store: &Arc<InMemoryObjectStore>) -> EventReporter {
        let store: Arc<dyn ObjectStore> = store.clone();
        EventReporter::new(store)
    }

    #[tokio::test]
    async fn test_identical_messages_coalesce() {
        let store = InMemoryObjectStore::new_arc();
        let reporter = reporter(&store);
        let before = chrono::Utc::now();

        let first = reporter
            .report(&app(), SyncState::Retrying, "conflict on Service", EventType::Warning)
            .await
            .unwrap();
        let second = reporter
            .report(&app(), SyncState::Retrying, "conflict on Service", EventType::Warning)
            .await
            .unwrap();

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].count, 2);
        assert_eq!(second.metadata.name, first.metadata.name);
        assert!(second.last_timestamp >= first.last_timestamp);
        assert!(first.first_timestamp >= before);
    }

    #[tokio::test]
    async fn test_distinct_messages_create_events() {
        let store = InMemoryObjectStore::new_arc();
        let reporter = reporter(&store);

        reporter
            .report(&app(), SyncState::Synchronized, "one", EventType::Normal)
            .await
            .unwrap();
        reporter
            .report(&app(), SyncState::Synchronized, "two", EventType::Normal)
            .await
            .unwrap();

        assert_eq!(store.events().await.len(), 2);
    }

    #[tokio::test]
    async fn test_events_are_scoped_to_application_uid() {
        let store = InMemoryObjectStore::new_arc();
        let reporter = reporter(&store);

        reporter
            .report(&app(), SyncState::Synchronized, "same", EventType::Normal)
            .await
            .unwrap();

        let mut recreated = app();
        recreated.metadata.uid = "new-uid".to_string();
        reporter
            .report(&recreated, SyncState::Synchronized, "same", EventType::Normal)
            .await
            .unwrap();

        let events = store.events().await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.count == 1));
    }

    #[tokio::test]
    async fn test_report_error_swallows_store_failures() {
        let store = InMemoryObjectStore::new_arc();
        store
            .fail_next(StoreOp::ListEvents, appsync_core::Error::internal("down"))
            .await;

        reporter(&store)
            .report_error(&app(), SyncState::FailedPrepare, &Error::prepare("bad spec"))
            .await;

        assert!(store.events().await.is_empty());
    }
}
