//! Change notifications emitted by the store.

use appsync_core::{Kind, ObjectKey};
use tokio::sync::broadcast;

/// What kind of record changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    Application,
    Object(Kind),
    Event,
}

/// How it changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Added,
    Modified,
    /// Only the status subresource changed.
    StatusModified,
    Deleted,
}

/// A single change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub target: WatchTarget,
    pub action: WatchAction,
    pub key: ObjectKey,
}

impl WatchEvent {
    /// Whether the change concerns an Application.
    #[must_use]
    pub fn is_application(&self) -> bool {
        self.target == WatchTarget::Application
    }

    /// Whether anything besides status changed.
    #[must_use]
    pub fn is_spec_change(&self) -> bool {
        self.action != WatchAction::StatusModified
    }
}

/// Why a watch stopped delivering events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchError {
    /// The subscriber fell behind and missed this many events.
    Lagged(u64),
    /// The store was dropped.
    Closed,
}

/// Subscription handle for receiving change notifications.
pub struct WatchSubscription {
    receiver: broadcast::Receiver<WatchEvent>,
}

impl WatchSubscription {
    /// Wrap a broadcast receiver.
    #[must_use]
    pub const fn new(receiver: broadcast::Receiver<WatchEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next change.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::Lagged` when notifications were dropped, after
    /// which the caller should resynchronize, and `WatchError::Closed`
    /// when no more notifications will arrive.
    pub async fn recv(&mut self) -> Result<WatchEvent, WatchError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(n) => WatchError::Lagged(n),
            broadcast::error::RecvError::Closed => WatchError::Closed,
        })
    }

    /// Try to receive a change without waiting.
    #[must_use]
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        self.receiver.try_recv().ok()
    }
}
