//! Watch-driven controller loop.
//!
//! The controller turns store change notifications into reconciliation
//! passes. Each triggered Application gets its own task; a key that is
//! already being reconciled is marked dirty and processed again once the
//! running pass finishes, so one Application is never reconciled twice at
//! the same time. Requeues requested by the reconciler are scheduled on
//! timers, and every Application is re-triggered on a fixed resync
//! interval.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use appsync_core::{ObjectKey, ResultExt};
use appsync_store::{ObjectStore, WatchError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::types::Requeue;

/// Configuration for the controller loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Interval between full re-triggers of every Application.
    pub full_sync_interval: Duration,
    /// Delay before retrying an Application whose pass failed to fetch or
    /// timed out. A conflict (`Retrying`) is requeued without delay.
    pub error_requeue_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            full_sync_interval: Duration::from_secs(3600),
            error_requeue_delay: Duration::from_secs(1),
        }
    }
}

impl From<&Config> for ControllerConfig {
    fn from(config: &Config) -> Self {
        Self {
            full_sync_interval: config.informer.full_sync_interval,
            error_requeue_delay: config.synchronizer.conflict_retry_delay,
        }
    }
}

/// Keys with a pass in flight. The flag records a trigger that arrived
/// while the pass was running.
struct WorkQueue {
    reconciler: Arc<Reconciler>,
    active: Mutex<HashMap<ObjectKey, bool>>,
    error_requeue_delay: Duration,
}

impl WorkQueue {
    fn enqueue(self: &Arc<Self>, key: ObjectKey) {
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(dirty) = active.get_mut(&key) {
                *dirty = true;
                return;
            }
            active.insert(key.clone(), false);
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.work(key).await });
    }

    async fn work(self: Arc<Self>, key: ObjectKey) {
        loop {
            let requeue = match self.reconciler.reconcile(&key).await {
                Ok(reconciled) => {
                    if let Some(state) = reconciled.state {
                        debug!(key = %key, state = %state, "Reconciliation pass finished");
                    }
                    reconciled.requeue
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Reconciliation failed, requeueing");
                    self.requeue_after_error(&e)
                }
            };

            let again = {
                let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
                if active.get(&key).copied().unwrap_or(false) {
                    active.insert(key.clone(), false);
                    true
                } else {
                    active.remove(&key);
                    false
                }
            };
            if again {
                continue;
            }

            if let Requeue::After(delay) = requeue {
                let queue = Arc::clone(&self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.enqueue(key);
                });
            }
            return;
        }
    }

    fn requeue_after_error(&self, err: &Error) -> Requeue {
        if err.is_retryable() {
            Requeue::After(Duration::ZERO)
        } else {
            Requeue::After(self.error_requeue_delay)
        }
    }

    fn in_flight(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Drives reconciliation from store notifications.
pub struct Controller {
    queue: Arc<WorkQueue>,
    store: Arc<dyn ObjectStore>,
    config: ControllerConfig,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
}

impl Controller {
    /// Create a controller for `reconciler`, watching the reconciler's store.
    pub fn new(reconciler: Arc<Reconciler>, config: ControllerConfig) -> Self {
        let store = Arc::clone(reconciler.store());
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            queue: Arc::new(WorkQueue {
                reconciler,
                active: Mutex::new(HashMap::new()),
                error_requeue_delay: config.error_requeue_delay,
            }),
            store,
            config,
            stop_rx,
            stop_tx,
        }
    }

    /// Run until stopped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Stopped` if the store's notification stream closes.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            full_sync_interval_secs = self.config.full_sync_interval.as_secs(),
            "Starting controller"
        );

        let mut changes = self.store.watch();
        let mut resync = tokio::time::interval(self.config.full_sync_interval);

        loop {
            tokio::select! {
                _ = resync.tick() => {
                    self.resync_all().await;
                }
                change = changes.recv() => match change {
                    Ok(event) if event.is_application() && event.is_spec_change() => {
                        debug!(key = %event.key, action = ?event.action, "Application changed");
                        self.queue.enqueue(event.key);
                    }
                    Ok(_) => {}
                    Err(WatchError::Lagged(missed)) => {
                        warn!(missed, "Change notifications dropped, resynchronizing");
                        self.resync_all().await;
                    }
                    Err(WatchError::Closed) => {
                        error!("Change notification stream closed");
                        return Err(Error::Stopped);
                    }
                },
                _ = self.stop_rx.changed() => {
                    if *self.stop_rx.borrow() {
                        info!("Controller stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Trigger a pass for every Application.
    async fn resync_all(&self) {
        let Some(apps) = self
            .store
            .list_applications()
            .await
            .into_option_logged("Unable to list applications for resync")
        else {
            return;
        };

        debug!(applications = apps.len(), "Full resync");
        for app in apps {
            self.queue.enqueue(app.key());
        }
    }

    /// Trigger a pass for one Application.
    pub fn trigger(&self, key: ObjectKey) {
        self.queue.enqueue(key);
    }

    /// Number of Applications with a pass in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    /// Stop the controller.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a handle that can stop the controller from another task.
    #[must_use]
    pub fn stopper(&self) -> ControllerStopper {
        ControllerStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop a running controller.
#[derive(Clone)]
pub struct ControllerStopper {
    stop_tx: watch::Sender<bool>,
}

impl ControllerStopper {
    /// Stop the controller.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
