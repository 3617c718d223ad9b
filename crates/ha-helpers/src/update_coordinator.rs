//! Data update coordinator
//!
//! One coordinator polls one data source on a fixed interval and fans the
//! result out to every entity built on top of it. Entities never fetch on
//! their own; they read [`CoordinatorHandle::data`] and get called back
//! through their listener after every refresh.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Error returned by an update method
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct UpdateFailed(pub String);

impl UpdateFailed {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Fetches a fresh value for a coordinator
#[async_trait]
pub trait UpdateMethod<T>: Send + Sync {
    async fn update(&self) -> Result<T, UpdateFailed>;
}

/// Identifies a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback run after every refresh, successful or not
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// What entities need from a coordinator
pub trait CoordinatorHandle<T>: Send + Sync {
    /// Latest successfully fetched data
    fn data(&self) -> Option<Arc<T>>;

    /// Whether the most recent refresh succeeded
    fn last_update_success(&self) -> bool;

    fn add_listener(&self, listener: Listener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

/// Polls an [`UpdateMethod`] on a fixed interval
pub struct DataUpdateCoordinator<T> {
    name: String,
    update_interval: Duration,
    method: Arc<dyn UpdateMethod<T>>,
    /// Swapped wholesale on every successful refresh
    data: watch::Sender<Option<Arc<T>>>,
    last_update_success: AtomicBool,
    last_error: Mutex<Option<UpdateFailed>>,
    listeners: DashMap<ListenerId, Listener>,
    next_listener_id: AtomicU64,
    /// Serializes refreshes
    refresh_lock: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + Sync + 'static> DataUpdateCoordinator<T> {
    pub fn new(
        name: impl Into<String>,
        update_interval: Duration,
        method: Arc<dyn UpdateMethod<T>>,
    ) -> Self {
        let (data, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);
        Self {
            name: name.into(),
            update_interval,
            method,
            data,
            last_update_success: AtomicBool::new(true),
            last_error: Mutex::new(None),
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            refresh_lock: tokio::sync::Mutex::new(()),
            shutdown,
            poll_task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Error of the last refresh, `None` after a successful one
    pub fn last_error(&self) -> Option<UpdateFailed> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Refresh once. Failures are recorded, logged and reported to listeners
    /// as unavailability; they are never returned.
    pub async fn async_refresh(&self) {
        let _ = self.refresh().await;
    }

    /// First refresh for a config entry being set up.
    ///
    /// Unlike [`async_refresh`](Self::async_refresh) the failure is returned
    /// so setup can be retried later.
    pub async fn async_config_entry_first_refresh(&self) -> Result<(), UpdateFailed> {
        self.refresh().await
    }

    async fn refresh(&self) -> Result<(), UpdateFailed> {
        let _guard = self.refresh_lock.lock().await;

        let result = self.method.update().await;

        if self.is_shutdown() {
            debug!(coordinator = %self.name, "Discarding refresh result after shutdown");
            return result.map(|_| ());
        }

        let outcome = match result {
            Ok(data) => {
                self.data.send_replace(Some(Arc::new(data)));
                if !self.last_update_success.swap(true, Ordering::SeqCst) {
                    info!(coordinator = %self.name, "Fetching data recovered");
                }
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
                debug!(coordinator = %self.name, "Finished fetching data");
                Ok(())
            }
            Err(err) => {
                if self.last_update_success.swap(false, Ordering::SeqCst) {
                    warn!(coordinator = %self.name, "Error fetching data: {}", err);
                } else {
                    debug!(coordinator = %self.name, "Still failing to fetch data: {}", err);
                }
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(err.clone());
                Err(err)
            }
        };

        self.update_listeners();
        outcome
    }

    /// Call every listener once
    pub fn update_listeners(&self) {
        let listeners: Vec<Listener> =
            self.listeners.iter().map(|r| r.value().clone()).collect();
        for listener in listeners {
            listener();
        }
    }

    /// Start polling every `update_interval`, first tick one interval from now.
    ///
    /// Calling it again while already polling does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut poll_task = self.poll_task.lock().unwrap_or_else(PoisonError::into_inner);
        if poll_task.is_some() || self.is_shutdown() {
            return;
        }

        let weak = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let interval = self.update_interval;
        debug!(coordinator = %self.name, ?interval, "Starting polling");

        *poll_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }

                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                coordinator.async_refresh().await;
            }
        }));
    }

    /// Stop polling. A refresh already in flight runs to completion but its
    /// result is dropped.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(coordinator = %self.name, "Polling stopped");
    }
}

impl<T: Send + Sync + 'static> CoordinatorHandle<T> for DataUpdateCoordinator<T> {
    fn data(&self) -> Option<Arc<T>> {
        self.data.borrow().clone()
    }

    fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst)
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.insert(id, listener);
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(&id);
    }
}
