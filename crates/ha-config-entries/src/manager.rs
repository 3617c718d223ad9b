//! The registry of configured integrations
//!
//! [`ConfigEntries`] keeps every entry indexed by id, domain and unique id,
//! persists them under `.storage/core.config_entries` and drives setup and
//! unload through the [`EntrySetup`] hooks each integration registers.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::lifecycle::calculate_retry_delay;
use crate::storage::{Storable, Storage, StorageError, StorageResult};

pub const STORAGE_KEY: &str = "core.config_entries";

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("no config entry {0}")]
    NotFound(String),

    #[error("{domain} already has an entry for {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("entry in state {0:?} cannot be unloaded")]
    CannotUnload(ConfigEntryState),

    #[error("entry in state {0:?} cannot be set up")]
    CannotSetup(ConfigEntryState),

    #[error("integration not ready: {0}")]
    NotReady(String),

    #[error("integration setup failed: {0}")]
    SetupFailed(String),

    #[error("integration unload failed: {0}")]
    UnloadFailed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Outcome of an integration's failed setup
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// The device can't be reached yet; the entry is retried later.
    #[error("not ready: {0}")]
    NotReady(String),

    /// Setup failed for good until the user intervenes.
    #[error("failed: {0}")]
    Failed(String),
}

/// Setup and teardown hooks an integration registers for its domain
#[async_trait]
pub trait EntrySetup: Send + Sync {
    /// Set up everything the entry needs (clients, coordinators, entities).
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError>;

    /// Tear down what `setup_entry` created.
    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<(), String>;
}

/// Persisted form: just the list, lifecycle state is not stored
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = 1;
    const MINOR_VERSION: u32 = 1;
}

pub struct ConfigEntries {
    storage: Arc<Storage>,

    entries: DashMap<String, ConfigEntry>,
    /// domain -> entry ids
    by_domain: DashMap<String, HashSet<String>>,
    /// (domain, unique_id) -> entry id
    by_unique_id: DashMap<(String, String), String>,

    /// Held across setup and unload so they never interleave
    setup_lock: Mutex<()>,

    handlers: DashMap<String, Arc<dyn EntrySetup>>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            handlers: DashMap::new(),
        }
    }

    /// Read persisted entries. Every loaded entry starts out `NotLoaded`.
    pub async fn load(&self) -> StorageResult<()> {
        let Some(stored) = self.storage.load::<ConfigEntriesData>().await? else {
            debug!("No stored config entries");
            return Ok(());
        };
        info!(
            count = stored.data.entries.len(),
            version = stored.version,
            "Loaded config entries"
        );
        for entry in &stored.data.entries {
            self.index_entry(entry);
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let data = ConfigEntriesData {
            entries: self.entries.iter().map(|r| r.value().clone()).collect(),
        };
        self.storage.save(data).await?;
        debug!(count = self.entries.len(), "Saved config entries");
        Ok(())
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.entries.insert(entry_id.clone(), entry.clone());

        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }

        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())?;
        self.get(&entry_id)
    }

    /// Store a new entry. A unique id may appear only once per domain.
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(domain = %entry.domain, entry_id = %entry.entry_id, "Added {}", entry.title);
        Ok(entry)
    }

    /// Apply `update` and persist. The unique id is never changed here.
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let updated = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
            if let Some(title) = update.title {
                entry.title = title;
            }
            if let Some(data) = update.data {
                entry.data = data;
            }
            if let Some(options) = update.options {
                entry.options = options;
            }
            entry.modified_at = Utc::now();
            entry.clone()
        };

        self.save().await?;
        debug!(entry_id, "Updated config entry");
        Ok(updated)
    }

    /// Drop an entry for good, unloading it first if needed
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if matches!(
            entry.state,
            ConfigEntryState::Loaded | ConfigEntryState::SetupRetry
        ) {
            self.unload(entry_id).await?;
        }

        self.unindex_entry(&entry);
        self.save().await?;

        info!(domain = %entry.domain, entry_id, "Removed {}", entry.title);
        Ok(entry)
    }

    // Rejected transitions are logged, not returned.
    fn transition(&self, entry_id: &str, state: ConfigEntryState, reason: Option<String>) {
        if let Some(mut entry) = self.entries.get_mut(entry_id) {
            match entry.try_set_state(state, reason) {
                Ok(()) => debug!(entry_id, ?state, "Entry state changed"),
                Err(e) => warn!(entry_id, "{}", e),
            }
        }
    }

    pub fn register_handler(&self, domain: &str, handler: Arc<dyn EntrySetup>) {
        self.handlers.insert(domain.to_string(), handler);
        debug!(domain, "Registered entry setup");
    }

    fn handler(&self, domain: &str) -> Option<Arc<dyn EntrySetup>> {
        self.handlers.get(domain).map(|h| h.value().clone())
    }

    /// Run the domain's setup hook.
    ///
    /// An entry that is already loaded is left alone.
    /// `NotReady` leaves the entry in `SetupRetry` with one more try counted;
    /// see [`schedule_setup_retry`](Self::schedule_setup_retry).
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.is_disabled() {
            debug!(entry_id, "Entry disabled, not setting up");
            return Ok(());
        }
        match entry.state {
            ConfigEntryState::NotLoaded
            | ConfigEntryState::SetupError
            | ConfigEntryState::SetupRetry => {}
            ConfigEntryState::Loaded => {
                debug!(entry_id, "Entry already set up");
                return Ok(());
            }
            state => return Err(ConfigEntriesError::CannotSetup(state)),
        }

        self.transition(entry_id, ConfigEntryState::SetupInProgress, None);

        let Some(handler) = self.handler(&entry.domain) else {
            self.transition(entry_id, ConfigEntryState::Loaded, None);
            debug!(domain = %entry.domain, "Nothing to set up");
            return Ok(());
        };

        match handler.setup_entry(&entry).await {
            Ok(()) => {
                self.transition(entry_id, ConfigEntryState::Loaded, None);
                info!(entry_id, "Set up {}", entry.title);
                Ok(())
            }
            Err(SetupError::NotReady(reason)) => {
                warn!(entry_id, "Not ready yet: {}", reason);
                self.transition(
                    entry_id,
                    ConfigEntryState::SetupRetry,
                    Some(reason.clone()),
                );
                if let Some(mut e) = self.entries.get_mut(entry_id) {
                    e.increment_tries();
                }
                Err(ConfigEntriesError::NotReady(reason))
            }
            Err(SetupError::Failed(reason)) => {
                warn!(entry_id, "Setup failed: {}", reason);
                self.transition(
                    entry_id,
                    ConfigEntryState::SetupError,
                    Some(reason.clone()),
                );
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    /// Keep retrying setup of an entry in `SetupRetry`, with backoff.
    ///
    /// Stops once the entry leaves `SetupRetry` (loaded, failed, unloaded or
    /// removed).
    pub fn schedule_setup_retry(self: &Arc<Self>, entry_id: &str) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let entry_id = entry_id.to_string();

        tokio::spawn(async move {
            loop {
                let tries = match manager.get(&entry_id) {
                    Some(entry) if entry.state == ConfigEntryState::SetupRetry => entry.tries,
                    _ => return,
                };

                let delay = calculate_retry_delay(tries.saturating_sub(1));
                debug!(entry_id = %entry_id, ?delay, "Retrying setup");
                tokio::time::sleep(delay).await;

                match manager.get(&entry_id) {
                    Some(entry) if entry.state == ConfigEntryState::SetupRetry => {}
                    _ => return,
                }
                if !matches!(
                    manager.setup(&entry_id).await,
                    Err(ConfigEntriesError::NotReady(_))
                ) {
                    return;
                }
            }
        })
    }

    /// Run the domain's unload hook. Unloading a `NotLoaded` entry is a no-op.
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if !entry.state.is_recoverable() {
            return Err(ConfigEntriesError::CannotUnload(entry.state));
        }
        if entry.state == ConfigEntryState::NotLoaded {
            return Ok(());
        }

        self.transition(entry_id, ConfigEntryState::UnloadInProgress, None);

        let result = match self.handler(&entry.domain) {
            Some(handler) => handler.unload_entry(&entry).await,
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                self.transition(entry_id, ConfigEntryState::NotLoaded, None);
                info!(entry_id, "Unloaded {}", entry.title);
                Ok(())
            }
            Err(reason) => {
                warn!(entry_id, "Unload failed: {}", reason);
                self.transition(
                    entry_id,
                    ConfigEntryState::FailedUnload,
                    Some(reason.clone()),
                );
                Err(ConfigEntriesError::UnloadFailed(reason))
            }
        }
    }

    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        self.unload(entry_id).await?;
        self.setup(entry_id).await
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set up every entry, e.g. after [`load`](Self::load) at startup.
    /// Entries that are not ready yet get a retry scheduled.
    pub async fn setup_all(self: &Arc<Self>) -> Vec<ConfigEntriesResult<()>> {
        let entry_ids: Vec<String> = self.entries.iter().map(|r| r.key().clone()).collect();
        let mut results = Vec::with_capacity(entry_ids.len());

        for entry_id in entry_ids {
            let result = self.setup(&entry_id).await;
            if matches!(result, Err(ConfigEntriesError::NotReady(_))) {
                self.schedule_setup_retry(&entry_id);
            }
            results.push(result);
        }

        results
    }
}
