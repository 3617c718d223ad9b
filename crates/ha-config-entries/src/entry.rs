//! Config entry types
//!
//! A [`ConfigEntry`] is one configured instance of an integration, e.g. one
//! UPS behind one apcupsd daemon. `data` is what the config flow collected;
//! lifecycle fields live only in memory.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::lifecycle::InvalidTransition;

/// Where an entry is in its setup/unload lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    #[default]
    NotLoaded,
    SetupInProgress,
    Loaded,
    /// Setup failed, needs user action
    SetupError,
    /// Device unreachable, setup is retried with backoff
    SetupRetry,
    UnloadInProgress,
    FailedUnload,
}

impl ConfigEntryState {
    /// States an entry can be unloaded or reloaded from
    pub fn is_recoverable(&self) -> bool {
        use ConfigEntryState::*;
        matches!(self, NotLoaded | Loaded | SetupError | SetupRetry)
    }
}

/// How the entry came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Created through a config flow
    #[default]
    User,
    /// Migrated from an older configuration
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryDisabledBy {
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// ULID
    pub entry_id: String,
    pub domain: String,
    pub title: String,

    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub options: HashMap<String, Value>,

    /// Version of the `data` layout
    #[serde(default = "default_version")]
    pub version: u32,

    /// Device identifier; at most one entry per domain may carry it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    #[serde(default)]
    pub source: ConfigEntrySource,

    #[serde(skip, default)]
    pub state: ConfigEntryState,
    /// Why the entry is in an error or retry state
    #[serde(skip, default)]
    pub reason: Option<String>,
    /// Setup attempts in the current retry cycle
    #[serde(skip, default)]
    pub tries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<ConfigEntryDisabledBy>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl ConfigEntry {
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: HashMap::new(),
            options: HashMap::new(),
            version: default_version(),
            unique_id: None,
            source: ConfigEntrySource::default(),
            state: ConfigEntryState::default(),
            reason: None,
            tries: 0,
            disabled_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_data(mut self, data: HashMap<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_source(mut self, source: ConfigEntrySource) -> Self {
        self.source = source;
        self
    }

    /// Deserialize `data` into an integration's typed configuration
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let data: serde_json::Map<String, Value> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(Value::Object(data))
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    /// Move to `new_state` if the lifecycle allows it.
    ///
    /// `tries` survives only while the entry cycles between setup and retry.
    pub fn try_set_state(
        &mut self,
        new_state: ConfigEntryState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        self.state.try_transition(new_state)?;
        self.state = new_state;
        self.reason = reason;

        if !matches!(
            new_state,
            ConfigEntryState::SetupInProgress | ConfigEntryState::SetupRetry
        ) {
            self.tries = 0;
        }
        Ok(())
    }

    /// Count one more failed setup attempt
    pub fn increment_tries(&mut self) -> u32 {
        self.tries += 1;
        self.tries
    }
}

/// Changes applied by [`ConfigEntries::update`](crate::ConfigEntries::update)
#[derive(Debug, Default)]
pub struct ConfigEntryUpdate {
    pub title: Option<String>,
    pub data: Option<HashMap<String, Value>>,
    pub options: Option<HashMap<String, Value>>,
}

impl ConfigEntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn data(mut self, data: HashMap<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn options(mut self, options: HashMap<String, Value>) -> Self {
        self.options = Some(options);
        self
    }
}
