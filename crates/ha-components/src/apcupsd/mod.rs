//! apcupsd integration
//!
//! Polls an apcupsd Network Information Server and exposes the selected
//! status fields as sensors plus an online status binary sensor. Each
//! config entry owns one [`DataUpdateCoordinator`]; its entities only ever
//! read the coordinator's latest snapshot.

pub mod binary_sensor;
pub mod client;
pub mod config_flow;
pub mod constants;
pub mod entity;
pub mod sensor;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ha_config_entries::{ConfigEntries, ConfigEntry, ConfigFlow, EntrySetup, FlowManager, SetupError};
use ha_helpers::{DataUpdateCoordinator, Entity, UpdateFailed, UpdateMethod};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use binary_sensor::OnlineStatus;
pub use client::{
    nis_client_factory, parse, NisClient, NisError, NisResult, StatusSnapshot, StatusSource,
    StatusSourceFactory,
};
pub use config_flow::ApcUpsdConfigFlow;
pub use constants::*;
pub use sensor::{infer_unit, ApcUpsdSensor, SensorEntityDescription, SensorTypes, SENSOR_TYPES};

/// Coordinator polling one UPS
pub type ApcUpsdCoordinator = DataUpdateCoordinator<StatusSnapshot>;

/// Typed view of an apcupsd entry's data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApcUpsdConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub sensors: Vec<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Coordinator update method fetching from a status source
pub struct StatusUpdater {
    source: Arc<dyn StatusSource>,
}

impl StatusUpdater {
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl UpdateMethod<StatusSnapshot> for StatusUpdater {
    async fn update(&self) -> Result<StatusSnapshot, UpdateFailed> {
        self.source
            .fetch_status()
            .await
            .map_err(|e| UpdateFailed::new(e.to_string()))
    }
}

/// Everything a loaded entry keeps alive
pub struct ApcUpsdRuntime {
    pub coordinator: Arc<ApcUpsdCoordinator>,
    pub sensor_types: Arc<SensorTypes>,
    pub sensors: Vec<Arc<ApcUpsdSensor>>,
    pub online_status: Arc<OnlineStatus>,
}

impl ApcUpsdRuntime {
    /// All entities of the entry, binary sensor first
    pub fn entities(&self) -> Vec<Arc<dyn Entity>> {
        let mut entities: Vec<Arc<dyn Entity>> = vec![self.online_status.clone()];
        entities.extend(self.sensors.iter().map(|s| s.clone() as Arc<dyn Entity>));
        entities
    }
}

/// Setup hooks for apcupsd entries
pub struct ApcUpsdIntegration {
    source_factory: StatusSourceFactory,
    runtimes: DashMap<String, Arc<ApcUpsdRuntime>>,
}

impl ApcUpsdIntegration {
    pub fn new(source_factory: StatusSourceFactory) -> Self {
        Self {
            source_factory,
            runtimes: DashMap::new(),
        }
    }

    pub fn runtime(&self, entry_id: &str) -> Option<Arc<ApcUpsdRuntime>> {
        self.runtimes.get(entry_id).map(|r| r.value().clone())
    }

    pub fn entities(&self, entry_id: &str) -> Vec<Arc<dyn Entity>> {
        self.runtime(entry_id)
            .map(|runtime| runtime.entities())
            .unwrap_or_default()
    }

    /// Register the setup hooks and the config flow
    pub fn register(
        self: &Arc<Self>,
        entries: &ConfigEntries,
        flows: &FlowManager,
    ) {
        entries.register_handler(DOMAIN, self.clone());

        let factory = self.source_factory.clone();
        flows.register(
            DOMAIN,
            Arc::new(move || Box::new(ApcUpsdConfigFlow::new(factory.clone())) as Box<dyn ConfigFlow>),
        );
    }
}

#[async_trait]
impl EntrySetup for ApcUpsdIntegration {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), SetupError> {
        let config: ApcUpsdConfig = entry
            .data_as()
            .map_err(|e| SetupError::Failed(format!("invalid entry data: {}", e)))?;

        let source = (self.source_factory)(&config.host, config.port);
        let coordinator = Arc::new(ApcUpsdCoordinator::new(
            DOMAIN,
            SCAN_INTERVAL,
            Arc::new(StatusUpdater::new(source)),
        ));

        coordinator
            .async_config_entry_first_refresh()
            .await
            .map_err(|e| SetupError::NotReady(e.to_string()))?;

        let sensor_types = Arc::new(SensorTypes::for_keys(&config.sensors));
        let sensors = sensor::setup_entities(entry, coordinator.clone(), &sensor_types);
        let online_status = Arc::new(binary_sensor::setup_entities(entry, coordinator.clone()));

        coordinator.start();
        info!(
            entry_id = %entry.entry_id,
            host = %config.host,
            port = config.port,
            sensors = sensors.len(),
            "apcupsd entry set up"
        );

        let replaced = self.runtimes.insert(
            entry.entry_id.clone(),
            Arc::new(ApcUpsdRuntime {
                coordinator,
                sensor_types,
                sensors,
                online_status,
            }),
        );
        if let Some(old) = replaced {
            old.coordinator.shutdown();
            debug!(entry_id = %entry.entry_id, "Replaced apcupsd coordinator stopped");
        }
        Ok(())
    }

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<(), String> {
        if let Some((_, runtime)) = self.runtimes.remove(&entry.entry_id) {
            runtime.coordinator.shutdown();
            debug!(entry_id = %entry.entry_id, "apcupsd coordinator stopped");
        }
        Ok(())
    }
}
