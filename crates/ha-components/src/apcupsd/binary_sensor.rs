//! Online status of a UPS

use std::collections::HashMap;

use ha_config_entries::ConfigEntry;
use ha_helpers::{binary_state, BinarySensorEntity, Entity};
use serde_json::{json, Value};
use tracing::debug;

use super::constants::{KEY_STATUS, VALUE_ONLINE};
use super::entity::{ApcUpsdEntity, StatusHandle};

/// Parse a `STATFLAG` value, hex with or without `0x`
pub fn parse_statflag(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16).ok()
}

/// On while the UPS runs on line power
pub struct OnlineStatus {
    base: ApcUpsdEntity,
}

impl OnlineStatus {
    pub fn new(device_id: &str, coordinator: StatusHandle) -> Self {
        Self {
            base: ApcUpsdEntity::new(device_id, coordinator, "Status", "mdi:power-plug"),
        }
    }

    fn statflag(&self) -> Option<u32> {
        let raw = self.base.field(KEY_STATUS)?;
        let flags = parse_statflag(&raw);
        if flags.is_none() {
            debug!("Unparsable {} value: {:?}", KEY_STATUS, raw);
        }
        flags
    }
}

impl Entity for OnlineStatus {
    fn name(&self) -> Option<String> {
        Some(self.base.name().to_string())
    }

    fn unique_id(&self) -> Option<String> {
        Some(self.base.unique_id_for("online_status"))
    }

    fn icon(&self) -> Option<String> {
        Some(self.base.icon().to_string())
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn state(&self) -> Option<String> {
        binary_state(self.is_on())
    }

    fn state_attributes(&self) -> HashMap<String, Value> {
        match self.statflag() {
            Some(flags) => HashMap::from([("statflag".to_string(), json!(flags))]),
            None => HashMap::new(),
        }
    }
}

impl BinarySensorEntity for OnlineStatus {
    fn is_on(&self) -> Option<bool> {
        self.statflag().map(|flags| flags & VALUE_ONLINE != 0)
    }
}

/// Build the online status sensor for a config entry
pub fn setup_entities(entry: &ConfigEntry, coordinator: StatusHandle) -> OnlineStatus {
    let device_id = entry.unique_id.as_deref().unwrap_or(&entry.entry_id);
    OnlineStatus::new(device_id, coordinator)
}
