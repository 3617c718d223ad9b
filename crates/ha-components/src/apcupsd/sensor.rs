//! apcupsd sensors
//!
//! One sensor per selected status field. Values are read from the
//! coordinator's current snapshot on every access; units either come from
//! the field's description or are inferred from the value's suffix
//! (`"230.0 Volts"` is `230.0` in `V`).

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use ha_config_entries::ConfigEntry;
use ha_helpers::units::{
    ELECTRIC_CURRENT_AMPERE, FREQUENCY_HERTZ, PERCENTAGE, POWER_WATT, TEMP_CELSIUS, TIME_MINUTES,
    TIME_SECONDS, VOLT, VOLT_AMPERE,
};
use ha_helpers::{Entity, SensorEntity};
use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::entity::{ApcUpsdEntity, StatusHandle};

const ICON_INFO: &str = "mdi:information-outline";

/// Static metadata for one status field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorEntityDescription {
    /// Lowercase field name
    pub key: String,
    pub name: String,
    /// Declared unit; `None` means infer it from the value
    pub unit: Option<&'static str>,
    pub icon: &'static str,
}

impl SensorEntityDescription {
    /// Description for a field missing from [`SENSOR_TYPES`]
    pub fn generated(key: &str) -> Self {
        let key = key.to_lowercase();
        Self {
            name: title_case(&key),
            key,
            unit: None,
            icon: ICON_INFO,
        }
    }
}

/// Known status fields: key, name, unit, icon
pub const SENSOR_TYPES: &[(&str, &str, Option<&str>, &str)] = &[
    ("alarmdel", "Alarm Delay", None, "mdi:alarm"),
    ("ambtemp", "Ambient Temperature", None, "mdi:thermometer"),
    ("apc", "Status Data", None, ICON_INFO),
    ("apcmodel", "Model", None, ICON_INFO),
    ("badbatts", "Bad Batteries", None, ICON_INFO),
    ("battdate", "Battery Replaced", None, "mdi:calendar-clock"),
    ("battstat", "Battery Status", None, ICON_INFO),
    ("battv", "Battery Voltage", Some(VOLT), "mdi:flash"),
    ("bcharge", "Battery", Some(PERCENTAGE), "mdi:battery"),
    ("cable", "Cable Type", None, "mdi:ethernet-cable"),
    ("cumonbatt", "Total Time on Battery", None, "mdi:timer-outline"),
    ("date", "Status Date", None, "mdi:calendar-clock"),
    ("dipsw", "Dip Switch Settings", None, ICON_INFO),
    ("dlowbatt", "Low Battery Signal", None, "mdi:clock-alert"),
    ("driver", "Driver", None, ICON_INFO),
    ("dshutd", "Shutdown Delay", None, "mdi:timer-outline"),
    ("dwake", "Wake Delay", None, "mdi:timer-outline"),
    ("endapc", "Date and Time", None, "mdi:calendar-clock"),
    ("extbatts", "External Batteries", None, ICON_INFO),
    ("firmware", "Firmware Version", None, ICON_INFO),
    ("hitrans", "Transfer High", Some(VOLT), "mdi:flash"),
    ("hostname", "Hostname", None, ICON_INFO),
    ("humidity", "Ambient Humidity", Some(PERCENTAGE), "mdi:water-percent"),
    ("itemp", "Internal Temperature", Some(TEMP_CELSIUS), "mdi:thermometer"),
    ("lastxfer", "Last Transfer", None, "mdi:transfer"),
    ("linefail", "Input Voltage Status", None, ICON_INFO),
    ("linefreq", "Line Frequency", Some(FREQUENCY_HERTZ), ICON_INFO),
    ("linev", "Input Voltage", Some(VOLT), "mdi:flash"),
    ("loadpct", "Load", Some(PERCENTAGE), "mdi:gauge"),
    ("loadapnt", "Load Apparent Power", Some(PERCENTAGE), "mdi:gauge"),
    ("lotrans", "Transfer Low", Some(VOLT), "mdi:flash"),
    ("mandate", "Manufacture Date", None, "mdi:calendar"),
    ("masterupd", "Master Update", None, ICON_INFO),
    ("maxlinev", "Input Voltage High", Some(VOLT), "mdi:flash"),
    ("maxtime", "Battery Timeout", None, "mdi:timer-off-outline"),
    ("mbattchg", "Battery Shutdown", Some(PERCENTAGE), "mdi:battery-alert"),
    ("minlinev", "Input Voltage Low", Some(VOLT), "mdi:flash"),
    ("mintimel", "Shutdown Time", None, "mdi:timer-outline"),
    ("model", "Model", None, ICON_INFO),
    ("nombattv", "Battery Nominal Voltage", Some(VOLT), "mdi:flash"),
    ("nominv", "Nominal Input Voltage", Some(VOLT), "mdi:flash"),
    ("nomoutv", "Nominal Output Voltage", Some(VOLT), "mdi:flash"),
    ("nompower", "Nominal Output Power", Some(POWER_WATT), "mdi:flash"),
    ("nomapnt", "Nominal Apparent Power", Some(VOLT_AMPERE), "mdi:flash"),
    ("numxfers", "Transfer Count", None, "mdi:counter"),
    ("outcurnt", "Output Current", Some(ELECTRIC_CURRENT_AMPERE), "mdi:flash"),
    ("outputv", "Output Voltage", Some(VOLT), "mdi:flash"),
    ("reg1", "Register 1 Fault", None, ICON_INFO),
    ("reg2", "Register 2 Fault", None, ICON_INFO),
    ("reg3", "Register 3 Fault", None, ICON_INFO),
    ("retpct", "Restore Requirement", Some(PERCENTAGE), "mdi:battery-alert"),
    ("selftest", "Last Self Test", None, "mdi:calendar-clock"),
    ("sense", "Sensitivity", None, ICON_INFO),
    ("serialno", "Serial Number", None, ICON_INFO),
    ("starttime", "Startup Time", None, "mdi:calendar-clock"),
    ("statflag", "Status Flag", None, ICON_INFO),
    ("status", "Status", None, ICON_INFO),
    ("stesti", "Self Test Interval", None, ICON_INFO),
    ("timeleft", "Time Left", None, "mdi:clock-alert"),
    ("tonbatt", "Time on Battery", None, "mdi:timer-outline"),
    ("upsmode", "Mode", None, ICON_INFO),
    ("upsname", "Name", None, ICON_INFO),
    ("version", "Daemon Info", None, ICON_INFO),
    ("xoffbat", "Transfer from Battery", None, "mdi:transfer"),
    ("xoffbatt", "Transfer from Battery", None, "mdi:transfer"),
    ("xonbatt", "Transfer to Battery", None, "mdi:transfer"),
];

/// Value suffixes apcupsd appends and the unit each one means.
///
/// First match wins, so a suffix must come before any shorter suffix it
/// ends with.
pub const INFERRED_UNITS: &[(&str, &str)] = &[
    (" Percent Load Capacity", PERCENTAGE),
    (" Volt-Ampere", VOLT_AMPERE),
    (" Minutes", TIME_MINUTES),
    (" Seconds", TIME_SECONDS),
    (" Percent", PERCENTAGE),
    (" Volts", VOLT),
    (" Ampere", ELECTRIC_CURRENT_AMPERE),
    (" Watts", POWER_WATT),
    (" Hz", FREQUENCY_HERTZ),
    (" VA", VOLT_AMPERE),
    (" C", TEMP_CELSIUS),
];

/// Description of a known field, looked up case-insensitively
pub fn sensor_type(key: &str) -> Option<SensorEntityDescription> {
    let key = key.to_lowercase();
    SENSOR_TYPES
        .iter()
        .find(|(k, ..)| *k == key)
        .map(|&(key, name, unit, icon)| SensorEntityDescription {
            key: key.to_string(),
            name: name.to_string(),
            unit,
            icon,
        })
}

pub fn is_known_sensor(key: &str) -> bool {
    sensor_type(key).is_some()
}

fn unit_suffix(value: &str) -> Option<(&'static str, &'static str)> {
    INFERRED_UNITS
        .iter()
        .copied()
        .find(|(suffix, _)| value.ends_with(suffix))
}

/// Split a known unit suffix off `value`
pub fn infer_unit(value: &str) -> (String, Option<&'static str>) {
    match unit_suffix(value) {
        Some((suffix, unit)) => (value[..value.len() - suffix.len()].to_string(), Some(unit)),
        None => (value.to_string(), None),
    }
}

/// Python-style `str.title()`: upper-case the first letter of every run of
/// letters, lower-case the rest
fn title_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut prev_is_alpha = false;
    for c in key.chars() {
        if c.is_alphabetic() {
            if prev_is_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_alpha = true;
        } else {
            out.push(c);
            prev_is_alpha = false;
        }
    }
    out
}

/// Descriptions for the sensors of one config entry.
///
/// Built once at setup from [`SENSOR_TYPES`] plus generated descriptions for
/// any selected field the table doesn't know, then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct SensorTypes {
    descriptions: IndexMap<String, Arc<SensorEntityDescription>>,
}

impl SensorTypes {
    pub fn for_keys<S: AsRef<str>>(keys: &[S]) -> Self {
        let descriptions = keys
            .iter()
            .map(|key| {
                let key = key.as_ref();
                let description = sensor_type(key).unwrap_or_else(|| {
                    debug!("No description for sensor {}, generating one", key);
                    SensorEntityDescription::generated(key)
                });
                (description.key.clone(), Arc::new(description))
            })
            .collect();
        Self { descriptions }
    }

    pub fn get(&self, key: &str) -> Option<Arc<SensorEntityDescription>> {
        self.descriptions.get(&key.to_lowercase()).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SensorEntityDescription>> {
        self.descriptions.values()
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }
}

/// Sensor exposing one status field
pub struct ApcUpsdSensor {
    base: ApcUpsdEntity,
    description: Arc<SensorEntityDescription>,
    field: String,
    /// Matched suffix and its unit, kept once found
    inferred: OnceLock<(&'static str, &'static str)>,
}

impl ApcUpsdSensor {
    pub fn new(
        device_id: &str,
        coordinator: StatusHandle,
        description: Arc<SensorEntityDescription>,
    ) -> Self {
        let base = ApcUpsdEntity::new(
            device_id,
            coordinator,
            &description.name,
            description.icon,
        );
        Self {
            field: description.key.to_uppercase(),
            base,
            description,
            inferred: OnceLock::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.description.key
    }

    pub fn description(&self) -> &SensorEntityDescription {
        &self.description
    }

    /// Unit inferred from a value suffix, if one has been seen
    pub fn inferred_unit(&self) -> Option<&'static str> {
        self.inferred.get().map(|(_, unit)| *unit)
    }

    fn raw_value(&self) -> Option<String> {
        self.base.field(&self.field)
    }

    fn suffix_of(&self, raw: &str) -> Option<(&'static str, &'static str)> {
        if let Some(found) = self.inferred.get() {
            return Some(*found);
        }
        let found = unit_suffix(raw)?;
        Some(*self.inferred.get_or_init(|| found))
    }
}

impl Entity for ApcUpsdSensor {
    fn name(&self) -> Option<String> {
        Some(self.base.name().to_string())
    }

    fn unique_id(&self) -> Option<String> {
        Some(self.base.unique_id_for(self.key()))
    }

    fn icon(&self) -> Option<String> {
        Some(self.base.icon().to_string())
    }

    fn available(&self) -> bool {
        self.base.available()
    }

    fn state(&self) -> Option<String> {
        self.native_value()
    }

    fn unit_of_measurement(&self) -> Option<String> {
        self.native_unit_of_measurement()
    }

    fn state_attributes(&self) -> HashMap<String, Value> {
        HashMap::from([("field".to_string(), json!(self.field))])
    }
}

impl SensorEntity for ApcUpsdSensor {
    fn native_value(&self) -> Option<String> {
        let raw = self.raw_value()?;
        let value = match self.suffix_of(&raw) {
            Some((suffix, _)) => raw.strip_suffix(suffix).unwrap_or(raw.as_str()).to_string(),
            None => raw,
        };
        Some(value)
    }

    fn native_unit_of_measurement(&self) -> Option<String> {
        if let Some(unit) = self.description.unit {
            return Some(unit.to_string());
        }
        let raw = self.raw_value()?;
        self.suffix_of(&raw).map(|(_, unit)| unit.to_string())
    }
}

/// Build the sensors for a config entry.
///
/// Fields missing from the current snapshot are logged; their sensor is
/// still created and reports unknown.
pub fn setup_entities(
    entry: &ConfigEntry,
    coordinator: StatusHandle,
    sensor_types: &SensorTypes,
) -> Vec<Arc<ApcUpsdSensor>> {
    let device_id = entry.unique_id.as_deref().unwrap_or(&entry.entry_id);
    let status = coordinator.data();

    sensor_types
        .iter()
        .map(|description| {
            let field = description.key.to_uppercase();
            if !status.as_ref().is_some_and(|s| s.contains_key(&field)) {
                warn!(
                    "Sensor type: {} does not appear in the APCUPSd status output",
                    description.key
                );
            }
            Arc::new(ApcUpsdSensor::new(
                device_id,
                coordinator.clone(),
                description.clone(),
            ))
        })
        .collect()
}
