//! Entity traits
//!
//! Integrations implement [`Entity`] (and the platform trait on top of it)
//! and the host renders them into an [`EntityState`] whenever a coordinator
//! or device reports new data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// State value for an entity that can't be reached
pub const STATE_UNAVAILABLE: &str = "unavailable";
/// State value for an entity whose value is not known
pub const STATE_UNKNOWN: &str = "unknown";
pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";

pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";
pub const ATTR_ICON: &str = "icon";
pub const ATTR_UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";

/// Rendered state of an entity at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub state: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl EntityState {
    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    pub fn is_unknown(&self) -> bool {
        self.state == STATE_UNKNOWN
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Base entity contract
pub trait Entity: Send + Sync {
    /// Display name
    fn name(&self) -> Option<String>;

    /// Stable id used by the entity registry
    fn unique_id(&self) -> Option<String> {
        None
    }

    /// Material Design icon, e.g. `mdi:flash`
    fn icon(&self) -> Option<String> {
        None
    }

    fn available(&self) -> bool {
        true
    }

    fn entity_registry_enabled_default(&self) -> bool {
        true
    }

    /// Current state value, `None` when unknown
    fn state(&self) -> Option<String>;

    fn unit_of_measurement(&self) -> Option<String> {
        None
    }

    /// Platform specific attributes
    fn state_attributes(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    /// Render state and attributes the way the state machine stores them
    fn render(&self) -> EntityState {
        let state = if !self.available() {
            STATE_UNAVAILABLE.to_string()
        } else {
            self.state().unwrap_or_else(|| STATE_UNKNOWN.to_string())
        };

        let mut attributes = self.state_attributes();
        if let Some(unit) = self.unit_of_measurement() {
            attributes.insert(ATTR_UNIT_OF_MEASUREMENT.to_string(), json!(unit));
        }
        if let Some(name) = self.name() {
            attributes.insert(ATTR_FRIENDLY_NAME.to_string(), json!(name));
        }
        if let Some(icon) = self.icon() {
            attributes.insert(ATTR_ICON.to_string(), json!(icon));
        }

        EntityState { state, attributes }
    }
}

/// Sensor platform: a value plus its unit
pub trait SensorEntity: Entity {
    fn native_value(&self) -> Option<String>;

    fn native_unit_of_measurement(&self) -> Option<String>;
}

/// Binary sensor platform: on/off
pub trait BinarySensorEntity: Entity {
    fn is_on(&self) -> Option<bool>;
}

/// State value of a binary sensor
pub fn binary_state(is_on: Option<bool>) -> Option<String> {
    is_on.map(|on| if on { STATE_ON } else { STATE_OFF }.to_string())
}
