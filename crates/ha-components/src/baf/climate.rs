//! Auto comfort as a climate entity
//!
//! Auto comfort lets the fan pick its own speed to hold a target
//! temperature. It maps onto a climate entity with two modes: `fan_only`
//! while auto comfort is on and `off` otherwise.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use ha_helpers::units::TEMP_CELSIUS;
use ha_helpers::Entity;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::debug;

use super::device::BafDevice;

/// Supports setting a target temperature
pub const SUPPORT_TARGET_TEMPERATURE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Off,
    FanOnly,
}

impl HvacMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HvacMode::Off => "off",
            HvacMode::FanOnly => "fan_only",
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacAction {
    Off,
    Fan,
}

/// Attributes recomputed from the device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClimateAttrs {
    pub hvac_mode: Option<HvacMode>,
    pub hvac_action: Option<HvacAction>,
    pub target_temperature: Option<f64>,
    pub current_temperature: Option<f64>,
}

pub struct BafAutoComfort {
    device: Arc<BafDevice>,
    name: String,
    attrs: RwLock<ClimateAttrs>,
}

impl BafAutoComfort {
    pub const HVAC_MODES: [HvacMode; 2] = [HvacMode::Off, HvacMode::FanOnly];

    pub fn new(device: Arc<BafDevice>, name: impl Into<String>) -> Self {
        let entity = Self {
            device,
            name: name.into(),
            attrs: RwLock::new(ClimateAttrs::default()),
        };
        entity.update_attrs();
        entity
    }

    pub fn supported_features(&self) -> u32 {
        SUPPORT_TARGET_TEMPERATURE
    }

    pub fn temperature_unit(&self) -> &'static str {
        TEMP_CELSIUS
    }

    pub fn hvac_modes(&self) -> &'static [HvacMode] {
        &Self::HVAC_MODES
    }

    pub fn attrs(&self) -> ClimateAttrs {
        self.attrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn hvac_mode(&self) -> Option<HvacMode> {
        self.attrs().hvac_mode
    }

    pub fn hvac_action(&self) -> Option<HvacAction> {
        self.attrs().hvac_action
    }

    pub fn target_temperature(&self) -> Option<f64> {
        self.attrs().target_temperature
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.attrs().current_temperature
    }

    /// Recompute the attributes from the device
    pub fn update_attrs(&self) {
        let device = self.device.state();
        let attrs = ClimateAttrs {
            hvac_mode: Some(if device.auto_comfort_enable {
                HvacMode::FanOnly
            } else {
                HvacMode::Off
            }),
            hvac_action: Some(if device.speed > 0 {
                HvacAction::Fan
            } else {
                HvacAction::Off
            }),
            target_temperature: device.comfort_ideal_temperature,
            current_temperature: device.temperature,
        };
        *self.attrs.write().unwrap_or_else(PoisonError::into_inner) = attrs;
    }

    pub fn set_hvac_mode(&self, hvac_mode: HvacMode) {
        debug!(entity = %self.name, %hvac_mode, "Setting HVAC mode");
        self.device
            .set_auto_comfort_enable(hvac_mode == HvacMode::FanOnly);
    }

    /// Set the target temperature, turning auto comfort on first if needed
    pub fn set_temperature(&self, temperature: f64) {
        if !self.device.auto_comfort_enable() {
            self.device.set_auto_comfort_enable(true);
        }
        self.device.set_comfort_ideal_temperature(temperature);
    }

    /// Recompute attributes whenever the device reports a change.
    ///
    /// Ends when the device goes away.
    pub fn listen(self: &Arc<Self>) -> JoinHandle<()> {
        let entity = Arc::downgrade(self);
        let mut updates = self.device.subscribe();
        // Changes made before subscribing count as already seen.
        self.update_attrs();

        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let Some(entity) = entity.upgrade() else {
                    break;
                };
                entity.update_attrs();
            }
        })
    }
}

impl Entity for BafAutoComfort {
    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }

    fn unique_id(&self) -> Option<String> {
        Some(format!("{}_auto_comfort", self.device.dns_sd_uuid()))
    }

    fn state(&self) -> Option<String> {
        self.hvac_mode().map(|mode| mode.as_str().to_string())
    }

    fn state_attributes(&self) -> HashMap<String, Value> {
        let attrs = self.attrs();
        HashMap::from([
            ("hvac_modes".to_string(), json!(Self::HVAC_MODES)),
            ("hvac_action".to_string(), json!(attrs.hvac_action)),
            ("current_temperature".to_string(), json!(attrs.current_temperature)),
            ("temperature".to_string(), json!(attrs.target_temperature)),
            ("supported_features".to_string(), json!(self.supported_features())),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::super::device::BafDeviceState;
    use super::*;
    use std::time::Duration;

    fn fan() -> (Arc<BafDevice>, BafAutoComfort) {
        let mut state = BafDeviceState::new("Living Room", "abc");
        state.temperature = Some(24.5);
        state.comfort_ideal_temperature = Some(23.0);
        let device = BafDevice::new(state);
        let climate = BafAutoComfort::new(device.clone(), "Living Room Auto Comfort");
        (device, climate)
    }

    #[test]
    fn test_initial_attrs() {
        let (_device, climate) = fan();

        assert_eq!(climate.hvac_mode(), Some(HvacMode::Off));
        assert_eq!(climate.hvac_action(), Some(HvacAction::Off));
        assert_eq!(climate.target_temperature(), Some(23.0));
        assert_eq!(climate.current_temperature(), Some(24.5));
        assert_eq!(climate.temperature_unit(), "°C");
        assert_eq!(climate.hvac_modes(), &[HvacMode::Off, HvacMode::FanOnly]);
        assert_eq!(climate.state().as_deref(), Some("off"));
    }

    #[test]
    fn test_set_hvac_mode_toggles_auto_comfort() {
        let (device, climate) = fan();

        climate.set_hvac_mode(HvacMode::FanOnly);
        assert!(device.auto_comfort_enable());

        climate.set_hvac_mode(HvacMode::Off);
        assert!(!device.auto_comfort_enable());
    }

    #[test]
    fn test_set_temperature_turns_auto_comfort_on() {
        let (device, climate) = fan();
        assert!(!device.auto_comfort_enable());

        climate.set_temperature(21.5);
        climate.update_attrs();

        assert!(device.auto_comfort_enable());
        assert_eq!(device.state().comfort_ideal_temperature, Some(21.5));
        assert_eq!(climate.hvac_mode(), Some(HvacMode::FanOnly));
        assert_eq!(climate.target_temperature(), Some(21.5));
    }

    #[test]
    fn test_action_follows_speed() {
        let (device, climate) = fan();

        device.update(|state| state.speed = 3);
        climate.update_attrs();
        assert_eq!(climate.hvac_action(), Some(HvacAction::Fan));

        let attrs = climate.state_attributes();
        assert_eq!(attrs["hvac_action"], json!("fan"));
        assert_eq!(attrs["hvac_modes"], json!(["off", "fan_only"]));
    }

    #[tokio::test]
    async fn test_listen_picks_up_change_made_before_subscribing() {
        let (device, climate) = fan();
        let climate = Arc::new(climate);
        assert_eq!(climate.hvac_mode(), Some(HvacMode::Off));

        device.update(|state| state.auto_comfort_enable = true);
        let _task = climate.listen();

        assert_eq!(climate.hvac_mode(), Some(HvacMode::FanOnly));
    }

    #[tokio::test]
    async fn test_listen_recomputes_on_device_change() {
        let (device, climate) = fan();
        let climate = Arc::new(climate);
        let _task = climate.listen();

        device.update(|state| {
            state.auto_comfort_enable = true;
            state.speed = 2;
        });

        for _ in 0..50 {
            if climate.hvac_mode() == Some(HvacMode::FanOnly) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(climate.hvac_mode(), Some(HvacMode::FanOnly));
        assert_eq!(climate.hvac_action(), Some(HvacAction::Fan));
    }
}
