//! In-process Big Ass Fans device
//!
//! Holds the device properties the integration reads and writes. Every
//! change is published on a watch channel, which is how entities learn that
//! they need to recompute their attributes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// Device properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BafDeviceState {
    pub name: String,
    pub dns_sd_uuid: String,
    pub has_fan: bool,
    pub auto_comfort_enable: bool,
    /// Target temperature for auto comfort, °C
    pub comfort_ideal_temperature: Option<f64>,
    /// Measured temperature, °C
    pub temperature: Option<f64>,
    /// Fan speed, 0 when stopped
    pub speed: u8,
}

impl BafDeviceState {
    pub fn new(name: impl Into<String>, dns_sd_uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dns_sd_uuid: dns_sd_uuid.into(),
            has_fan: true,
            auto_comfort_enable: false,
            comfort_ideal_temperature: None,
            temperature: None,
            speed: 0,
        }
    }
}

pub struct BafDevice {
    state: watch::Sender<BafDeviceState>,
}

impl BafDevice {
    pub fn new(state: BafDeviceState) -> Arc<Self> {
        let (state, _) = watch::channel(state);
        Arc::new(Self { state })
    }

    /// Current properties
    pub fn state(&self) -> BafDeviceState {
        self.state.borrow().clone()
    }

    pub fn name(&self) -> String {
        self.state.borrow().name.clone()
    }

    pub fn dns_sd_uuid(&self) -> String {
        self.state.borrow().dns_sd_uuid.clone()
    }

    pub fn has_fan(&self) -> bool {
        self.state.borrow().has_fan
    }

    pub fn auto_comfort_enable(&self) -> bool {
        self.state.borrow().auto_comfort_enable
    }

    /// Notified after every change
    pub fn subscribe(&self) -> watch::Receiver<BafDeviceState> {
        self.state.subscribe()
    }

    /// Apply `change`; subscribers are notified only if something changed
    pub fn update(&self, change: impl FnOnce(&mut BafDeviceState)) {
        let changed = self.state.send_if_modified(|state| {
            let before = state.clone();
            change(state);
            *state != before
        });
        if changed {
            debug!(device = %self.name(), "Device state changed");
        }
    }

    pub fn set_auto_comfort_enable(&self, enable: bool) {
        self.update(|state| state.auto_comfort_enable = enable);
    }

    pub fn set_comfort_ideal_temperature(&self, temperature: f64) {
        self.update(|state| state.comfort_ideal_temperature = Some(temperature));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_changes_notify_subscribers() {
        let device = BafDevice::new(BafDeviceState::new("Living Room", "abc"));
        let mut updates = device.subscribe();

        device.set_auto_comfort_enable(true);
        assert!(updates.has_changed().unwrap());
        assert!(updates.borrow_and_update().auto_comfort_enable);

        // Writing the same value again is not a change.
        device.set_auto_comfort_enable(true);
        assert!(!updates.has_changed().unwrap());
    }
}
