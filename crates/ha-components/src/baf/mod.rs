//! Big Ass Fans integration
//!
//! Only the auto comfort climate platform lives here. Device discovery and
//! the device transport are handled elsewhere; this module works with an
//! already connected [`BafDevice`].

pub mod climate;
pub mod device;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

pub use climate::{BafAutoComfort, ClimateAttrs, HvacAction, HvacMode};
pub use device::{BafDevice, BafDeviceState};

pub const DOMAIN: &str = "baf";

/// Runtime data of a set up BAF entry
pub struct BafData {
    pub device: Arc<BafDevice>,
}

/// Climate entities of a set up entry, each with its update task
pub struct BafClimatePlatform {
    pub entities: Vec<Arc<BafAutoComfort>>,
    listeners: Vec<JoinHandle<()>>,
}

impl BafClimatePlatform {
    /// Stop following device updates
    pub fn unload(self) {
        for listener in self.listeners {
            listener.abort();
        }
    }
}

/// Set up the auto comfort entity. Devices without a fan get none.
pub fn setup_entry(data: &BafData) -> BafClimatePlatform {
    let device = &data.device;
    if !device.has_fan() {
        debug!(device = %device.name(), "No fan, skipping auto comfort");
        return BafClimatePlatform {
            entities: Vec::new(),
            listeners: Vec::new(),
        };
    }

    let entity = Arc::new(BafAutoComfort::new(
        device.clone(),
        format!("{} Auto Comfort", device.name()),
    ));
    let listener = entity.listen();

    BafClimatePlatform {
        entities: vec![entity],
        listeners: vec![listener],
    }
}
