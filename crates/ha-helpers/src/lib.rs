//! Integration helpers
//!
//! The pieces of the host every polling integration builds on: the data
//! update coordinator, the entity traits the platforms implement, and the
//! shared unit constants.

pub mod entity;
pub mod units;
pub mod update_coordinator;

pub use entity::{
    binary_state, BinarySensorEntity, Entity, EntityState, SensorEntity, STATE_OFF, STATE_ON,
    STATE_UNAVAILABLE, STATE_UNKNOWN,
};
pub use update_coordinator::{
    CoordinatorHandle, DataUpdateCoordinator, Listener, ListenerId, UpdateFailed, UpdateMethod,
};
