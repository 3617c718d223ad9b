//! Home Assistant Components
//!
//! Integrations built on the config entry, config flow and coordinator
//! helpers:
//!
//! - [`apcupsd`] - UPS status from an apcupsd Network Information Server
//! - [`baf`] - Big Ass Fans auto comfort as a climate entity

pub mod apcupsd;
pub mod baf;

pub use apcupsd::{ApcUpsdConfig, ApcUpsdConfigFlow, ApcUpsdIntegration};
pub use baf::{BafAutoComfort, BafDevice};
