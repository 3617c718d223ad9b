//! Constants for the apcupsd integration

use std::time::Duration;

pub const DOMAIN: &str = "apcupsd";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3551;
/// NIS connect + read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const SCAN_INTERVAL: Duration = Duration::from_secs(60);

pub const CONF_HOST: &str = "host";
pub const CONF_PORT: &str = "port";
pub const CONF_SENSORS: &str = "sensors";

/// Status bitmask field
pub const KEY_STATUS: &str = "STATFLAG";
/// Bit of `STATFLAG` set while the UPS runs on line power
pub const VALUE_ONLINE: u32 = 0x08;

pub const KEY_MODEL: &str = "MODEL";
pub const KEY_SERIALNO: &str = "SERIALNO";

/// Name prefix when the UPS doesn't report its model
pub const DEFAULT_MODEL: &str = "UPS";

pub const ERROR_CANNOT_CONNECT: &str = "cannot_connect";
