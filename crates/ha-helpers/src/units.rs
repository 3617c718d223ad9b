//! Units of measurement

pub const PERCENTAGE: &str = "%";

pub const VOLT: &str = "V";
pub const ELECTRIC_CURRENT_AMPERE: &str = "A";
pub const VOLT_AMPERE: &str = "VA";
pub const POWER_WATT: &str = "W";
pub const FREQUENCY_HERTZ: &str = "Hz";

pub const TEMP_CELSIUS: &str = "°C";

pub const TIME_SECONDS: &str = "s";
pub const TIME_MINUTES: &str = "min";
