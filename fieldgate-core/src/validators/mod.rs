//! Reading Plausibility Validators
//!
//! ## Overview
//!
//! Nodes are cheap and sit outdoors. A disconnected DS18B20 reports
//! -127°C, a DHT22 with a failed checksum can report 6553.5%, and a
//! condensing humidity sensor drifts past 100%. None of these are readings,
//! and forwarding them to the broker would trip every downstream alert.
//!
//! | Reading        | Validator                      | Default range  |
//! |----------------|--------------------------------|----------------|
//! | `soil_temp`    | [`TemperatureValidator::soil`] | -55 to 125 °C  |
//! | `air_temp`     | [`TemperatureValidator::air`]  | -40 to 80 °C   |
//! | `air_humidity` | [`HumidityValidator`]          | 0 to 100 %     |
//!
//! Each check is a range check after rejecting non-finite values; bounds are
//! inclusive. [`ReadingValidator`] applies all three to one update and
//! reports every violation, so the caller decides between warning and
//! rejecting.

use serde::{Deserialize, Serialize};

pub mod humidity;
pub mod readings;
pub mod temperature;
pub mod utils;

pub use humidity::HumidityValidator;
pub use readings::{ReadingRanges, ReadingValidator, ReadingViolation};
pub use temperature::TemperatureValidator;

/// Inclusive plausibility bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadingRange {
    /// Lowest plausible value
    pub min: f64,
    /// Highest plausible value
    pub max: f64,
}

impl ReadingRange {
    /// Whether `min` is strictly below `max`
    pub fn is_ordered(&self) -> bool {
        self.min < self.max
    }
}
