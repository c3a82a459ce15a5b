//! Temperature validator
//!
//! Range checks against what the probe can physically report. The node
//! reads two probes with different envelopes:
//! - soil: DS18B20 style waterproof probe, -55°C to 125°C
//! - air: DHT22 style combined sensor, -40°C to 80°C

use crate::{errors::ValidationResult, traits::Validator};

use super::utils;
use super::ReadingRange;

/// Temperature validator for Celsius readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureValidator {
    /// Minimum valid temperature in Celsius
    min_celsius: f64,

    /// Maximum valid temperature in Celsius
    max_celsius: f64,
}

impl TemperatureValidator {
    /// Create validator with custom limits
    pub fn new_with_limits(min: f64, max: f64) -> Self {
        let (min, max) = utils::ordered(min, max);

        Self {
            min_celsius: min.max(-273.15),
            max_celsius: max,
        }
    }

    /// Soil probe envelope
    pub fn soil() -> Self {
        Self::new_with_limits(-55.0, 125.0)
    }

    /// Air sensor envelope
    pub fn air() -> Self {
        Self::new_with_limits(-40.0, 80.0)
    }

    /// Limits as a configurable range
    pub fn range(&self) -> ReadingRange {
        ReadingRange {
            min: self.min_celsius,
            max: self.max_celsius,
        }
    }
}

impl From<ReadingRange> for TemperatureValidator {
    fn from(range: ReadingRange) -> Self {
        Self::new_with_limits(range.min, range.max)
    }
}

impl Validator for TemperatureValidator {
    type Value = f64;

    fn validate(&self, value: Self::Value) -> ValidationResult<()> {
        utils::check_range(value, self.min_celsius, self.max_celsius)
    }
}
