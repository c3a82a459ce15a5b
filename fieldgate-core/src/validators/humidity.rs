//! Relative humidity validator
//!
//! Relative humidity is bounded by definition: 0% is perfectly dry air and
//! anything above 100% is supersaturation, which capacitive sensors report
//! only when condensation has shorted them.

use crate::{errors::ValidationResult, traits::Validator};

use super::utils;
use super::ReadingRange;

/// Humidity validator for percentage readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HumidityValidator {
    min_percent: f64,
    max_percent: f64,
}

impl Default for HumidityValidator {
    fn default() -> Self {
        Self {
            min_percent: 0.0,
            max_percent: 100.0,
        }
    }
}

impl HumidityValidator {
    /// Create validator with custom limits, clamped to 0-100%
    pub fn new_with_limits(min: f64, max: f64) -> Self {
        let (min, max) = utils::ordered(min, max);
        Self {
            min_percent: min.max(0.0),
            max_percent: max.min(100.0),
        }
    }

    /// Limits as a configurable range
    pub fn range(&self) -> ReadingRange {
        ReadingRange {
            min: self.min_percent,
            max: self.max_percent,
        }
    }
}

impl From<ReadingRange> for HumidityValidator {
    fn from(range: ReadingRange) -> Self {
        Self::new_with_limits(range.min, range.max)
    }
}

impl Validator for HumidityValidator {
    type Value = f64;

    fn validate(&self, value: Self::Value) -> ValidationResult<()> {
        utils::check_range(value, self.min_percent, self.max_percent)
    }
}
