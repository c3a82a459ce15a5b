//! Whole-update validation
//!
//! Applies the per-reading validators to every reading an [`EdgeUpdate`]
//! carries. Absent readings are never violations.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ValidationError, ValidationResult};
use crate::traits::Validator;
use crate::update::{EdgeUpdate, Reading};

use super::{HumidityValidator, ReadingRange, TemperatureValidator};

/// Plausibility range per reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingRanges {
    /// Soil temperature, °C
    pub soil_temp: ReadingRange,
    /// Air temperature, °C
    pub air_temp: ReadingRange,
    /// Air humidity, %
    pub air_humidity: ReadingRange,
}

impl Default for ReadingRanges {
    fn default() -> Self {
        Self {
            soil_temp: TemperatureValidator::soil().range(),
            air_temp: TemperatureValidator::air().range(),
            air_humidity: HumidityValidator::default().range(),
        }
    }
}

impl ReadingRanges {
    /// Range configured for `reading`
    pub fn get(&self, reading: Reading) -> ReadingRange {
        match reading {
            Reading::SoilTemp => self.soil_temp,
            Reading::AirTemp => self.air_temp,
            Reading::AirHumidity => self.air_humidity,
        }
    }
}

/// One implausible reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingViolation {
    /// Which reading
    pub reading: Reading,
    /// Why it failed
    pub error: ValidationError,
}

impl fmt::Display for ReadingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reading, self.error)
    }
}

/// Validator set for a complete update
#[derive(Debug, Clone)]
pub struct ReadingValidator {
    soil: TemperatureValidator,
    air: TemperatureValidator,
    humidity: HumidityValidator,
}

impl Default for ReadingValidator {
    fn default() -> Self {
        Self::from_ranges(&ReadingRanges::default())
    }
}

impl ReadingValidator {
    /// Validators built from configured ranges
    pub fn from_ranges(ranges: &ReadingRanges) -> Self {
        Self {
            soil: ranges.soil_temp.into(),
            air: ranges.air_temp.into(),
            humidity: ranges.air_humidity.into(),
        }
    }

    /// Validate a single reading
    pub fn validate_reading(&self, reading: Reading, value: f64) -> ValidationResult<()> {
        match reading {
            Reading::SoilTemp => self.soil.validate(value),
            Reading::AirTemp => self.air.validate(value),
            Reading::AirHumidity => self.humidity.validate(value),
        }
    }

    /// Every violation in `update`, empty when all present readings pass
    pub fn check(&self, update: &EdgeUpdate) -> Vec<ReadingViolation> {
        update
            .readings()
            .filter_map(|(reading, value)| {
                self.validate_reading(reading, value)
                    .err()
                    .map(|error| ReadingViolation { reading, error })
            })
            .collect()
    }
}
