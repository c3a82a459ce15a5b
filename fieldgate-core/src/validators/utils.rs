//! Shared validation helpers

use crate::errors::{ValidationError, ValidationResult};
use crate::traits::Validatable;

/// Reject non-finite values, then anything outside `[min, max]`
pub fn check_range(value: f64, min: f64, max: f64) -> ValidationResult<()> {
    if !value.is_valid() {
        return Err(ValidationError::InvalidValue);
    }

    if value < min || value > max {
        Err(ValidationError::OutOfRange { value, min, max })
    } else {
        Ok(())
    }
}

/// Order a pair so that `min <= max`
pub fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a > b {
        (b, a)
    } else {
        (a, b)
    }
}
