//! Core traits for validators
//!
//! Every per-reading plausibility check implements [`Validator`]. Kept
//! deliberately small: a value in, pass/fail out.

use crate::errors::ValidationResult;

/// Core validator trait - implement this for each sensor type
pub trait Validator {
    /// The type of value this validator handles
    type Value;

    /// Validate a single reading
    fn validate(&self, value: Self::Value) -> ValidationResult<()>;
}

/// Trait for values that can be validated
pub trait Validatable {
    /// Check if the value is physically valid (not NaN, infinite, etc)
    fn is_valid(&self) -> bool;
}

impl Validatable for f64 {
    fn is_valid(&self) -> bool {
        self.is_finite()
    }
}
