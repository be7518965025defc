//! Payload validation errors and shared field validators.

use validator::{ValidationError, ValidationErrors};

/// A draft, patch or cursor payload failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidPayload(pub String);

impl InvalidPayload {
    /// Build an error from a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<ValidationErrors> for InvalidPayload {
    fn from(errors: ValidationErrors) -> Self {
        Self(errors.to_string())
    }
}

/// Coordinates and sizes must be finite. `Copy` fields arrive by value.
pub(crate) fn finite(value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::new("finite"))
    }
}

/// Widths, heights and stroke widths must be finite and non-negative.
pub(crate) fn extent(value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::new("extent"))
    }
}
