//! Error types for SBTE

use thiserror::Error;

/// Core SBTE errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SbteError {
    /// A number was mandatory but the input was not a finite number
    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    /// Unit index outside `0..=5`
    #[error("Invalid unit index: {0}")]
    InvalidUnitIndex(usize),

    /// A definition token could not be parsed and was replaced by its default
    #[error("Malformed definition: {0}")]
    MalformedDefinition(String),

    /// Two routines of one scheduler have overlapping on-intervals
    #[error("Schedule overlap: on-intervals of two routines intersect")]
    ScheduleOverlap,
}

/// Result type for SBTE operations
pub type SbteResult<T> = Result<T, SbteError>;

/// Reject NaN and infinities where a number is mandatory
pub fn check_number(value: f64) -> SbteResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SbteError::InvalidNumber(value.to_string()))
    }
}

/// Parse text that must hold a finite number
pub fn parse_number(text: &str) -> SbteResult<f64> {
    let trimmed = text.trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(SbteError::InvalidNumber(trimmed.to_string())),
    }
}
