use std::collections::TryReserveError;

use thiserror::Error;

// -------------------------------------------------------------------------------------------------

/// Errors reported by a [`StretchSession`](crate::StretchSession) and its helpers.
///
/// All errors are raised before the engine is invoked, so a failed call never changes the
/// session's state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("unsupported channel count {0}: expected 1..={max}", max = crate::MAX_CHANNELS)]
    UnsupportedChannelCount(usize),
    #[error("{name} {value} is out of range {min}..={max}")]
    OutOfRange {
        name: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("invalid buffer shape: {axis} axis has length {actual}, expected {expected}")]
    InvalidShape {
        axis: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error("process size {size} exceeds the configured maximum of {max} samples")]
    ProcessSizeExceeded { size: usize, max: usize },
    #[error("failed to allocate audio buffer: {0}")]
    Allocation(#[from] TryReserveError),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        assert_eq!(
            Error::InvalidParameter {
                name: "time ratio",
                value: -1.0
            }
            .to_string(),
            "invalid time ratio: -1"
        );
        assert_eq!(
            Error::UnsupportedChannelCount(9).to_string(),
            "unsupported channel count 9: expected 1..=8"
        );
        assert_eq!(
            Error::InvalidShape {
                axis: "channel",
                expected: 3,
                actual: 2
            }
            .to_string(),
            "invalid buffer shape: channel axis has length 2, expected 3"
        );
    }

    #[test]
    fn allocation_errors_convert() {
        let error = Vec::<f32>::new().try_reserve(usize::MAX).unwrap_err();
        assert!(matches!(Error::from(error), Error::Allocation(_)));
    }
}
