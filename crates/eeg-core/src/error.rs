//! Error handling for the EEG pipeline
//!
//! Configuration problems are fatal to the configuring call. Per-sample edge
//! cases (zero readings, rejected threshold updates) are handled locally and
//! never surface here.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error type shared by all pipeline crates
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// Malformed filter or detector configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Description of the configuration error
        reason: String,
    },

    /// Sample does not carry exactly one value per channel
    #[error("Malformed sample: expected {expected} channel values, got {actual}")]
    MalformedSample {
        /// Required channel count
        expected: usize,
        /// Number of values received
        actual: usize,
    },

    /// Signal too short for zero-phase padding
    #[error("Signal too short: {length} samples, need more than {required}")]
    SignalTooShort {
        /// Provided signal length
        length: usize,
        /// Padding length that must be exceeded
        required: usize,
    },

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Shorthand for configuration errors
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        PipelineError::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// True for errors raised while validating configuration
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidConfiguration { .. } | PipelineError::Json(_)
        )
    }
}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::error::PipelineError::invalid_config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = PipelineError::MalformedSample {
            expected: 8,
            actual: 5,
        };
        let display = format!("{}", error);
        assert!(display.contains("Malformed sample"));
        assert!(display.contains('8'));
        assert!(display.contains('5'));
    }

    #[test]
    fn test_config_error_macro() {
        let error = config_error!("cutoff {} Hz out of range", 130.0);
        assert!(error.is_configuration_error());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: cutoff 130 Hz out of range"
        );
    }

    #[test]
    fn test_json_error_is_configuration() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: PipelineError = parse.into();
        assert!(error.is_configuration_error());
    }
}
