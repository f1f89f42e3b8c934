//! Error types for the admission core.
//!
//! Cache, limiter and metrics operations are total; the only fallible step is
//! building a component from configuration.

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn must_be_positive(field: &str, value: impl ToString) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        }
    }
}

/// Master error type for the core crate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err: CoreError = ConfigError::must_be_positive("cache_max_entries", 0).into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid value for cache_max_entries: 0 - must be greater than zero"
        );
    }
}
