//! Configuration error types and validation traits.

use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A dimension that must be strictly positive was not.
    #[error("{name} must be greater than 0, got {value}")]
    NonPositive { name: String, value: f64 },

    /// A value fell outside its allowed range.
    #[error("{name} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Error indicating that a configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Error indicating that validation failed.
    #[error("validation failed: {message}")]
    ValidationFailed { message: String },
}

/// A trait for configuration types that can provide recommended defaults.
///
/// This trait complements ConfigValidator::get_defaults, allowing generic
/// code to talk about defaults without depending on validation details.
pub trait ConfigDefaults: Sized {
    /// Return the recommended defaults for this configuration type.
    fn defaults() -> Self;
}

impl<T: ConfigValidator> ConfigDefaults for T {
    fn defaults() -> Self {
        T::get_defaults()
    }
}

/// A trait for validating configuration parameters.
///
/// Every typed node configuration implements this trait; the graph loader calls
/// [`ConfigValidator::validate`] once per node before anything executes.
pub trait ConfigValidator {
    /// Validates the configuration.
    ///
    /// # Returns
    ///
    /// A Result indicating success or a ConfigError if validation fails.
    fn validate(&self) -> Result<(), ConfigError>;

    /// Returns the default configuration.
    fn get_defaults() -> Self
    where
        Self: Sized;

    /// Validates that a value is strictly positive.
    ///
    /// # Arguments
    ///
    /// * `name` - Name reported in the error.
    /// * `value` - The value to check.
    fn validate_positive(&self, name: &str, value: f64) -> Result<(), ConfigError> {
        if value > 0.0 {
            Ok(())
        } else {
            Err(ConfigError::NonPositive {
                name: name.to_string(),
                value,
            })
        }
    }

    /// Validates that a value is finite and not negative.
    fn validate_non_negative(&self, name: &str, value: f64) -> Result<(), ConfigError> {
        if value.is_finite() && value >= 0.0 {
            Ok(())
        } else {
            Err(ConfigError::OutOfRange {
                name: name.to_string(),
                value,
                min: 0.0,
                max: f64::INFINITY,
            })
        }
    }

    /// Validates a threshold in `[0, 1]`.
    fn validate_unit_interval(&self, name: &str, value: f64) -> Result<(), ConfigError> {
        if (0.0..=1.0).contains(&value) {
            Ok(())
        } else {
            Err(ConfigError::OutOfRange {
                name: name.to_string(),
                value,
                min: 0.0,
                max: 1.0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Window {
        width: f64,
        threshold: f64,
    }

    impl ConfigValidator for Window {
        fn validate(&self) -> Result<(), ConfigError> {
            self.validate_positive("width", self.width)?;
            self.validate_unit_interval("threshold", self.threshold)
        }

        fn get_defaults() -> Self {
            Self {
                width: 640.0,
                threshold: 0.5,
            }
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(Window::defaults().validate().is_ok());
    }

    #[test]
    fn test_non_positive_rejected() {
        let cfg = Window {
            width: 0.0,
            threshold: 0.5,
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("width"));
    }

    #[test]
    fn test_threshold_range() {
        let cfg = Window {
            width: 10.0,
            threshold: 1.5,
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange { .. })
        ));
    }
}
