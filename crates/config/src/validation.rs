use crate::ConfigResult;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a count is within (0, max]
    pub fn validate_count(count: usize, field_name: &str, max: usize) -> ConfigResult<()> {
        if count == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > max {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to {max}"
            )));
        }
        Ok(())
    }

    /// Validate that an interval or timeout is positive
    pub fn validate_positive_duration(value: u64, field_name: &str) -> ConfigResult<()> {
        if value == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        Ok(())
    }

    /// Validate that a ratio lies in [0, 1]
    pub fn validate_ratio(value: f64, field_name: &str) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be within [0, 1], got {value}"
            )));
        }
        Ok(())
    }

    /// Validate that a factor is strictly positive and finite
    pub fn validate_positive(value: f64, field_name: &str) -> ConfigResult<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0, got {value}"
            )));
        }
        Ok(())
    }
}
