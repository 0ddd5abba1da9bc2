//! Configuration Error Types
//!
//! Errors raised while loading and validating [`TriageConfig`](super::TriageConfig).
//! Validation collects every problem before failing so an operator sees the
//! whole list at once.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Explicitly requested configuration file does not exist
    #[error("Configuration file not found: {path}")]
    ConfigFileNotFound { path: PathBuf },

    /// Invalid TOML syntax in configuration file
    #[error("Invalid TOML syntax in '{file_path}': {error}")]
    InvalidToml { file_path: String, error: String },

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Environment override could not be applied
    #[error("Environment override error for key {key}: {reason}")]
    EnvironmentOverrideError { key: String, reason: String },

    /// Layered sources could not be merged or deserialized
    #[error("Failed to build configuration: {error}")]
    ConfigMergeError { error: String },

    /// Every problem found by validation
    #[error("Configuration validation failed: {}", .errors.join("; "))]
    ValidationFailed { errors: Vec<String> },
}

impl ConfigurationError {
    pub fn config_file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ConfigFileNotFound { path: path.into() }
    }

    pub fn invalid_toml<P: Into<String>, E: std::fmt::Display>(file_path: P, error: E) -> Self {
        Self::InvalidToml {
            file_path: file_path.into(),
            error: error.to_string(),
        }
    }

    pub fn missing_required_field<F: Into<String>, C: Into<String>>(field: F, context: C) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    pub fn environment_override_error<K: Into<String>, R: std::fmt::Display>(
        key: K,
        reason: R,
    ) -> Self {
        Self::EnvironmentOverrideError {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn merge_error<E: std::fmt::Display>(error: E) -> Self {
        Self::ConfigMergeError {
            error: error.to_string(),
        }
    }

    pub fn validation_failed(errors: Vec<String>) -> Self {
        Self::ValidationFailed { errors }
    }

    /// Individual problems carried by a validation failure
    pub fn problems(&self) -> Vec<String> {
        match self {
            Self::ValidationFailed { errors } => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        match error {
            config::ConfigError::NotFound(path) => Self::ConfigFileNotFound { path: path.into() },
            config::ConfigError::FileParse { uri, cause } => Self::InvalidToml {
                file_path: uri.unwrap_or_else(|| "<unknown>".to_string()),
                error: cause.to_string(),
            },
            other => Self::merge_error(other),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_required_field_error() {
        let error =
            ConfigurationError::missing_required_field("database.host", "database configuration");

        let error_string = error.to_string();
        assert!(error_string.contains("Missing required configuration field 'database.host'"));
        assert!(error_string.contains("database configuration"));
    }

    #[test]
    fn test_invalid_value_error() {
        let error = ConfigurationError::invalid_value(
            "database.pool_size",
            "0",
            "pool size must be greater than 0",
        );

        let error_string = error.to_string();
        assert!(error_string.contains("Invalid value '0' for field 'database.pool_size'"));
        assert!(error_string.contains("pool size must be greater than 0"));
    }

    #[test]
    fn test_validation_failure_lists_every_problem() {
        let error = ConfigurationError::validation_failed(vec![
            "api.github_token is required".into(),
            "database.host is required".into(),
        ]);
        let error_string = error.to_string();
        assert!(error_string.contains("github_token"));
        assert!(error_string.contains("database.host"));
        assert_eq!(error.problems().len(), 2);
    }
}
