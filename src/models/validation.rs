//! Field-level validation shared by the data models.
//!
//! Validation runs at the edges: when a message is decoded, when discovery builds a
//! profile and before the store accepts a record.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Maximum accepted length for a bug label
pub const MAX_LABEL_LENGTH: usize = 50;

/// Maximum accepted length for feedback comments
pub const MAX_COMMENT_LENGTH: usize = 2000;

/// Longest resolution time feedback may report, ten years in minutes
pub const MAX_RESOLUTION_MINUTES: i64 = 10 * 365 * 24 * 60;

/// Minimum trimmed length for a bug description
pub const MIN_DESCRIPTION_LENGTH: usize = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} must not be blank")]
    Blank { field: &'static str },

    #[error("{field} has invalid format: {value}")]
    InvalidFormat { field: &'static str, value: String },

    #[error("{field} out of range: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: String,
    },

    #[error("{field} too long: {length} chars (max {max})")]
    TooLong {
        field: &'static str,
        length: usize,
        max: usize,
    },

    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl ValidationError {
    pub fn invalid_format(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidFormat {
            field,
            value: value.into(),
        }
    }

    pub fn out_of_range(
        field: &'static str,
        value: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            expected: expected.into(),
        }
    }
}

pub type ValidationResult = Result<(), ValidationError>;

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("identifier pattern is valid"))
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
            .expect("email pattern is valid")
    })
}

fn github_username_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The regex crate has no lookahead, so hyphen placement is checked separately.
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{0,38}$").expect("username pattern is valid")
    })
}

/// Identifiers are restricted to alphanumerics, underscores and hyphens
pub fn validate_identifier(field: &'static str, value: &str) -> ValidationResult {
    if value.is_empty() {
        return Err(ValidationError::Blank { field });
    }
    if !identifier_regex().is_match(value) {
        return Err(ValidationError::invalid_format(field, value));
    }
    Ok(())
}

pub fn validate_not_blank(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        Err(ValidationError::Blank { field })
    } else {
        Ok(())
    }
}

pub fn validate_max_length(field: &'static str, value: &str, max: usize) -> ValidationResult {
    let length = value.chars().count();
    if length > max {
        Err(ValidationError::TooLong { field, length, max })
    } else {
        Ok(())
    }
}

pub fn validate_unit_interval(field: &'static str, value: f64) -> ValidationResult {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::out_of_range(field, value, "[0.0, 1.0]"))
    }
}

pub fn validate_email(value: &str) -> ValidationResult {
    if email_regex().is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::invalid_format("email", value))
    }
}

pub fn validate_github_username(value: &str) -> ValidationResult {
    if github_username_regex().is_match(value) && !value.ends_with('-') && !value.contains("--")
    {
        Ok(())
    } else {
        Err(ValidationError::invalid_format("github_username", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(validate_identifier("id", "bug_123-a").is_ok());
        assert!(validate_identifier("id", "").is_err());
        assert!(validate_identifier("id", "bug 123").is_err());
        assert!(validate_identifier("id", "bug/123").is_err());
    }

    #[test]
    fn github_usernames() {
        assert!(validate_github_username("octo-cat").is_ok());
        assert!(validate_github_username("-octo").is_err());
        assert!(validate_github_username("octo-").is_err());
        assert!(validate_github_username("oc--to").is_err());
    }

    #[test]
    fn emails_and_ranges() {
        assert!(validate_email("dev@example.com").is_ok());
        assert!(validate_email("dev@example").is_err());
        assert!(validate_unit_interval("confidence", 1.0).is_ok());
        assert!(validate_unit_interval("confidence", 1.01).is_err());
        assert!(validate_max_length("label", "abc", 2).is_err());
    }
}
