//! Validation utilities for repositories
//!
//! Field rules run before any I/O so that bad input surfaces as a
//! `ValidationError` and never reaches the store.

use std::collections::BTreeMap;

use crate::error::{AppError, Result};

/// Validation rule for a field
pub trait ValidationRule<T: ?Sized> {
    /// Validate the field
    fn validate(&self, value: &T) -> Result<()>;

    /// Get the error message for this rule
    fn error_message(&self) -> String;
}

/// String length validation rule, counted in characters after trimming
pub struct StringLength {
    /// Minimum length (inclusive)
    pub min: Option<usize>,
    /// Maximum length (inclusive)
    pub max: Option<usize>,
}

impl StringLength {
    pub const fn between(min: usize, max: usize) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }
}

impl ValidationRule<str> for StringLength {
    fn validate(&self, value: &str) -> Result<()> {
        let len = value.trim().chars().count();
        if let Some(min) = self.min {
            if len < min {
                return Err(AppError::validation(self.error_message()));
            }
        }

        if let Some(max) = self.max {
            if len > max {
                return Err(AppError::validation(self.error_message()));
            }
        }

        Ok(())
    }

    fn error_message(&self) -> String {
        match (self.min, self.max) {
            (Some(min), Some(max)) => format!("Length must be between {} and {} characters", min, max),
            (Some(min), None) => format!("Length must be at least {} characters", min),
            (None, Some(max)) => format!("Length must be at most {} characters", max),
            (None, None) => "Invalid string length".to_string(),
        }
    }
}

/// Minimal structural email check: one `@`, non-empty local part, dotted domain
pub struct EmailFormat;

impl ValidationRule<str> for EmailFormat {
    fn validate(&self, value: &str) -> Result<()> {
        let valid = match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !value.chars().any(char::is_whitespace)
            }
            None => false,
        };
        if !valid {
            return Err(AppError::validation(self.error_message()));
        }
        Ok(())
    }

    fn error_message(&self) -> String {
        "Must be a valid email address".to_string()
    }
}

/// Numeric lower bound of zero
pub struct NonNegative;

impl ValidationRule<i64> for NonNegative {
    fn validate(&self, value: &i64) -> Result<()> {
        if *value < 0 {
            return Err(AppError::validation(self.error_message()));
        }
        Ok(())
    }

    fn error_message(&self) -> String {
        "Must not be negative".to_string()
    }
}

/// Collects rule failures per field and reports them together
#[derive(Debug, Default)]
pub struct Validator {
    errors: BTreeMap<&'static str, String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check one field; the first failure per field wins
    pub fn check<T: ?Sized>(
        mut self,
        field: &'static str,
        rule: &impl ValidationRule<T>,
        value: &T,
    ) -> Self {
        if !self.errors.contains_key(field) {
            if let Err(e) = rule.validate(value) {
                let message = match e {
                    AppError::ValidationError(message) => message,
                    other => other.to_string(),
                };
                self.errors.insert(field, message);
            }
        }
        self
    }

    /// Fail with a single validation error naming every bad field
    pub fn finish(self) -> Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let error_message = self
            .errors
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect::<Vec<String>>()
            .join(", ");
        Err(AppError::validation(error_message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_format() {
        assert!(EmailFormat.validate("a@x.com").is_ok());
        assert!(EmailFormat.validate("a@x").is_err());
        assert!(EmailFormat.validate("@x.com").is_err());
        assert!(EmailFormat.validate("a b@x.com").is_err());
        assert!(EmailFormat.validate("a@@x.com").is_err());
    }

    #[test]
    fn test_string_length_trims() {
        let rule = StringLength::between(1, 3);
        assert!(rule.validate("   ").is_err());
        assert!(rule.validate(" ab ").is_ok());
        assert!(rule.validate("abcd").is_err());
    }

    #[test]
    fn test_validator_reports_all_fields() {
        let err = Validator::new()
            .check("email", &EmailFormat, "nope")
            .check("name", &StringLength::between(1, 10), "")
            .check("price", &NonNegative, &-1)
            .finish()
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("email"));
        assert!(message.contains("name"));
        assert!(message.contains("price"));
    }
}
