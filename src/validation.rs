use crate::errors::{DomainError, DomainResult, ValidationError};
use regex::Regex;
use rust_decimal::Decimal;
use std::sync::OnceLock;
use uuid::Uuid;

/// A trait that entities should implement for validation.
pub trait Validate {
    /// Validates the entity and returns an error if validation fails.
    fn validate(&self) -> DomainResult<()>;
}

// Common regex patterns
fn email_regex() -> &'static Regex {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    EMAIL_REGEX.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap())
}

fn phone_regex() -> &'static Regex {
    static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
    PHONE_REGEX.get_or_init(|| Regex::new(r"^\+?[0-9]{8,15}$").unwrap())
}

/// `PAY-YYYYMMDD-XXXXXX`
pub(crate) fn ref_no_regex() -> &'static Regex {
    static REF_NO_REGEX: OnceLock<Regex> = OnceLock::new();
    REF_NO_REGEX.get_or_init(|| Regex::new(r"^PAY-[0-9]{8}-[A-Z0-9]{6}$").unwrap())
}

/// Struct for configuring validations in a fluent style
#[derive(Default)]
pub struct ValidationBuilder<T> {
    field_name: String,
    value: Option<T>,
    errors: Vec<ValidationError>,
}

/// Generic validation implementations
impl<T> ValidationBuilder<T> {
    pub fn new(field_name: &str, value: Option<T>) -> Self {
        Self {
            field_name: field_name.to_string(),
            value,
            errors: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self
    where
        T: Default + PartialEq,
    {
        if self.value.is_none() || self.value == Some(T::default()) {
            self.errors.push(ValidationError::required(&self.field_name));
        }
        self
    }

    /// Complete validation and return result
    pub fn validate(self) -> DomainResult<()> {
        match self.errors.into_iter().next() {
            None => Ok(()),
            Some(first) => Err(DomainError::Validation(first)),
        }
    }
}

/// String-specific validations
impl ValidationBuilder<String> {
    /// Whitespace-only strings count as missing.
    pub fn not_blank(mut self) -> Self {
        if self.value.as_deref().map_or(true, |v| v.trim().is_empty()) {
            self.errors.push(ValidationError::required(&self.field_name));
        }
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        if let Some(value) = &self.value {
            if value.chars().count() < min {
                self.errors.push(ValidationError::min_length(&self.field_name, min));
            }
        }
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        if let Some(value) = &self.value {
            if value.chars().count() > max {
                self.errors.push(ValidationError::max_length(&self.field_name, max));
            }
        }
        self
    }

    pub fn matches_pattern(mut self, pattern: &Regex, message: &str) -> Self {
        if let Some(value) = &self.value {
            if !pattern.is_match(value) {
                self.errors.push(ValidationError::format(&self.field_name, message));
            }
        }
        self
    }

    pub fn email(self) -> Self {
        self.matches_pattern(email_regex(), "must be a valid email address")
    }

    pub fn phone(self) -> Self {
        self.matches_pattern(phone_regex(), "must be a valid phone number")
    }

    pub fn ref_no(self) -> Self {
        self.matches_pattern(ref_no_regex(), "must look like PAY-YYYYMMDD-XXXXXX")
    }

    pub fn one_of(mut self, allowed_values: &[&str], message: Option<&str>) -> Self {
        if let Some(value) = &self.value {
            if !allowed_values.contains(&value.as_str()) {
                let reason = message.unwrap_or("must be one of the allowed values");
                self.errors.push(ValidationError::invalid_value(&self.field_name, reason));
            }
        }
        self
    }
}

/// Money amounts
impl ValidationBuilder<Decimal> {
    pub fn positive(mut self) -> Self {
        if let Some(value) = &self.value {
            if *value <= Decimal::ZERO {
                self.errors.push(ValidationError::invalid_value(&self.field_name, "must be greater than zero"));
            }
        }
        self
    }

    pub fn non_negative(mut self) -> Self {
        if let Some(value) = &self.value {
            if value.is_sign_negative() && !value.is_zero() {
                self.errors.push(ValidationError::invalid_value(&self.field_name, "cannot be negative"));
            }
        }
        self
    }
}

/// UUID validation helpers
impl ValidationBuilder<Uuid> {
    pub fn not_nil(mut self) -> Self {
        if let Some(value) = &self.value {
            if value.is_nil() {
                self.errors.push(ValidationError::invalid_value(&self.field_name, "cannot be a nil UUID"));
            }
        }
        self
    }
}

/// Optional free-text contact fields: validated only when present and non-empty.
pub(crate) fn optional_email(value: &Option<String>) -> DomainResult<()> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => ValidationBuilder::new("email", Some(v.to_string())).email().validate(),
        _ => Ok(()),
    }
}

pub(crate) fn optional_phone(value: &Option<String>) -> DomainResult<()> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => ValidationBuilder::new("phone", Some(v.to_string())).phone().validate(),
        _ => Ok(()),
    }
}
