//! Input validation at the HTTP boundary
//!
//! Request payloads implement [`Validate`]; the [`ValidatedJson`],
//! [`ValidatedQuery`] and [`ValidatedPath`] extractors run it before the
//! handler body, so the engines only ever see well-formed input.
//!
//! Unlike a fail-fast check, `validate` collects every problem into
//! [`ValidationErrors`] so the client gets the full list in one response.
//!
//! # Usage
//!
//! ```ignore
//! use taskgate::validation::{Validate, ValidationErrors, validate_length, validate_email};
//!
//! struct Signup { name: String, email: String }
//!
//! impl Validate for Signup {
//!     fn validate(&self) -> Result<(), ValidationErrors> {
//!         let mut errors = ValidationErrors::new();
//!         errors.check(validate_length(&self.name, 2, 50, "name"));
//!         errors.check(validate_email(&self.email));
//!         errors.into_result()
//!     }
//! }
//! ```

use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use std::fmt;

use crate::error::AppError;

/// Why a field was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorCode {
    Required,
    TooShort,
    TooLong,
    InvalidFormat,
    InvalidEmail,
    /// Not one of the enumerated values
    NotAllowed,
    OutOfRange,
    /// Rejected by the password policy
    Policy,
}

impl ValidationErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::TooShort => "too_short",
            Self::TooLong => "too_long",
            Self::InvalidFormat => "invalid_format",
            Self::InvalidEmail => "invalid_email",
            Self::NotAllowed => "not_allowed",
            Self::OutOfRange => "out_of_range",
            Self::Policy => "policy",
        }
    }
}

impl fmt::Display for ValidationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rejected field. Renders as `field: message` in the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: Option<String>,
    pub code: ValidationErrorCode,
    pub message: String,
}

impl ValidationError {
    pub fn for_field(
        field: impl Into<String>,
        code: ValidationErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: Some(field.into()),
            code,
            message: message.into(),
        }
    }

    fn field_rule(field: &str, code: ValidationErrorCode, message: impl Into<String>) -> Result<(), Self> {
        Err(Self::for_field(field, code, message))
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "{field}: ")?;
        }
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Every validation failure found in one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the error from a single check, if any
    pub fn check(&mut self, result: Result<(), ValidationError>) {
        if let Err(error) = result {
            self.0.push(error);
        }
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    /// Rendered entries, in the order the checks ran
    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// A request payload that can check itself.
pub trait Validate {
    /// `Err` lists every problem, not just the first.
    fn validate(&self) -> Result<(), ValidationErrors>;

    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

// ============================================================================
// Validators
// ============================================================================

/// Non-blank after trimming
pub fn validate_required(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        ValidationError::field_rule(field, ValidationErrorCode::Required, "Field is required")
    } else {
        Ok(())
    }
}

/// Trimmed length in characters within `min..=max`. A blank value with a
/// non-zero minimum reports `Required` rather than `TooShort`.
pub fn validate_length(value: &str, min: usize, max: usize, field: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if min > 0 {
        validate_required(trimmed, field)?;
    }
    match trimmed.chars().count() {
        n if n < min => ValidationError::field_rule(
            field,
            ValidationErrorCode::TooShort,
            format!("Must be at least {min} characters"),
        ),
        n if n > max => ValidationError::field_rule(
            field,
            ValidationErrorCode::TooLong,
            format!("Must be at most {max} characters"),
        ),
        _ => Ok(()),
    }
}

/// Structural email check: one `@`, a dotted domain, no empty labels.
/// Deliverability is proven by the verification code, not here.
pub fn validate_email(value: &str) -> Result<(), ValidationError> {
    const MESSAGE: &str = "Please provide a valid email address";

    let value = value.trim();
    validate_required(value, "email")?;

    let well_formed = value.split_once('@').is_some_and(|(local, domain)| {
        let local_ok = !local.is_empty()
            && local.len() <= 64
            && !local.split('.').any(str::is_empty)
            && !local.chars().any(|c| c.is_whitespace() || c.is_control());
        let domain_ok = domain.len() <= 255
            && domain.contains('.')
            && !domain.split('.').any(str::is_empty)
            && domain.chars().all(|c| c.is_alphanumeric() || c == '.' || c == '-');
        local_ok && domain_ok
    });

    if well_formed {
        Ok(())
    } else {
        ValidationError::field_rule("email", ValidationErrorCode::InvalidEmail, MESSAGE)
    }
}

/// Inclusive numeric bounds
pub fn validate_range<T: PartialOrd + Copy + fmt::Display>(
    value: T,
    min: T,
    max: T,
    field: &str,
) -> Result<(), ValidationError> {
    if (min..=max).contains(&value) {
        return Ok(());
    }
    ValidationError::field_rule(
        field,
        ValidationErrorCode::OutOfRange,
        format!("Must be between {min} and {max}"),
    )
}

/// At most `max` entries
pub fn validate_collection_size<T>(items: &[T], max: usize, field: &str) -> Result<(), ValidationError> {
    if items.len() <= max {
        return Ok(());
    }
    ValidationError::field_rule(
        field,
        ValidationErrorCode::TooLong,
        format!("Must have at most {max} items"),
    )
}

/// Parse an ISO 8601 timestamp or calendar date.
///
/// Full RFC 3339 timestamps keep their instant; a bare `YYYY-MM-DD` is read
/// as midnight UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Validate an ISO 8601 timestamp
pub fn validate_timestamp(value: &str, field: &str) -> Result<(), ValidationError> {
    match parse_timestamp(value) {
        Some(_) => Ok(()),
        None => Err(ValidationError::for_field(
            field,
            ValidationErrorCode::InvalidFormat,
            "Must be a valid ISO 8601 date",
        )),
    }
}

// ============================================================================
// Axum Extractors
// ============================================================================

/// Validated JSON extractor
///
/// Deserializes the body, runs [`Validate`], and rejects with a 400
/// envelope listing every problem. Malformed JSON is a validation failure
/// too.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            tracing::warn!(error = %e, "JSON parsing failed");
            AppError::validation("Validation failed").with_errors(vec![e.body_text()])
        })?;

        if let Err(errors) = value.validate() {
            tracing::warn!(errors = %errors, "Validation failed");
            return Err(errors.into());
        }

        Ok(ValidatedJson(value))
    }
}

/// Validated query-string extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await.map_err(|e| {
            tracing::warn!(error = %e, "Query parameter parsing failed");
            AppError::validation("Validation failed").with_errors(vec![e.body_text()])
        })?;

        if let Err(errors) = value.validate() {
            tracing::warn!(errors = %errors, "Query validation failed");
            return Err(errors.into());
        }

        Ok(ValidatedQuery(value))
    }
}

/// Path extractor with an envelope rejection (e.g. non-UUID ids)
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ValidatedPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await.map_err(|e| {
            tracing::warn!(error = %e, "Path parameter parsing failed");
            AppError::validation("Validation failed").with_errors(vec!["id: Invalid identifier".into()])
        })?;
        Ok(ValidatedPath(value))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_required() {
        assert!(validate_required("hello", "field").is_ok());
        assert!(validate_required("", "field").is_err());
        assert!(validate_required("   ", "field").is_err());
    }

    #[test]
    fn test_validate_length_trims() {
        assert!(validate_length("  ab  ", 2, 50, "name").is_ok());
        assert_eq!(
            validate_length(" a ", 2, 50, "name").unwrap_err().code,
            ValidationErrorCode::TooShort
        );
        assert_eq!(
            validate_length(&"x".repeat(51), 2, 50, "name").unwrap_err().code,
            ValidationErrorCode::TooLong
        );
        assert_eq!(
            validate_length("   ", 2, 50, "name").unwrap_err().code,
            ValidationErrorCode::Required
        );
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("  User.Name@Example.co.uk ").is_ok());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@localhost").is_err());
        assert!(validate_email("user..name@example.com").is_err());
        assert!(validate_email("a@b@example.com").is_err());
    }

    #[test]
    fn test_validate_collection_size() {
        assert!(validate_collection_size(&[1, 2], 2, "tags").is_ok());
        let err = validate_collection_size(&[1, 2, 3], 2, "tags").unwrap_err();
        assert_eq!(err.to_string(), "tags: Must have at most 2 items");
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range(10, 1, 100, "limit").is_ok());
        assert!(validate_range(0, 1, 100, "limit").is_err());
        assert!(validate_range(101, 1, 100, "limit").is_err());
    }

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp("2025-03-01T12:00:00Z").is_some());
        assert!(parse_timestamp("2025-03-01T12:00:00+02:00").is_some());
        let day = parse_timestamp("2025-03-01").unwrap();
        assert_eq!(day.to_rfc3339(), "2025-03-01T00:00:00+00:00");
        assert!(parse_timestamp("next tuesday").is_none());
        assert!(validate_timestamp("2025-13-01", "dueDate").is_err());
    }

    #[test]
    fn test_errors_are_collected() {
        let mut errors = ValidationErrors::new();
        errors.check(validate_length("a", 2, 50, "name"));
        errors.check(validate_email("nope"));
        errors.check(validate_required("ok", "password"));
        let errors = errors.into_result().unwrap_err();
        assert_eq!(errors.errors().len(), 2);
        assert_eq!(errors.messages()[0], "name: Must be at least 2 characters");
    }
}
