//! API error handling
//!
//! Every failure that crosses the HTTP boundary becomes an [`AppError`],
//! rendered as the standard envelope:
//!
//! ```json
//! { "success": false, "message": "...", "data": { ... }, "errors": ["..."] }
//! ```
//!
//! Engine-level errors (`AccountError`, `TaskError`, `AdminError`, ...) are
//! typed `thiserror` enums; the `From` impls at the bottom of this module
//! are the single place where they are mapped to status codes.
//!
//! Internal failures are logged with their details and returned to the
//! caller as a generic message. Nothing from a store or transport error is
//! ever serialized.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::accounts::AccountError;
use crate::admin::AdminError;
use crate::notifier::DeliveryError;
use crate::store::StoreError;
use crate::tasks::TaskError;
use crate::token::TokenError;
use crate::validation::ValidationErrors;

/// Message returned for any unexpected failure.
pub const INTERNAL_MESSAGE: &str = "Something went wrong. Please try again later.";

// ============================================================================
// Error Types
// ============================================================================

/// Error categories with their HTTP status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range input (400)
    Validation,
    /// Business rule rejected the request (400)
    BadRequest,
    /// Duplicate unique key (400)
    Conflict,
    /// Missing, invalid or expired credential (401)
    Unauthenticated,
    /// Authenticated but not permitted (403)
    Forbidden,
    /// Resource absent or soft-deleted (404)
    NotFound,
    /// Account lockout in effect (423)
    Locked,
    /// Too many attempts or resend cooldown (429)
    RateLimited,
    /// Outbound email delivery failed (500)
    Delivery,
    /// Unexpected store or runtime failure (500)
    Internal,
}

impl ErrorKind {
    /// HTTP status for this kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation | Self::BadRequest | Self::Conflict => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Locked => StatusCode::LOCKED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Delivery | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation_error",
            Self::BadRequest => "bad_request",
            Self::Conflict => "conflict",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Locked => "locked",
            Self::RateLimited => "rate_limited",
            Self::Delivery => "delivery_error",
            Self::Internal => "internal_error",
        };
        f.write_str(name)
    }
}

/// Application error rendered into the response envelope.
#[derive(Debug)]
pub struct AppError {
    /// Determines status code and logging level
    pub kind: ErrorKind,
    /// User-facing message
    pub message: String,
    /// Per-field validation messages
    pub errors: Vec<String>,
    /// Structured extras (`attemptsLeft`, `retryAfter`)
    pub data: Option<Map<String, Value>>,
    /// Seconds until the caller may retry; also sent as `Retry-After`
    pub retry_after: Option<u64>,
    /// Internal details, logged only
    pub details: Option<String>,
}

impl AppError {
    /// Create a new error
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            errors: Vec::new(),
            data: None,
            retry_after: None,
            details: None,
        }
    }

    /// Validation failure (400)
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Bad request (400)
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Duplicate key (400)
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Authentication required or failed (401)
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    /// Access denied (403)
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// Not found (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Account locked (423)
    pub fn locked(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::new(ErrorKind::Locked, message).with_retry_after(retry_after_secs)
    }

    /// Rate limited (429)
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    /// Email delivery failure (500). The source is logged, never returned.
    pub fn delivery(message: impl Into<String>, source: &DeliveryError) -> Self {
        Self::new(ErrorKind::Delivery, message).with_details(source.to_string())
    }

    /// Internal error (500) with a source that is logged but not exposed.
    pub fn internal(source: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Internal, INTERNAL_MESSAGE).with_details(source.to_string())
    }

    /// Attach per-field validation messages
    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    /// Attach a structured `data` entry
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// Set the retry hint (header and `data.retryAfter`)
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self.with_data("retryAfter", secs)
    }

    /// Add internal details (logged but not exposed)
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    fn log(&self) {
        let details = self.details.as_deref().unwrap_or("none");
        match self.kind {
            ErrorKind::Internal | ErrorKind::Delivery => {
                tracing::error!(
                    error_kind = %self.kind,
                    message = %self.message,
                    details = %details,
                    "Request failed"
                );
            }
            ErrorKind::Unauthenticated | ErrorKind::Forbidden | ErrorKind::Locked => {
                tracing::warn!(error_kind = %self.kind, message = %self.message, "Auth error");
            }
            _ => {
                tracing::debug!(error_kind = %self.kind, message = %self.message, "Client error");
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();

        let message = match self.kind {
            ErrorKind::Internal => INTERNAL_MESSAGE.to_string(),
            _ => self.message,
        };

        let mut body = json!({ "success": false, "message": message });
        if let Some(data) = self.data {
            body["data"] = Value::Object(data);
        }
        if !self.errors.is_empty() {
            body["errors"] = json!(self.errors);
        }

        let mut response = (self.kind.status_code(), Json(body)).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

// ============================================================================
// Conversions from engine errors
// ============================================================================

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::validation("Validation failed").with_errors(errors.messages())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => AppError::conflict("User with this email already exists."),
            StoreError::NotFound => AppError::not_found("Resource not found."),
            other => AppError::internal(other),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired | TokenError::Invalid => AppError::unauthenticated(err.to_string()),
            TokenError::Signing(_) => AppError::internal(err),
        }
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        let message = err.to_string();
        match err {
            AccountError::AlreadyRegistered => AppError::conflict(message),
            AccountError::NotFound => AppError::not_found(message),
            AccountError::AlreadyVerified
            | AccountError::OtpMissing
            | AccountError::OtpExpired => AppError::bad_request(message),
            AccountError::OtpMismatch { attempts_left } => {
                AppError::bad_request(message).with_data("attemptsLeft", attempts_left)
            }
            AccountError::TooManyAttempts => AppError::rate_limited(message),
            AccountError::ResendCooldown { retry_after_secs } => {
                AppError::rate_limited(message).with_retry_after(retry_after_secs)
            }
            AccountError::InvalidCredentials => AppError::unauthenticated(message),
            AccountError::Locked { retry_after_secs } => AppError::locked(message, retry_after_secs),
            AccountError::Unverified | AccountError::Inactive => AppError::forbidden(message),
            AccountError::Delivery(ref source) => AppError::delivery(message, source),
            AccountError::Token(e) => e.into(),
            AccountError::Store(e) => e.into(),
            AccountError::Hashing(_) => AppError::internal(message),
        }
    }
}

impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        let message = err.to_string();
        match err {
            TaskError::NotFound => AppError::not_found(message),
            TaskError::Forbidden { .. } => AppError::forbidden(message),
            TaskError::UnknownAssignee => {
                AppError::validation("Validation failed").with_errors(vec![message])
            }
            TaskError::Store(e) => e.into(),
        }
    }
}

impl From<AdminError> for AppError {
    fn from(err: AdminError) -> Self {
        let message = err.to_string();
        match err {
            AdminError::NotFound => AppError::not_found(message),
            AdminError::OwnRole | AdminError::OwnStatus | AdminError::OwnAccount => {
                AppError::bad_request(message)
            }
            AdminError::Store(e) => e.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_status_codes() {
        assert_eq!(ErrorKind::Validation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Conflict.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::Locked.status_code(), StatusCode::LOCKED);
        assert_eq!(ErrorKind::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorKind::Delivery.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_internal_details_never_exposed() {
        let err = AppError::internal("connection refused on 10.0.0.7:5432");
        assert_eq!(err.message, INTERNAL_MESSAGE);
        assert!(err.details.as_deref().unwrap().contains("5432"));
    }

    #[test]
    fn test_retry_after_sets_data() {
        let err = AppError::rate_limited("slow down").with_retry_after(42);
        assert_eq!(err.retry_after, Some(42));
        assert_eq!(err.data.unwrap()["retryAfter"], 42);
    }

    #[test]
    fn test_retry_after_header() {
        let response = AppError::locked("locked", 7200).into_response();
        assert_eq!(response.status(), StatusCode::LOCKED);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7200");
    }

    #[test]
    fn test_account_error_mapping() {
        let err: AppError = AccountError::OtpMismatch { attempts_left: 3 }.into();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.data.unwrap()["attemptsLeft"], 3);

        let err: AppError = AccountError::InvalidCredentials.into();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
        assert_eq!(err.message, "Invalid email or password.");
    }

    #[test]
    fn test_error_display() {
        let err = AppError::not_found("Task not found.");
        assert_eq!(format!("{}", err), "not_found: Task not found.");
    }
}
