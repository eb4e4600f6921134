//! Password policy and hashing
//!
//! Passwords are checked against a [`PasswordPolicy`] at the boundary and
//! stored only as Argon2id PHC strings. Hashing is CPU-bound; async callers
//! run [`hash_password`] and [`verify_password`] on the blocking pool.

use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use std::sync::OnceLock;
use thiserror::Error;

use crate::validation::{ValidationError, ValidationErrorCode, ValidationErrors};

// ============================================================================
// Password Policy
// ============================================================================

/// Password strength requirements.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    /// Minimum length in characters
    pub min_length: usize,
    /// Maximum length in characters
    pub max_length: usize,
    /// Require at least one ASCII uppercase letter
    pub require_uppercase: bool,
    /// Require at least one ASCII lowercase letter
    pub require_lowercase: bool,
    /// Require at least one digit
    pub require_digit: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 6,
            max_length: 128,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
        }
    }
}

impl PasswordPolicy {
    /// Create a builder
    pub fn builder() -> PasswordPolicyBuilder {
        PasswordPolicyBuilder::default()
    }

    /// Check a candidate password, reporting every rule it breaks.
    pub fn check(&self, password: &str) -> Vec<PasswordError> {
        let mut problems = Vec::new();
        let len = password.chars().count();
        if len < self.min_length {
            problems.push(PasswordError::TooShort { min: self.min_length });
        }
        if len > self.max_length {
            problems.push(PasswordError::TooLong { max: self.max_length });
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            problems.push(PasswordError::MissingUppercase);
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            problems.push(PasswordError::MissingLowercase);
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            problems.push(PasswordError::MissingDigit);
        }
        problems
    }

    /// Append policy violations to a validation collector
    pub fn validate_into(&self, password: &str, errors: &mut ValidationErrors) {
        if password.is_empty() {
            errors.push(ValidationError::for_field(
                "password",
                ValidationErrorCode::Required,
                "Field is required",
            ));
            return;
        }
        for problem in self.check(password) {
            errors.push(ValidationError::for_field(
                "password",
                problem.code(),
                problem.to_string(),
            ));
        }
    }
}

/// Builder for [`PasswordPolicy`]
#[derive(Debug, Clone, Default)]
pub struct PasswordPolicyBuilder {
    policy: PasswordPolicy,
}

impl PasswordPolicyBuilder {
    pub fn min_length(mut self, len: usize) -> Self {
        self.policy.min_length = len;
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.policy.max_length = len;
        self
    }

    /// Toggle the upper/lower/digit composition rules together
    pub fn require_mixed(mut self, enabled: bool) -> Self {
        self.policy.require_uppercase = enabled;
        self.policy.require_lowercase = enabled;
        self.policy.require_digit = enabled;
        self
    }

    pub fn build(self) -> PasswordPolicy {
        self.policy
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Policy violations and hashing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordError {
    #[error("Password must be at least {min} characters")]
    TooShort { min: usize },
    #[error("Password cannot exceed {max} characters")]
    TooLong { max: usize },
    #[error("Password must contain at least one uppercase letter")]
    MissingUppercase,
    #[error("Password must contain at least one lowercase letter")]
    MissingLowercase,
    #[error("Password must contain at least one number")]
    MissingDigit,
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

impl PasswordError {
    fn code(&self) -> ValidationErrorCode {
        match self {
            Self::TooShort { .. } => ValidationErrorCode::TooShort,
            Self::TooLong { .. } => ValidationErrorCode::TooLong,
            _ => ValidationErrorCode::Policy,
        }
    }
}

// ============================================================================
// Hashing
// ============================================================================

/// Hash a password with Argon2id and a random salt.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| PasswordError::Hashing(e.to_string()))
}

/// Verify a password against a stored PHC string.
///
/// Malformed stored hashes verify as `false`.
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Spend one verification's worth of work against a throwaway hash.
///
/// Used when a login names an unknown email so the response time does not
/// reveal whether the account exists.
pub fn dummy_verify(password: &str) {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    if let Some(hash) = DUMMY.get_or_init(|| hash_password("dummy-password-never-matches").ok()) {
        let _ = verify_password(password, hash);
    }
}
