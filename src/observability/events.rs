//! Security event logging
//!
//! Account and access events are logged through [`security_event!`] so
//! every record carries the same `security_event`, `category` and
//! `severity` fields and can be filtered out of the general log stream.
//!
//! ```ignore
//! security_event!(
//!     SecurityEvent::LoginFailure,
//!     account_id = %account.id,
//!     reason = "invalid_password",
//!     "Login failed"
//! );
//! ```

use std::fmt;

/// Security-relevant events emitted by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    // Account lifecycle
    AccountRegistered,
    OtpSent,
    OtpRejected,
    EmailVerified,

    // Authentication
    LoginSuccess,
    LoginFailure,
    Logout,
    TokenRejected,

    // Authorization
    AccessDenied,

    // Abuse controls
    AccountLocked,
    RateLimitExceeded,

    // Administration
    RoleChanged,
    StatusChanged,
    AccountDeleted,
    AdminBootstrapped,

    // System
    SystemStartup,
    SystemShutdown,
    DatabaseConnected,
}

impl SecurityEvent {
    /// Grouping used for filtering
    pub fn category(&self) -> &'static str {
        match self {
            Self::AccountRegistered | Self::OtpSent | Self::OtpRejected | Self::EmailVerified => {
                "account_lifecycle"
            }
            Self::LoginSuccess | Self::LoginFailure | Self::Logout | Self::TokenRejected => {
                "authentication"
            }
            Self::AccessDenied => "authorization",
            Self::AccountLocked | Self::RateLimitExceeded => "security",
            Self::RoleChanged | Self::StatusChanged | Self::AccountDeleted | Self::AdminBootstrapped => {
                "administration"
            }
            Self::SystemStartup | Self::SystemShutdown | Self::DatabaseConnected => "system",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::AccountLocked => Severity::Critical,

            Self::LoginFailure
            | Self::OtpRejected
            | Self::AccessDenied
            | Self::TokenRejected
            | Self::RateLimitExceeded => Severity::High,

            Self::AccountRegistered
            | Self::EmailVerified
            | Self::LoginSuccess
            | Self::RoleChanged
            | Self::StatusChanged
            | Self::AccountDeleted
            | Self::AdminBootstrapped => Severity::Medium,

            Self::OtpSent
            | Self::Logout
            | Self::SystemStartup
            | Self::SystemShutdown
            | Self::DatabaseConnected => Severity::Low,
        }
    }

    /// Snake-case event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::AccountRegistered => "account_registered",
            Self::OtpSent => "otp_sent",
            Self::OtpRejected => "otp_rejected",
            Self::EmailVerified => "email_verified",
            Self::LoginSuccess => "login_success",
            Self::LoginFailure => "login_failure",
            Self::Logout => "logout",
            Self::TokenRejected => "token_rejected",
            Self::AccessDenied => "access_denied",
            Self::AccountLocked => "account_locked",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::RoleChanged => "role_changed",
            Self::StatusChanged => "status_changed",
            Self::AccountDeleted => "account_deleted",
            Self::AdminBootstrapped => "admin_bootstrapped",
            Self::SystemStartup => "system_startup",
            Self::SystemShutdown => "system_shutdown",
            Self::DatabaseConnected => "database_connected",
        }
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event severity, mapped onto tracing levels by [`security_event!`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// `debug!`
    Low,
    /// `info!`
    Medium,
    /// `warn!`
    High,
    /// `error!`
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log a [`SecurityEvent`] with structured fields at the level its
/// severity maps to.
#[macro_export]
macro_rules! security_event {
    ($event:expr, $($field:tt)*) => {{
        let event: $crate::observability::SecurityEvent = $event;
        let name = event.name();
        let category = event.category();
        match event.severity() {
            $crate::observability::Severity::Critical => ::tracing::error!(
                security_event = name, category = category, severity = "critical", $($field)*
            ),
            $crate::observability::Severity::High => ::tracing::warn!(
                security_event = name, category = category, severity = "high", $($field)*
            ),
            $crate::observability::Severity::Medium => ::tracing::info!(
                security_event = name, category = category, severity = "medium", $($field)*
            ),
            $crate::observability::Severity::Low => ::tracing::debug!(
                security_event = name, category = category, severity = "low", $($field)*
            ),
        }
    }};
}

pub use security_event;
