//! Service configuration
//!
//! [`AppConfig`] gathers everything the binary needs to wire the service:
//! token settings, verification and lockout policies, the HTTP hardening
//! layer ([`HttpConfig`]), the store, the notifier and an optional
//! bootstrap admin.
//!
//! ```ignore
//! use taskgate::config::AppConfig;
//!
//! // Load from environment variables
//! let config = AppConfig::from_env()?;
//!
//! // Or build programmatically
//! let config = AppConfig::builder()
//!     .jwt_secret("a-secret-of-at-least-thirty-two-characters")
//!     .port(8080)
//!     .rate_limit(10, 20)
//!     .build()?;
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::login::LockoutPolicy;
use crate::observability::ObservabilityConfig;
use crate::otp::OtpPolicy;
use crate::parse::{parse_duration, parse_size};

/// Shortest accepted signing secret
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Configuration problems found at startup
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
    #[error("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters")]
    WeakSecret,
}

// ============================================================================
// HTTP layer
// ============================================================================

/// Settings for the hardening layers applied by
/// [`SecureRouter`](crate::layers::SecureRouter).
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Maximum request body size in bytes
    pub max_request_size: usize,

    /// Whole-request timeout
    pub request_timeout: Duration,

    /// Per-IP rate limit: requests per second
    pub rate_limit_per_second: u64,

    /// Per-IP rate limit: burst size
    pub rate_limit_burst: u32,

    /// Needs peer addresses, so disabled when serving without
    /// `ConnectInfo` (router tests)
    pub rate_limit_enabled: bool,

    /// CORS allowed origins.
    /// Empty = same-origin only, `["*"]` = any origin, otherwise an allowlist.
    pub cors_origins: Vec<String>,

    pub security_headers_enabled: bool,

    /// tower-http request spans
    pub tracing_enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_request_size: 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            rate_limit_per_second: 5,
            rate_limit_burst: 20,
            rate_limit_enabled: true,
            cors_origins: Vec::new(),
            security_headers_enabled: true,
            tracing_enabled: true,
        }
    }
}

impl HttpConfig {
    /// Any origin allowed
    pub fn cors_is_permissive(&self) -> bool {
        self.cors_origins.len() == 1 && self.cors_origins[0] == "*"
    }

    /// Same-origin only
    pub fn cors_is_restrictive(&self) -> bool {
        self.cors_origins.is_empty()
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Outbound email relay. Without a URL, codes are only logged.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub from: String,
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            from: "Task Manager <noreply@localhost>".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Admin account created at startup when it does not exist yet
#[derive(Clone)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Application
// ============================================================================

/// Complete service configuration
#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    /// HS256 signing secret
    pub jwt_secret: String,
    /// Token lifetime
    pub jwt_expire: Duration,
    pub otp: OtpPolicy,
    pub lockout: LockoutPolicy,
    pub http: HttpConfig,
    /// Postgres URL; the in-memory store is used when absent
    pub database_url: Option<String>,
    pub notifier: NotifierConfig,
    pub admin: Option<AdminSeed>,
    pub observability: ObservabilityConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_expire", &self.jwt_expire)
            .field("otp", &self.otp)
            .field("lockout", &self.lockout)
            .field("http", &self.http)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("notifier", &self.notifier.url)
            .field("admin", &self.admin)
            .finish_non_exhaustive()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            jwt_secret: String::new(),
            jwt_expire: Duration::from_secs(7 * 24 * 60 * 60),
            otp: OtpPolicy::default(),
            lockout: LockoutPolicy::default(),
            http: HttpConfig::default(),
            database_url: None,
            notifier: NotifierConfig::default(),
            admin: None,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PORT` (default: 5000)
    /// - `JWT_SECRET`: required, at least 32 characters
    /// - `JWT_EXPIRE`: e.g. "7d", "12h" (default: "7d")
    /// - `OTP_EXPIRY_MINUTES` (default: 10)
    /// - `OTP_RESEND_COOLDOWN` (default: "60s")
    /// - `LOGIN_MAX_ATTEMPTS` (default: 5), `LOGIN_LOCKOUT` (default: "2h")
    /// - `MAX_REQUEST_SIZE` (default: "1MB"), `REQUEST_TIMEOUT` (default: "30s")
    /// - `RATE_LIMIT_PER_SECOND`, `RATE_LIMIT_BURST`, `RATE_LIMIT_ENABLED`
    /// - `CORS_ALLOWED_ORIGINS`: comma-separated, or "*"
    /// - `SECURITY_HEADERS_ENABLED`, `TRACING_ENABLED`
    /// - `DATABASE_URL`: Postgres; unset means in-memory
    /// - `NOTIFIER_URL`, `NOTIFIER_TOKEN`, `NOTIFIER_TIMEOUT`, `EMAIL_FROM`
    /// - `ADMIN_NAME`, `ADMIN_EMAIL`, `ADMIN_PASSWORD`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] over an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Vars(&lookup);
        let defaults = Self::default();
        let http_defaults = HttpConfig::default();

        let jwt_secret = env.get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.chars().count() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }

        let expiry_minutes: u64 = env.parsed("OTP_EXPIRY_MINUTES", 10)?;
        if expiry_minutes == 0 {
            return Err(ConfigError::Invalid {
                name: "OTP_EXPIRY_MINUTES",
                value: "0".into(),
            });
        }
        let otp = OtpPolicy {
            expiry: Duration::from_secs(expiry_minutes * 60),
            resend_cooldown: env.duration("OTP_RESEND_COOLDOWN", defaults.otp.resend_cooldown)?,
            ..defaults.otp
        };

        let lockout = LockoutPolicy::builder()
            .max_attempts(env.parsed("LOGIN_MAX_ATTEMPTS", defaults.lockout.max_attempts)?)
            .lockout_duration(env.duration("LOGIN_LOCKOUT", defaults.lockout.lockout_duration)?)
            .build();

        let http = HttpConfig {
            max_request_size: match env.get("MAX_REQUEST_SIZE") {
                Some(raw) => parse_size(&raw).ok_or(ConfigError::Invalid {
                    name: "MAX_REQUEST_SIZE",
                    value: raw,
                })?,
                None => http_defaults.max_request_size,
            },
            request_timeout: env.duration("REQUEST_TIMEOUT", http_defaults.request_timeout)?,
            rate_limit_per_second: env.parsed("RATE_LIMIT_PER_SECOND", http_defaults.rate_limit_per_second)?,
            rate_limit_burst: env.parsed("RATE_LIMIT_BURST", http_defaults.rate_limit_burst)?,
            rate_limit_enabled: env.flag("RATE_LIMIT_ENABLED", true),
            cors_origins: env
                .get("CORS_ALLOWED_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            security_headers_enabled: env.flag("SECURITY_HEADERS_ENABLED", true),
            tracing_enabled: env.flag("TRACING_ENABLED", true),
        };

        let notifier = NotifierConfig {
            url: env.get("NOTIFIER_URL"),
            token: env.get("NOTIFIER_TOKEN"),
            from: env.get("EMAIL_FROM").unwrap_or(defaults.notifier.from),
            timeout: env.duration("NOTIFIER_TIMEOUT", defaults.notifier.timeout)?,
        };

        let admin = match (env.get("ADMIN_EMAIL"), env.get("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminSeed {
                name: env.get("ADMIN_NAME").unwrap_or_else(|| "Administrator".to_string()),
                email,
                password,
            }),
            (Some(_), None) => return Err(ConfigError::Missing("ADMIN_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("ADMIN_EMAIL")),
            (None, None) => None,
        };

        Ok(Self {
            port: env.parsed("PORT", defaults.port)?,
            jwt_secret,
            jwt_expire: env.duration("JWT_EXPIRE", defaults.jwt_expire)?,
            otp,
            lockout,
            http,
            database_url: env.get("DATABASE_URL"),
            notifier,
            admin,
            observability: ObservabilityConfig::from_env(),
        })
    }

    /// Create a builder for programmatic configuration
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }
}

/// Typed access to a variable source. Empty values count as unset.
struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parsed<T: std::str::FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
            None => Ok(default),
        }
    }

    fn duration(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(name) {
            Some(raw) => parse_duration(&raw).ok_or(ConfigError::Invalid { name, value: raw }),
            None => Ok(default),
        }
    }

    fn flag(&self, name: &str, default: bool) -> bool {
        self.get(name)
            .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(default)
    }
}

/// Builder for [`AppConfig`]
#[derive(Clone, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt_secret = secret.into();
        self
    }

    pub fn jwt_expire(mut self, lifetime: Duration) -> Self {
        self.config.jwt_expire = lifetime;
        self
    }

    pub fn otp_policy(mut self, policy: OtpPolicy) -> Self {
        self.config.otp = policy;
        self
    }

    pub fn lockout_policy(mut self, policy: LockoutPolicy) -> Self {
        self.config.lockout = policy;
        self
    }

    pub fn max_request_size(mut self, size: usize) -> Self {
        self.config.http.max_request_size = size;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.request_timeout = timeout;
        self
    }

    /// Per-IP rate limit
    pub fn rate_limit(mut self, per_second: u64, burst: u32) -> Self {
        self.config.http.rate_limit_per_second = per_second;
        self.config.http.rate_limit_burst = burst;
        self
    }

    pub fn disable_rate_limiting(mut self) -> Self {
        self.config.http.rate_limit_enabled = false;
        self
    }

    pub fn cors_origins(mut self, origins: Vec<&str>) -> Self {
        self.config.http.cors_origins = origins.into_iter().map(String::from).collect();
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    pub fn notifier_url(mut self, url: impl Into<String>) -> Self {
        self.config.notifier.url = Some(url.into());
        self
    }

    pub fn admin(mut self, name: &str, email: &str, password: &str) -> Self {
        self.config.admin = Some(AdminSeed {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        });
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        if self.config.jwt_secret.is_empty() {
            return Err(ConfigError::Missing("JWT_SECRET"));
        }
        if self.config.jwt_secret.chars().count() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }
        Ok(self.config)
    }
}
