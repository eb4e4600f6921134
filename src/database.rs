//! PostgreSQL connection pool
//!
//! Pool configuration and construction for the `postgres` feature. The
//! pool applies connect/acquire timeouts and verifies connections before
//! handing them out; [`crate::store::PgStore`] adds a per-query timeout.

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::parse::parse_duration;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL (`DATABASE_URL`)
    pub database_url: String,
    /// Maximum pooled connections
    pub max_connections: u32,
    /// Idle connections kept warm
    pub min_connections: u32,
    /// Maximum wait for a pooled connection
    pub acquire_timeout: Duration,
    /// Upper bound on any single store operation
    pub query_timeout: Duration,
    /// Connection recycle age
    pub max_lifetime: Duration,
    /// Idle connection close time
    pub idle_timeout: Duration,
    /// TLS mode for the connection
    pub ssl_mode: SslMode,
    /// Apply embedded migrations on startup
    pub auto_migrate: bool,
}

/// SSL/TLS mode for database connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyFull,
}

impl From<SslMode> for PgSslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

impl FromStr for SslMode {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-full" | "verifyfull" => Ok(Self::VerifyFull),
            other => Err(DatabaseError::Configuration(format!("unknown DB_SSL_MODE '{other}'"))),
        }
    }
}

impl DatabaseConfig {
    /// Defaults for a given URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(10),
            max_lifetime: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
            ssl_mode: SslMode::Prefer,
            auto_migrate: true,
        }
    }

    /// Load pool settings from the environment.
    ///
    /// - `DB_MAX_CONNECTIONS` (default: 10)
    /// - `DB_MIN_CONNECTIONS` (default: 1)
    /// - `DB_ACQUIRE_TIMEOUT` (default: "5s")
    /// - `DB_QUERY_TIMEOUT` (default: "10s")
    /// - `DB_SSL_MODE`: disable|prefer|require|verify-full (default: prefer)
    /// - `DB_AUTO_MIGRATE` (default: true)
    pub fn from_env(database_url: impl Into<String>) -> Result<Self, DatabaseError> {
        let mut config = Self::new(database_url);

        if let Ok(v) = std::env::var("DB_MAX_CONNECTIONS") {
            config.max_connections = v
                .parse()
                .map_err(|_| DatabaseError::Configuration(format!("invalid DB_MAX_CONNECTIONS '{v}'")))?;
        }
        if let Ok(v) = std::env::var("DB_MIN_CONNECTIONS") {
            config.min_connections = v
                .parse()
                .map_err(|_| DatabaseError::Configuration(format!("invalid DB_MIN_CONNECTIONS '{v}'")))?;
        }
        if let Ok(v) = std::env::var("DB_ACQUIRE_TIMEOUT") {
            config.acquire_timeout = parse_duration(&v)
                .ok_or_else(|| DatabaseError::Configuration(format!("invalid DB_ACQUIRE_TIMEOUT '{v}'")))?;
        }
        if let Ok(v) = std::env::var("DB_QUERY_TIMEOUT") {
            config.query_timeout = parse_duration(&v)
                .ok_or_else(|| DatabaseError::Configuration(format!("invalid DB_QUERY_TIMEOUT '{v}'")))?;
        }
        if let Ok(v) = std::env::var("DB_SSL_MODE") {
            config.ssl_mode = v.parse()?;
        }
        if let Ok(v) = std::env::var("DB_AUTO_MIGRATE") {
            config.auto_migrate = v.to_lowercase() != "false";
        }

        Ok(config)
    }
}

/// Create a connection pool and run a health check.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    info!(
        max_connections = config.max_connections,
        ssl_mode = ?config.ssl_mode,
        "Initializing database connection pool"
    );

    let connect_options = PgConnectOptions::from_str(&config.database_url)
        .map_err(|e| DatabaseError::Configuration(format!("Invalid DATABASE_URL: {}", e)))?
        .ssl_mode(config.ssl_mode.into());

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .test_before_acquire(true)
        .connect_with(connect_options)
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;

    health_check(&pool).await?;
    info!("Database connection pool initialized");

    Ok(pool)
}

/// Run `SELECT 1` and report whether the session is encrypted.
pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
    let start = std::time::Instant::now();

    let (one,): (i32,) = sqlx::query_as("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| DatabaseError::HealthCheck(e.to_string()))?;
    if one != 1 {
        return Err(DatabaseError::HealthCheck("unexpected query result".into()));
    }

    let (ssl,): (bool,) = sqlx::query_as(
        "SELECT COALESCE((SELECT ssl FROM pg_stat_ssl WHERE pid = pg_backend_pid()), false)",
    )
    .fetch_one(pool)
    .await
    .unwrap_or((false,));

    let latency_ms = start.elapsed().as_millis();
    if ssl {
        info!(latency_ms, "Database health check passed (SSL enabled)");
    } else {
        warn!(latency_ms, "Database health check passed (SSL NOT enabled)");
    }
    Ok(())
}

/// Database setup errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database configuration error: {0}")]
    Configuration(String),
    #[error("Database connection error: {0}")]
    Connection(String),
    #[error("Database health check failed: {0}")]
    HealthCheck(String),
    #[error("Database migration error: {0}")]
    Migration(String),
}
