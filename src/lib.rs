//! # taskgate
//!
//! Multi-user task management API for Axum.
//!
//! Two subsystems carry the weight:
//!
//! - **Account lifecycle** ([`accounts`]): registration, email verification
//!   with one-time codes, rate-limited resend, login with attempt lockout,
//!   and JWT issue ([`token`]).
//! - **Task engine** ([`tasks`]): CRUD with pagination, filtering, soft
//!   deletion and statistics, scoped by ownership and role; plus the
//!   [`admin`] operations over accounts.
//!
//! Requests reach them through the authorization [`gate`] and the
//! [`api`] router, which carries the shared hardening layers
//! ([`layers`]): timeout, body limit, per-IP rate limit, security headers,
//! CORS and request auditing.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use taskgate::{api, clock::SystemClock, config::AppConfig, notifier::LogNotifier, token::TokenIssuer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_env()?;
//!     taskgate::observability::init(&config.observability)?;
//!
//!     let tokens = Arc::new(TokenIssuer::new(&config.jwt_secret, config.jwt_expire));
//!     let state = api::AppState::new(api::Stores::memory(), Arc::new(LogNotifier), tokens, Arc::new(SystemClock))
//!         .with_otp_policy(config.otp.clone())
//!         .with_lockout_policy(config.lockout.clone());
//!
//!     let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
//!     axum::serve(listener, api::app(state, &config.http)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Storage
//!
//! The in-memory store is the default. Enable the `postgres` feature and
//! set `DATABASE_URL` to persist to PostgreSQL through sqlx.

pub mod accounts;
pub mod admin;
pub mod api;
pub mod audit;
pub mod clock;
pub mod config;
pub mod crypto;
#[cfg(feature = "postgres")]
pub mod database;
pub mod error;
pub mod gate;
pub mod layers;
pub mod login;
pub mod model;
pub mod notifier;
pub mod observability;
pub mod otp;
pub mod parse;
pub mod password;
pub mod store;
pub mod tasks;
pub mod testing;
pub mod token;
pub mod validation;

// Re-exports
pub use api::{app, AppState, Stores};
pub use config::{AppConfig, HttpConfig};
pub use error::{AppError, ErrorKind};
pub use layers::SecureRouter;
pub use parse::{parse_duration, parse_size};
