//! Test support
//!
//! Deterministic collaborators for exercising the engines and the router
//! without a database, an email relay or real time:
//!
//! - [`FixedClock`]: a clock that only moves when told to
//! - [`RecordingNotifier`]: captures every code sent, and can be switched
//!   to fail
//! - [`TestApp`]: a fully wired [`AppState`] over a [`MemoryStore`]
//!
//! ```ignore
//! let app = TestApp::new();
//! let alice = app.verified_account("Alice", "alice@example.com", "Secret123").await;
//! let response = app.router().oneshot(request).await?;
//! ```

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::Router;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::accounts::Session;
use crate::api::{self, AppState, Stores};
use crate::clock::{delta, Clock};
use crate::config::HttpConfig;
use crate::login::LockoutPolicy;
use crate::model::{AccountStatus, Role};
use crate::notifier::{DeliveryError, Notifier, OtpEmail};
use crate::store::{AccountStore, MemoryStore};
use crate::token::TokenIssuer;

/// Secret used by every test token issuer
pub const TEST_JWT_SECRET: &str = "test-only-jwt-secret-with-enough-entropy-0123";

// ============================================================================
// Clock
// ============================================================================

/// Manually advanced clock
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += delta(by);
    }

    /// Jump to an absolute instant, backwards included
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Notifier that records deliveries instead of sending them
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OtpEmail>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent delivery fail (or succeed again)
    pub fn fail_deliveries(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    /// Most recent code sent to `email`
    pub fn last_code(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|m| m.to == email)
            .map(|m| m.code.clone())
    }

    /// Number of codes sent to `email`
    pub fn sent_count(&self, email: &str) -> usize {
        self.sent.lock().iter().filter(|m| m.to == email).count()
    }

    /// Every delivery so far, oldest first
    pub fn sent(&self) -> Vec<OtpEmail> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_otp(&self, email: &OtpEmail) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected(503));
        }
        self.sent.lock().push(email.clone());
        Ok(())
    }
}

// ============================================================================
// Wired application
// ============================================================================

/// Application state over in-memory collaborators
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<FixedClock>,
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_lockout(LockoutPolicy::default())
    }

    pub fn with_lockout(lockout: LockoutPolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(FixedClock::default());
        let tokens = Arc::new(TokenIssuer::new(TEST_JWT_SECRET, Duration::from_secs(3600)));

        let stores = Stores {
            accounts: store.clone(),
            tasks: store.clone(),
        };
        let state = AppState::new(stores, notifier.clone(), tokens, clock.clone()).with_lockout_policy(lockout);

        Self {
            state,
            store,
            notifier,
            clock,
        }
    }

    /// Router with the production layer stack, minus the per-IP rate
    /// limiter (requests sent with `oneshot` carry no peer address).
    pub fn router(&self) -> Router {
        api::app(self.state.clone(), &test_http_config())
    }

    /// Register and verify an account, returning its session
    pub async fn verified_account(&self, name: &str, email: &str, password: &str) -> Session {
        self.state
            .accounts
            .register(name, email, password)
            .await
            .expect("register");
        let code = self.notifier.last_code(email).expect("code sent");
        self.state.accounts.verify_otp(email, &code).await.expect("verify")
    }

    /// Verified account promoted to admin
    pub async fn admin_account(&self, name: &str, email: &str, password: &str) -> Session {
        let session = self.verified_account(name, email, password).await;
        self.store
            .set_role(session.account.id, Role::Admin, self.clock.now())
            .await
            .expect("set role")
            .expect("account exists");
        let account = self
            .store
            .find_account(session.account.id)
            .await
            .expect("find")
            .expect("account exists");
        Session {
            account: account.profile(),
            token: session.token,
        }
    }

    /// Change an account's status directly in the store
    pub async fn set_status(&self, session: &Session, status: AccountStatus) {
        self.store
            .set_status(session.account.id, status, self.clock.now())
            .await
            .expect("set status");
    }
}

/// HTTP settings used by [`TestApp::router`]
pub fn test_http_config() -> HttpConfig {
    HttpConfig {
        rate_limit_enabled: false,
        ..HttpConfig::default()
    }
}

// ============================================================================
// Assertions
// ============================================================================

/// Security headers every API response must carry
pub const REQUIRED_SECURITY_HEADERS: &[&str] = &[
    "x-content-type-options",
    "x-frame-options",
    "cache-control",
    "content-security-policy",
];

/// Required security headers absent from `headers`
pub fn missing_security_headers(headers: &HeaderMap) -> Vec<&'static str> {
    REQUIRED_SECURITY_HEADERS
        .iter()
        .copied()
        .filter(|name| !headers.contains_key(*name))
        .collect()
}

/// Common weak passwords for policy tests
pub fn weak_passwords() -> Vec<&'static str> {
    vec![
        "password",
        "123456",
        "12345678",
        "qwerty",
        "abc123",
        "password1",
        "letmein",
        "iloveyou",
        "trustno1",
        "PASSWORD",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::PasswordPolicy;

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::default();
        let start = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        let email = OtpEmail {
            to: "a@x.com".into(),
            recipient_name: "A".into(),
            code: "123456".into(),
            expires_in_minutes: 10,
        };
        notifier.send_otp(&email).await.unwrap();
        assert_eq!(notifier.last_code("a@x.com").as_deref(), Some("123456"));

        notifier.fail_deliveries(true);
        assert!(notifier.send_otp(&email).await.is_err());
        assert_eq!(notifier.sent_count("a@x.com"), 1);
    }

    #[test]
    fn test_default_policy_rejects_weak_passwords() {
        let policy = PasswordPolicy::default();
        for password in weak_passwords() {
            assert!(!policy.check(password).is_empty(), "accepted weak password {password}");
        }
    }
}
