//! Account lifecycle
//!
//! Registration, email verification by OTP, resend with cooldown, login
//! with attempt lockout, and token issue. Decisions are made by the pure
//! state functions in [`crate::otp`] and [`crate::login`]; every write is
//! a single atomic [`AccountStore`] call, so concurrent requests against
//! the same account cannot lose an attempt or verify twice.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::{delta, Clock};
use crate::crypto::generate_otp;
use crate::login::{FailedLogin, LockoutPolicy};
use crate::model::{Account, AccountId, AccountProfile, AccountStatus, NewAccount, Role};
use crate::notifier::{DeliveryError, Notifier, OtpEmail};
use crate::observability::SecurityEvent;
use crate::otp::{OtpCheck, OtpPolicy, OtpState};
use crate::password::{dummy_verify, hash_password, verify_password};
use crate::security_event;
use crate::store::{AccountStore, StoreError};
use crate::token::{TokenError, TokenIssuer};

/// Account lifecycle failures
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("User with this email already exists and is verified.")]
    AlreadyRegistered,
    #[error("User not found. Please register first.")]
    NotFound,
    #[error("Email is already verified.")]
    AlreadyVerified,
    #[error("Too many failed attempts. Please request a new OTP.")]
    TooManyAttempts,
    #[error("No OTP found. Please request a new one.")]
    OtpMissing,
    #[error("OTP has expired. Please request a new one.")]
    OtpExpired,
    #[error("Invalid OTP.")]
    OtpMismatch { attempts_left: u32 },
    #[error("Please wait {retry_after_secs} seconds before requesting a new OTP.")]
    ResendCooldown { retry_after_secs: u64 },
    #[error("Invalid email or password.")]
    InvalidCredentials,
    #[error("Account is temporarily locked due to multiple failed login attempts. Please try again later.")]
    Locked { retry_after_secs: u64 },
    #[error("Please verify your email before logging in. Check your inbox for OTP.")]
    Unverified,
    #[error("Account is suspended or deleted. Please contact support.")]
    Inactive,
    #[error("Failed to send verification email. Please try again.")]
    Delivery(#[source] DeliveryError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Outcome of [`AccountService::register`]
#[derive(Debug, Clone)]
pub struct Registration {
    pub account_id: AccountId,
    pub email: String,
    pub name: String,
    pub otp_expires_in_minutes: u64,
    /// `false` when an existing unverified account was sent a fresh code
    pub created: bool,
}

/// A verified identity plus its bearer token
#[derive(Debug, Clone)]
pub struct Session {
    pub account: AccountProfile,
    pub token: String,
}

/// Trim and lowercase an email for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

async fn hash_blocking(password: &str) -> Result<String, AccountError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AccountError::Hashing(e.to_string()))?
        .map_err(|e| AccountError::Hashing(e.to_string()))
}

async fn verify_blocking(password: &str, hash: &str) -> Result<bool, AccountError> {
    let password = password.to_owned();
    let hash = hash.to_owned();
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AccountError::Hashing(e.to_string()))
}

async fn dummy_verify_blocking(password: &str) {
    let password = password.to_owned();
    let _ = tokio::task::spawn_blocking(move || dummy_verify(&password)).await;
}

/// Account lifecycle engine
#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    notifier: Arc<dyn Notifier>,
    tokens: Arc<TokenIssuer>,
    clock: Arc<dyn Clock>,
    otp_policy: OtpPolicy,
    lockout: LockoutPolicy,
}

impl AccountService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        notifier: Arc<dyn Notifier>,
        tokens: Arc<TokenIssuer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts,
            notifier,
            tokens,
            clock,
            otp_policy: OtpPolicy::default(),
            lockout: LockoutPolicy::default(),
        }
    }

    pub fn with_otp_policy(mut self, policy: OtpPolicy) -> Self {
        self.otp_policy = policy;
        self
    }

    pub fn with_lockout_policy(mut self, policy: LockoutPolicy) -> Self {
        self.lockout = policy;
        self
    }

    pub fn otp_policy(&self) -> &OtpPolicy {
        &self.otp_policy
    }

    fn fresh_otp(&self) -> OtpState {
        OtpState::issue(generate_otp(), self.clock.now(), &self.otp_policy)
    }

    async fn send_code(&self, account: &Account, otp: &OtpState) -> Result<(), DeliveryError> {
        let email = OtpEmail {
            to: account.email.clone(),
            recipient_name: account.name.clone(),
            code: otp.code.clone(),
            expires_in_minutes: self.otp_policy.expiry_minutes(),
        };
        self.notifier.send_otp(&email).await?;
        security_event!(SecurityEvent::OtpSent, account_id = %account.id, "Verification code sent");
        Ok(())
    }

    fn session(&self, account: &Account) -> Result<Session, AccountError> {
        Ok(Session {
            account: account.profile(),
            token: self.tokens.issue(account.id)?,
        })
    }

    /// Register a new account, or re-send a code to an unverified one.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<Registration, AccountError> {
        let name = name.trim();
        let email = normalize_email(email);

        if let Some(existing) = self.accounts.find_account_by_email(&email).await? {
            if existing.email_verified {
                return Err(AccountError::AlreadyRegistered);
            }

            let (account, otp) = self.reissue_code(&existing).await.map_err(|e| match e {
                AccountError::AlreadyVerified => AccountError::AlreadyRegistered,
                other => other,
            })?;
            self.send_code(&account, &otp).await.map_err(AccountError::Delivery)?;

            return Ok(Registration {
                account_id: account.id,
                email: account.email,
                name: account.name,
                otp_expires_in_minutes: self.otp_policy.expiry_minutes(),
                created: false,
            });
        }

        let password_hash = hash_blocking(password).await?;
        let otp = self.fresh_otp();
        let account = self
            .accounts
            .insert_account(
                NewAccount {
                    name: name.to_string(),
                    email,
                    password_hash,
                    role: Role::User,
                    email_verified: false,
                    otp: Some(otp.clone()),
                },
                self.clock.now(),
            )
            .await?;

        if let Err(e) = self.send_code(&account, &otp).await {
            warn!(account_id = %account.id, error = %e, "Verification email failed, rolling back registration");
            if let Err(rollback) = self.accounts.delete_account(account.id).await {
                warn!(account_id = %account.id, error = %rollback, "Registration rollback failed");
            }
            return Err(AccountError::Delivery(e));
        }

        security_event!(SecurityEvent::AccountRegistered, account_id = %account.id, "Account registered");
        Ok(Registration {
            account_id: account.id,
            email: account.email,
            name: account.name,
            otp_expires_in_minutes: self.otp_policy.expiry_minutes(),
            created: true,
        })
    }

    /// Check a submitted code and, on success, verify the email and log in.
    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<Session, AccountError> {
        let email = normalize_email(email);
        let account = self
            .accounts
            .find_account_by_email(&email)
            .await?
            .ok_or(AccountError::NotFound)?;

        if account.email_verified {
            return Err(AccountError::AlreadyVerified);
        }
        let otp = account.otp.as_ref().ok_or(AccountError::OtpMissing)?;

        let now = self.clock.now();
        match otp.check(code, now, &self.otp_policy) {
            OtpCheck::TooManyAttempts => Err(self.attempts_exhausted(account.id)),
            OtpCheck::Expired => Err(AccountError::OtpExpired),
            OtpCheck::Mismatch { .. } => {
                let Some(attempts) = self
                    .accounts
                    .record_otp_failure(account.id, now, &self.otp_policy)
                    .await?
                else {
                    return Err(self.verification_refused(account.id).await);
                };
                let attempts_left = self.otp_policy.max_attempts.saturating_sub(attempts);
                security_event!(
                    SecurityEvent::OtpRejected,
                    account_id = %account.id,
                    attempts_left,
                    "Wrong verification code"
                );
                Err(AccountError::OtpMismatch { attempts_left })
            }
            OtpCheck::Match => {
                let Some(verified) = self
                    .accounts
                    .complete_verification(account.id, &otp.code, now, &self.otp_policy)
                    .await?
                else {
                    return Err(self.verification_refused(account.id).await);
                };
                security_event!(SecurityEvent::EmailVerified, account_id = %verified.id, "Email verified");
                self.session(&verified)
            }
        }
    }

    fn attempts_exhausted(&self, id: AccountId) -> AccountError {
        security_event!(SecurityEvent::RateLimitExceeded, account_id = %id, "OTP attempt budget exhausted");
        AccountError::TooManyAttempts
    }

    /// Explain a refused verification write from the account's current state.
    /// Concurrent submissions, a resend or the clock may have moved it on.
    async fn verification_refused(&self, id: AccountId) -> AccountError {
        let account = match self.accounts.find_account(id).await {
            Ok(Some(account)) => account,
            Ok(None) => return AccountError::NotFound,
            Err(e) => return e.into(),
        };
        if account.email_verified {
            return AccountError::AlreadyVerified;
        }
        let Some(otp) = account.otp else {
            return AccountError::OtpMissing;
        };
        if otp.attempts >= self.otp_policy.max_attempts {
            self.attempts_exhausted(id)
        } else if self.clock.now() > otp.expires_at {
            AccountError::OtpExpired
        } else {
            // The code was replaced by a resend
            AccountError::OtpMismatch {
                attempts_left: self.otp_policy.max_attempts - otp.attempts,
            }
        }
    }

    /// Issue and send a fresh code, subject to the resend cooldown.
    pub async fn resend_otp(&self, email: &str) -> Result<u64, AccountError> {
        let email = normalize_email(email);
        let account = self
            .accounts
            .find_account_by_email(&email)
            .await?
            .ok_or(AccountError::NotFound)?;

        if account.email_verified {
            return Err(AccountError::AlreadyVerified);
        }

        let (updated, otp) = self.reissue_code(&account).await?;
        self.send_code(&updated, &otp).await.map_err(AccountError::Delivery)?;
        Ok(self.otp_policy.expiry_minutes())
    }

    /// Store a fresh code on an unverified account, subject to the resend
    /// cooldown. The caller sends it.
    async fn reissue_code(&self, account: &Account) -> Result<(Account, OtpState), AccountError> {
        let now = self.clock.now();
        if let Some(retry_after_secs) = account
            .otp
            .as_ref()
            .and_then(|otp| otp.resend_wait(now, &self.otp_policy))
        {
            return Err(AccountError::ResendCooldown { retry_after_secs });
        }

        let otp = self.fresh_otp();
        let cutoff = now - delta(self.otp_policy.resend_cooldown);
        if let Some(updated) = self.accounts.replace_otp(account.id, otp.clone(), Some(cutoff)).await? {
            return Ok((updated, otp));
        }

        // Lost a race with another send or a verification
        let current = self
            .accounts
            .find_account(account.id)
            .await?
            .ok_or(AccountError::NotFound)?;
        if current.email_verified {
            return Err(AccountError::AlreadyVerified);
        }
        let retry_after_secs = current
            .otp
            .as_ref()
            .and_then(|otp| otp.resend_wait(self.clock.now(), &self.otp_policy))
            .unwrap_or(1);
        Err(AccountError::ResendCooldown { retry_after_secs })
    }

    /// Authenticate with email and password.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AccountError> {
        let email = normalize_email(email);
        let Some(account) = self.accounts.find_account_by_email(&email).await? else {
            dummy_verify_blocking(password).await;
            security_event!(SecurityEvent::LoginFailure, reason = "unknown_email", "Login failed");
            return Err(AccountError::InvalidCredentials);
        };

        let now = self.clock.now();
        if let Some(lock) = account.lock.lockout(now) {
            security_event!(SecurityEvent::LoginFailure, account_id = %account.id, reason = "locked", "Login refused");
            return Err(AccountError::Locked {
                retry_after_secs: lock.remaining_secs(),
            });
        }
        if !account.email_verified {
            return Err(AccountError::Unverified);
        }
        if account.status != AccountStatus::Active {
            return Err(AccountError::Inactive);
        }

        if !verify_blocking(password, &account.password_hash).await? {
            let now = self.clock.now();
            match self.accounts.record_login_failure(account.id, now, &self.lockout).await? {
                FailedLogin::Locked(lock) => {
                    security_event!(SecurityEvent::LoginFailure, account_id = %account.id, reason = "locked", "Login refused");
                    return Err(AccountError::Locked {
                        retry_after_secs: lock.remaining_secs(),
                    });
                }
                FailedLogin::Counted { state, newly_locked } => {
                    security_event!(
                        SecurityEvent::LoginFailure,
                        account_id = %account.id,
                        failed_attempts = state.failed_attempts,
                        reason = "invalid_password",
                        "Login failed"
                    );
                    if newly_locked {
                        security_event!(SecurityEvent::AccountLocked, account_id = %account.id, "Account locked after repeated failures");
                    }
                    return Err(AccountError::InvalidCredentials);
                }
            }
        }

        let now = self.clock.now();
        if !self.accounts.clear_login_failures(account.id, now).await? {
            // Locked by concurrent failures while this password was checked
            let retry_after_secs = self
                .accounts
                .find_account(account.id)
                .await?
                .and_then(|current| current.lock.lockout(now))
                .map_or(1, |lock| lock.remaining_secs());
            security_event!(SecurityEvent::LoginFailure, account_id = %account.id, reason = "locked", "Login refused");
            return Err(AccountError::Locked { retry_after_secs });
        }
        security_event!(SecurityEvent::LoginSuccess, account_id = %account.id, "Login succeeded");
        self.session(&account)
    }

    /// Current profile of an authenticated account
    pub async fn profile(&self, id: AccountId) -> Result<AccountProfile, AccountError> {
        self.accounts
            .find_account(id)
            .await?
            .map(|a| a.profile())
            .ok_or(AccountError::NotFound)
    }

    /// Ensure a verified, active admin exists for `email`. Returns `false`
    /// when the email was already taken.
    pub async fn bootstrap_admin(&self, name: &str, email: &str, password: &str) -> Result<bool, AccountError> {
        let email = normalize_email(email);
        if self.accounts.find_account_by_email(&email).await?.is_some() {
            debug!(email = %email, "Admin account already present");
            return Ok(false);
        }

        let password_hash = hash_blocking(password).await?;
        let account = self
            .accounts
            .insert_account(
                NewAccount {
                    name: name.trim().to_string(),
                    email,
                    password_hash,
                    role: Role::Admin,
                    email_verified: true,
                    otp: None,
                },
                self.clock.now(),
            )
            .await?;
        security_event!(SecurityEvent::AdminBootstrapped, account_id = %account.id, "Initial admin account created");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{FixedClock, RecordingNotifier};
    use std::time::Duration;

    const PASSWORD: &str = "Secret123";

    struct Harness {
        service: AccountService,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<FixedClock>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(FixedClock::default());
        let tokens = Arc::new(TokenIssuer::new(
            "unit-test-secret-that-is-long-enough-000",
            Duration::from_secs(3600),
        ));
        let service = AccountService::new(store.clone(), notifier.clone(), tokens, clock.clone())
            .with_lockout_policy(
                LockoutPolicy::builder()
                    .max_attempts(5)
                    .lockout_duration(Duration::from_secs(60))
                    .build(),
            );
        Harness { service, store, notifier, clock }
    }

    async fn registered(h: &Harness, email: &str) -> String {
        h.service.register("Alice", email, PASSWORD).await.unwrap();
        h.notifier.last_code(email).unwrap()
    }

    async fn verified(h: &Harness, email: &str) {
        let code = registered(h, email).await;
        h.service.verify_otp(email, &code).await.unwrap();
    }

    #[tokio::test]
    async fn test_register_normalizes_and_sends_code() {
        let h = harness();
        let reg = h.service.register("  Alice ", " Alice@Example.COM ", PASSWORD).await.unwrap();
        assert!(reg.created);
        assert_eq!(reg.email, "alice@example.com");
        assert_eq!(reg.name, "Alice");
        assert_eq!(reg.otp_expires_in_minutes, 10);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@example.com");
        assert_eq!(sent[0].recipient_name, "Alice");
        assert_eq!(sent[0].expires_in_minutes, 10);
        assert_eq!(sent[0].code.len(), 6);

        let stored = h.store.find_account(reg.account_id).await.unwrap().unwrap();
        assert!(!stored.email_verified);
        assert_ne!(stored.password_hash, PASSWORD);
    }

    #[tokio::test]
    async fn test_register_rolls_back_on_delivery_failure() {
        let h = harness();
        h.notifier.fail_deliveries(true);
        let err = h.service.register("Alice", "a@x.com", PASSWORD).await.unwrap_err();
        assert!(matches!(err, AccountError::Delivery(_)));
        assert!(h.store.find_account_by_email("a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reregister_unverified_resends() {
        let h = harness();
        let first = registered(&h, "a@x.com").await;
        h.clock.advance(Duration::from_secs(61));
        let reg = h.service.register("Alice", "a@x.com", PASSWORD).await.unwrap();
        assert!(!reg.created);
        assert_eq!(h.notifier.sent_count("a@x.com"), 2);
        let second = h.notifier.last_code("a@x.com").unwrap();
        if first != second {
            assert!(matches!(
                h.service.verify_otp("a@x.com", &first).await,
                Err(AccountError::OtpMismatch { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_reregister_respects_cooldown_and_budget() {
        let h = harness();
        let code = registered(&h, "a@x.com").await;
        let wrong = if code == "111111" { "222222" } else { "111111" };
        for _ in 0..5 {
            let _ = h.service.verify_otp("a@x.com", wrong).await;
        }

        h.clock.advance(Duration::from_secs(30));
        match h.service.register("Alice", "a@x.com", PASSWORD).await {
            Err(AccountError::ResendCooldown { retry_after_secs }) => assert_eq!(retry_after_secs, 30),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert_eq!(h.notifier.sent_count("a@x.com"), 1);
        assert!(matches!(
            h.service.verify_otp("a@x.com", &code).await,
            Err(AccountError::TooManyAttempts)
        ));
    }

    #[tokio::test]
    async fn test_register_verified_conflicts() {
        let h = harness();
        verified(&h, "a@x.com").await;
        let err = h.service.register("Alice", "a@x.com", PASSWORD).await.unwrap_err();
        assert!(matches!(err, AccountError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn test_verify_once() {
        let h = harness();
        let code = registered(&h, "a@x.com").await;
        let session = h.service.verify_otp("a@x.com", &code).await.unwrap();
        assert!(session.account.email_verified);
        assert!(!session.token.is_empty());

        let err = h.service.verify_otp("a@x.com", &code).await.unwrap_err();
        assert!(matches!(err, AccountError::AlreadyVerified));
    }

    #[tokio::test]
    async fn test_wrong_codes_exhaust_budget() {
        let h = harness();
        let code = registered(&h, "a@x.com").await;
        let wrong = if code == "111111" { "222222" } else { "111111" };

        for expected_left in (0..5).rev() {
            match h.service.verify_otp("a@x.com", wrong).await {
                Err(AccountError::OtpMismatch { attempts_left }) => assert_eq!(attempts_left, expected_left),
                other => panic!("unexpected {:?}", other.map(|_| ())),
            }
        }
        let account = h.store.find_account_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(account.otp.unwrap().attempts, 5);

        let err = h.service.verify_otp("a@x.com", &code).await.unwrap_err();
        assert!(matches!(err, AccountError::TooManyAttempts));

        h.clock.advance(Duration::from_secs(61));
        h.service.resend_otp("a@x.com").await.unwrap();
        let fresh = h.notifier.last_code("a@x.com").unwrap();
        h.service.verify_otp("a@x.com", &fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_code() {
        let h = harness();
        let code = registered(&h, "a@x.com").await;
        h.clock.advance(Duration::from_secs(10 * 60 + 1));
        let err = h.service.verify_otp("a@x.com", &code).await.unwrap_err();
        assert!(matches!(err, AccountError::OtpExpired));
    }

    #[tokio::test]
    async fn test_verify_unknown_email() {
        let h = harness();
        let err = h.service.verify_otp("nobody@x.com", "123456").await.unwrap_err();
        assert!(matches!(err, AccountError::NotFound));
    }

    #[tokio::test]
    async fn test_resend_cooldown() {
        let h = harness();
        registered(&h, "a@x.com").await;

        h.clock.advance(Duration::from_secs(20));
        match h.service.resend_otp("a@x.com").await {
            Err(AccountError::ResendCooldown { retry_after_secs }) => assert_eq!(retry_after_secs, 40),
            other => panic!("unexpected {:?}", other),
        }

        h.clock.advance(Duration::from_secs(40));
        assert_eq!(h.service.resend_otp("a@x.com").await.unwrap(), 10);
        assert_eq!(h.notifier.sent_count("a@x.com"), 2);
    }

    #[tokio::test]
    async fn test_resend_after_verify() {
        let h = harness();
        verified(&h, "a@x.com").await;
        assert!(matches!(
            h.service.resend_otp("a@x.com").await,
            Err(AccountError::AlreadyVerified)
        ));
    }

    #[tokio::test]
    async fn test_login_requires_verification() {
        let h = harness();
        registered(&h, "a@x.com").await;
        let err = h.service.login("a@x.com", PASSWORD).await.unwrap_err();
        assert!(matches!(err, AccountError::Unverified));
    }

    #[tokio::test]
    async fn test_login_unknown_email_matches_wrong_password() {
        let h = harness();
        verified(&h, "a@x.com").await;
        let unknown = h.service.login("ghost@x.com", PASSWORD).await.unwrap_err();
        let wrong = h.service.login("a@x.com", "Wrong123").await.unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn test_lockout_and_lapse() {
        let h = harness();
        verified(&h, "a@x.com").await;

        for _ in 0..5 {
            assert!(matches!(
                h.service.login("a@x.com", "Wrong123").await,
                Err(AccountError::InvalidCredentials)
            ));
        }
        match h.service.login("a@x.com", PASSWORD).await {
            Err(AccountError::Locked { retry_after_secs }) => assert_eq!(retry_after_secs, 60),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }

        h.clock.advance(Duration::from_secs(61));
        let session = h.service.login("a@x.com", PASSWORD).await.unwrap();
        assert_eq!(session.account.email, "a@x.com");

        let account = h.store.find_account_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(account.lock.failed_attempts, 0);
        assert!(account.lock.locked_until.is_none());
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let h = harness();
        verified(&h, "a@x.com").await;
        for _ in 0..3 {
            let _ = h.service.login("a@x.com", "Wrong123").await;
        }
        h.service.login("a@x.com", PASSWORD).await.unwrap();
        for _ in 0..4 {
            let _ = h.service.login("a@x.com", "Wrong123").await;
        }
        assert!(h.service.login("a@x.com", PASSWORD).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_wrong_passwords_stop_at_lock() {
        let h = harness();
        verified(&h, "a@x.com").await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = h.service.clone();
            handles.push(tokio::spawn(async move { service.login("a@x.com", "Wrong123").await }));
        }
        let (mut rejected, mut locked) = (0, 0);
        for handle in handles {
            match handle.await.unwrap() {
                Err(AccountError::InvalidCredentials) => rejected += 1,
                Err(AccountError::Locked { .. }) => locked += 1,
                other => panic!("unexpected {:?}", other.map(|_| ())),
            }
        }
        assert_eq!(rejected, 5);
        assert_eq!(locked, 15);

        let account = h.store.find_account_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(account.lock.failed_attempts, 5);
        assert!(matches!(
            h.service.login("a@x.com", PASSWORD).await,
            Err(AccountError::Locked { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_burst_with_good_password_keeps_budget() {
        let h = harness();
        verified(&h, "a@x.com").await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let service = h.service.clone();
            let password = if i == 10 { PASSWORD } else { "Wrong123" };
            handles.push(tokio::spawn(async move { service.login("a@x.com", password).await }));
        }
        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AccountError::InvalidCredentials | AccountError::Locked { .. }) => {}
                Err(other) => panic!("unexpected {other:?}"),
            }
        }
        assert!(succeeded <= 1);

        let account = h.store.find_account_by_email("a@x.com").await.unwrap().unwrap();
        assert!(account.lock.failed_attempts <= 5);
        if succeeded == 0 {
            assert_eq!(account.lock.failed_attempts, 5);
            assert!(account.lock.is_locked(h.clock.now()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_wrong_codes_stop_at_budget() {
        let h = harness();
        let code = registered(&h, "a@x.com").await;
        let wrong = if code == "111111" { "222222" } else { "111111" };

        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = h.service.clone();
            handles.push(tokio::spawn(async move { service.verify_otp("a@x.com", wrong).await }));
        }
        let (mut mismatched, mut exhausted) = (0, 0);
        for handle in handles {
            match handle.await.unwrap() {
                Err(AccountError::OtpMismatch { .. }) => mismatched += 1,
                Err(AccountError::TooManyAttempts) => exhausted += 1,
                other => panic!("unexpected {:?}", other.map(|_| ())),
            }
        }
        assert_eq!(mismatched, 5);
        assert_eq!(exhausted, 15);

        let account = h.store.find_account_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(account.otp.as_ref().unwrap().attempts, 5);
        assert!(matches!(
            h.service.verify_otp("a@x.com", &code).await,
            Err(AccountError::TooManyAttempts)
        ));
        assert!(!h.store.find_account(account.id).await.unwrap().unwrap().email_verified);
    }

    #[tokio::test]
    async fn test_inactive_account_cannot_login() {
        let h = harness();
        verified(&h, "a@x.com").await;
        let account = h.store.find_account_by_email("a@x.com").await.unwrap().unwrap();
        h.store
            .set_status(account.id, AccountStatus::Suspended, h.clock.now())
            .await
            .unwrap();
        assert!(matches!(
            h.service.login("a@x.com", PASSWORD).await,
            Err(AccountError::Inactive)
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_admin_is_idempotent() {
        let h = harness();
        assert!(h.service.bootstrap_admin("Root", "root@x.com", PASSWORD).await.unwrap());
        assert!(!h.service.bootstrap_admin("Root", "root@x.com", PASSWORD).await.unwrap());
        let session = h.service.login("root@x.com", PASSWORD).await.unwrap();
        assert!(session.account.is_admin());
    }
}
