//! Login attempt lockout
//!
//! Consecutive failed logins are counted on the account itself. Reaching
//! [`LockoutPolicy::max_attempts`] locks the account for
//! [`LockoutPolicy::lockout_duration`]; the lock lapses on its own.
//!
//! The state transitions here are pure. Stores apply
//! [`LoginLockState::after_failure`] inside a single atomic update so two
//! concurrent wrong passwords can never under-count.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::clock::delta;

// ============================================================================
// Lockout Policy
// ============================================================================

/// Account lockout policy
#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    /// Consecutive failures that trigger a lock
    pub max_attempts: u32,
    /// How long the lock lasts
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_duration: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl LockoutPolicy {
    /// Create a builder for custom policy
    pub fn builder() -> LockoutPolicyBuilder {
        LockoutPolicyBuilder::default()
    }
}

/// Builder for [`LockoutPolicy`]
#[derive(Debug, Clone, Default)]
pub struct LockoutPolicyBuilder {
    policy: LockoutPolicy,
}

impl LockoutPolicyBuilder {
    /// Set consecutive failures before lockout
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts.max(1);
        self
    }

    /// Set lockout duration
    pub fn lockout_duration(mut self, duration: Duration) -> Self {
        self.policy.lockout_duration = duration;
        self
    }

    /// Build the policy
    pub fn build(self) -> LockoutPolicy {
        self.policy
    }
}

// ============================================================================
// Lock State
// ============================================================================

/// Failed-login counter and lock deadline stored on an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoginLockState {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LoginLockState {
    /// Whether a lock is in force at `now`
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Lock details if locked at `now`
    pub fn lockout(&self, now: DateTime<Utc>) -> Option<LockoutInfo> {
        self.locked_until
            .filter(|until| *until > now)
            .map(|until| LockoutInfo { locked_until: until, now })
    }

    /// State after one more failed login.
    ///
    /// A failure after an expired lock restarts the count at 1. Otherwise
    /// the count increments, and the lock is set once the count reaches the
    /// threshold (an existing lock is never extended).
    pub fn after_failure(&self, now: DateTime<Utc>, policy: &LockoutPolicy) -> LoginLockState {
        if self.locked_until.is_some_and(|until| until <= now) {
            return LoginLockState {
                failed_attempts: 1,
                locked_until: None,
            };
        }

        let failed_attempts = self.failed_attempts.saturating_add(1);
        let locked_until = if failed_attempts >= policy.max_attempts && self.locked_until.is_none() {
            Some(now + delta(policy.lockout_duration))
        } else {
            self.locked_until
        };

        LoginLockState {
            failed_attempts,
            locked_until,
        }
    }

    /// Charge one failed login. Nothing is counted while a lock is in
    /// force, so the budget can not be overdrawn by requests that raced
    /// past an earlier lock check.
    pub fn charge_failure(&self, now: DateTime<Utc>, policy: &LockoutPolicy) -> FailedLogin {
        if let Some(lock) = self.lockout(now) {
            return FailedLogin::Locked(lock);
        }
        let state = self.after_failure(now, policy);
        FailedLogin::Counted {
            state,
            newly_locked: state.locked_until.is_some(),
        }
    }

    /// State after a successful login
    pub fn cleared() -> LoginLockState {
        LoginLockState::default()
    }
}

/// Result of charging a failed login to an account
#[derive(Debug, Clone, Copy)]
pub enum FailedLogin {
    /// Counted; `newly_locked` when this failure set the lock
    Counted { state: LoginLockState, newly_locked: bool },
    /// Already locked; the failure was not counted
    Locked(LockoutInfo),
}

/// An active lock
#[derive(Debug, Clone, Copy)]
pub struct LockoutInfo {
    pub locked_until: DateTime<Utc>,
    now: DateTime<Utc>,
}

impl LockoutInfo {
    /// Whole seconds remaining, rounded up
    pub fn remaining_secs(&self) -> u64 {
        let ms = (self.locked_until - self.now).num_milliseconds().max(0) as u64;
        ms.div_ceil(1000)
    }
}
