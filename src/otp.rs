//! Email verification codes
//!
//! [`OtpState`] is the pending-verification record carried on an account.
//! Checking a submitted code is a pure function returning an [`OtpCheck`]
//! verdict; the engine then commits the matching store operation.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::clock::delta;
use crate::crypto::constant_time_str_eq;

/// Code lifetime, resend cooldown and attempt budget.
#[derive(Debug, Clone)]
pub struct OtpPolicy {
    /// How long a code stays valid after issue
    pub expiry: Duration,
    /// Minimum gap between two sends to the same account
    pub resend_cooldown: Duration,
    /// Wrong submissions allowed before a fresh code is required
    pub max_attempts: u32,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            expiry: Duration::from_secs(10 * 60),
            resend_cooldown: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl OtpPolicy {
    /// Expiry in whole minutes, as shown to the user
    pub fn expiry_minutes(&self) -> u64 {
        self.expiry.as_secs() / 60
    }
}

/// Pending verification code for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpState {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    /// Wrong submissions against this code
    pub attempts: u32,
    pub last_sent_at: DateTime<Utc>,
}

/// Outcome of checking a submitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpCheck {
    /// Attempt budget already spent; only a resend helps
    TooManyAttempts,
    Expired,
    /// Wrong code; `attempts_left` counts this failure
    Mismatch { attempts_left: u32 },
    Match,
}

impl OtpState {
    /// Fresh state for a newly generated code
    pub fn issue(code: String, now: DateTime<Utc>, policy: &OtpPolicy) -> Self {
        Self {
            code,
            expires_at: now + delta(policy.expiry),
            attempts: 0,
            last_sent_at: now,
        }
    }

    /// Check a submitted code.
    ///
    /// Order matters: the attempt budget is checked first, then expiry, then
    /// the code itself (compared in constant time).
    pub fn check(&self, candidate: &str, now: DateTime<Utc>, policy: &OtpPolicy) -> OtpCheck {
        if self.attempts >= policy.max_attempts {
            return OtpCheck::TooManyAttempts;
        }
        if now > self.expires_at {
            return OtpCheck::Expired;
        }
        if !constant_time_str_eq(&self.code, candidate.trim()) {
            let used = self.attempts + 1;
            return OtpCheck::Mismatch {
                attempts_left: policy.max_attempts.saturating_sub(used),
            };
        }
        OtpCheck::Match
    }

    /// Still accepting submissions: under the attempt budget and unexpired
    pub fn is_live(&self, now: DateTime<Utc>, policy: &OtpPolicy) -> bool {
        self.attempts < policy.max_attempts && now <= self.expires_at
    }

    /// Seconds until another code may be sent, rounded up; `None` when the
    /// cooldown has passed.
    pub fn resend_wait(&self, now: DateTime<Utc>, policy: &OtpPolicy) -> Option<u64> {
        let ready_at = self.last_sent_at + delta(policy.resend_cooldown);
        if now >= ready_at {
            return None;
        }
        let remaining_ms = (ready_at - now).num_milliseconds().max(0) as u64;
        Some(remaining_ms.div_ceil(1000).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_issue_sets_expiry() {
        let policy = OtpPolicy::default();
        let state = OtpState::issue("123456".into(), t0(), &policy);
        assert_eq!(state.expires_at, t0() + chrono::Duration::minutes(10));
        assert_eq!(state.attempts, 0);
        assert_eq!(policy.expiry_minutes(), 10);
    }

    #[test]
    fn test_check_order() {
        let policy = OtpPolicy::default();
        let mut state = OtpState::issue("123456".into(), t0(), &policy);

        assert_eq!(state.check("123456", t0(), &policy), OtpCheck::Match);
        assert_eq!(
            state.check("000000", t0(), &policy),
            OtpCheck::Mismatch { attempts_left: 4 }
        );

        let late = t0() + chrono::Duration::minutes(11);
        assert_eq!(state.check("123456", late, &policy), OtpCheck::Expired);

        state.attempts = 5;
        assert_eq!(state.check("123456", t0(), &policy), OtpCheck::TooManyAttempts);
        assert_eq!(state.check("123456", late, &policy), OtpCheck::TooManyAttempts);
    }

    #[test]
    fn test_is_live() {
        let policy = OtpPolicy::default();
        let mut state = OtpState::issue("123456".into(), t0(), &policy);
        assert!(state.is_live(t0() + chrono::Duration::minutes(10), &policy));
        assert!(!state.is_live(t0() + chrono::Duration::minutes(11), &policy));
        state.attempts = 5;
        assert!(!state.is_live(t0(), &policy));
    }

    #[test]
    fn test_last_mismatch_reports_zero_left() {
        let policy = OtpPolicy::default();
        let mut state = OtpState::issue("123456".into(), t0(), &policy);
        state.attempts = 4;
        assert_eq!(
            state.check("999999", t0(), &policy),
            OtpCheck::Mismatch { attempts_left: 0 }
        );
    }

    #[test]
    fn test_resend_wait_rounds_up() {
        let policy = OtpPolicy::default();
        let state = OtpState::issue("123456".into(), t0(), &policy);
        assert_eq!(state.resend_wait(t0(), &policy), Some(60));
        let later = t0() + chrono::Duration::milliseconds(20_500);
        assert_eq!(state.resend_wait(later, &policy), Some(40));
        assert_eq!(state.resend_wait(t0() + chrono::Duration::seconds(60), &policy), None);
    }
}
