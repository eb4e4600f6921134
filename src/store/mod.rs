//! Credential store
//!
//! Persistence is behind two traits, [`AccountStore`] and [`TaskStore`].
//! Every read-modify-write on a single record is one trait method, and
//! each backend makes that method atomic with respect to other writers of
//! the same record:
//!
//! - [`MemoryStore`] runs the mutation under one write guard;
//! - `PgStore` (feature `postgres`) issues one conditional `UPDATE`.
//!
//! Engines never read a record, change it, and write it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::login::{FailedLogin, LockoutPolicy};
use crate::model::{
    Account, AccountId, AccountRef, AccountStats, AccountStatus, NewAccount, NewTask, PageRequest,
    Role, Task, TaskChanges, TaskId, TaskPriority, TaskStats, TaskStatus,
};
use crate::otp::{OtpPolicy, OtpState};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("record not found")]
    NotFound,
    #[error("store operation timed out")]
    Timeout,
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Filters for admin account listings. Deleted accounts are always excluded.
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    pub role: Option<Role>,
    pub verified: Option<bool>,
    /// Case-insensitive substring over name or email
    pub search: Option<String>,
}

impl AccountFilter {
    pub fn matches(&self, account: &Account) -> bool {
        if account.status == AccountStatus::Deleted {
            return false;
        }
        if self.role.is_some_and(|role| role != account.role) {
            return false;
        }
        if self.verified.is_some_and(|v| v != account.email_verified) {
            return false;
        }
        match &self.search {
            Some(needle) => {
                let needle = needle.to_lowercase();
                account.name.to_lowercase().contains(&needle)
                    || account.email.to_lowercase().contains(&needle)
            }
            None => true,
        }
    }
}

/// Filters for task listings and stats. Deleted tasks are always excluded.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to one owner (forced for non-admin callers)
    pub owner: Option<AccountId>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    /// Case-insensitive substring over title or description
    pub search: Option<String>,
}

impl TaskFilter {
    /// Scope-only filter used for statistics
    pub fn owned_by(owner: Option<AccountId>) -> Self {
        Self {
            owner,
            ..Self::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if task.is_deleted {
            return false;
        }
        if self.owner.is_some_and(|owner| owner != task.created_by) {
            return false;
        }
        if self.status.is_some_and(|status| status != task.status) {
            return false;
        }
        if self.priority.is_some_and(|priority| priority != task.priority) {
            return false;
        }
        match &self.search {
            Some(needle) => {
                let needle = needle.to_lowercase();
                task.title.to_lowercase().contains(&needle)
                    || task.description.to_lowercase().contains(&needle)
            }
            None => true,
        }
    }
}

/// Account persistence
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account. Fails with [`StoreError::DuplicateEmail`] if the
    /// email is taken, including by a concurrent insert.
    async fn insert_account(&self, account: NewAccount, now: DateTime<Utc>) -> Result<Account, StoreError>;

    /// Look up by id, including deleted accounts
    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Look up by normalized email, including deleted accounts
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Physically remove an account. Only used to roll back a registration
    /// whose first verification email could not be sent.
    async fn delete_account(&self, id: AccountId) -> Result<bool, StoreError>;

    /// Store a fresh OTP on an unverified account.
    ///
    /// With `sent_before: Some(cutoff)` the write only happens if the
    /// previous code was sent at or before `cutoff` (the resend cooldown).
    /// Returns the updated account, or `None` if the account is missing,
    /// already verified, or still cooling down.
    async fn replace_otp(
        &self,
        id: AccountId,
        otp: OtpState,
        sent_before: Option<DateTime<Utc>>,
    ) -> Result<Option<Account>, StoreError>;

    /// Count one wrong code against the pending OTP, but only while it is
    /// live ([`OtpState::is_live`]) on an unverified account. Returns the new
    /// count, or `None` when the write was refused.
    async fn record_otp_failure(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
        policy: &OtpPolicy,
    ) -> Result<Option<u32>, StoreError>;

    /// Mark the email verified and clear the OTP, but only if the account is
    /// still unverified and `code` matches a live pending OTP. Returns `None`
    /// when the write was refused.
    async fn complete_verification(
        &self,
        id: AccountId,
        code: &str,
        now: DateTime<Utc>,
        policy: &OtpPolicy,
    ) -> Result<Option<Account>, StoreError>;

    /// Apply [`charge_failure`](crate::login::LoginLockState::charge_failure) atomically. A failure
    /// against an active lock is not counted.
    async fn record_login_failure(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<FailedLogin, StoreError>;

    /// Clear the failed-login counter after a good password. Refused
    /// (`false`) while a lock is in force or the account is missing.
    async fn clear_login_failures(&self, id: AccountId, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Change the role of a non-deleted account
    async fn set_role(&self, id: AccountId, role: Role, now: DateTime<Utc>) -> Result<Option<Account>, StoreError>;

    /// Change the status of a non-deleted account (including to `Deleted`)
    async fn set_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError>;

    /// Non-deleted accounts matching `filter`, newest first, with the total
    async fn list_accounts(
        &self,
        filter: &AccountFilter,
        page: PageRequest,
    ) -> Result<(Vec<Account>, u64), StoreError>;

    /// Name and email for each id that exists
    async fn account_refs(&self, ids: &[AccountId]) -> Result<HashMap<AccountId, AccountRef>, StoreError>;

    /// Dashboard counts; `recent_since` bounds the registration window
    async fn account_stats(&self, recent_since: DateTime<Utc>) -> Result<AccountStats, StoreError>;

    /// Cheap liveness probe
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Task persistence
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: NewTask, now: DateTime<Utc>) -> Result<Task, StoreError>;

    /// Look up a non-deleted task
    async fn find_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Non-deleted tasks matching `filter`, newest first, with the total
    async fn list_tasks(&self, filter: &TaskFilter, page: PageRequest) -> Result<(Vec<Task>, u64), StoreError>;

    /// Apply allow-listed changes to a non-deleted task in one atomic step,
    /// including the `completed_at` rule of [`TaskChanges::apply`].
    async fn update_task(
        &self,
        id: TaskId,
        changes: &TaskChanges,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, StoreError>;

    /// Set `is_deleted`. Returns `false` if the task was missing or already
    /// deleted.
    async fn soft_delete_task(&self, id: TaskId, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Counts over non-deleted tasks matching `filter`
    async fn task_stats(&self, filter: &TaskFilter) -> Result<TaskStats, StoreError>;
}
