//! Domain records and their public projections
//!
//! [`Account`] and [`Task`] are the stored records. What leaves the
//! service is always a projection: [`AccountProfile`] never carries the
//! password hash, OTP state or lock state, and [`TaskView`] resolves owner
//! references to names and adds the derived `isOverdue` flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::login::LoginLockState;
use crate::otp::OtpState;

pub type AccountId = Uuid;
pub type TaskId = Uuid;

/// Error parsing one of the string-backed enums below
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Wire and storage representation
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

string_enum!(Role, "role", { User => "user", Admin => "admin" });

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Suspended,
    /// Terminal soft-delete state
    Deleted,
}

string_enum!(AccountStatus, "account status", {
    Active => "active",
    Suspended => "suspended",
    Deleted => "deleted",
});

/// Stored account record
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    /// Trimmed and lowercased
    pub email: String,
    /// Argon2id PHC string
    pub password_hash: String,
    pub role: Role,
    pub email_verified: bool,
    /// Present only while verification is pending
    pub otp: Option<OtpState>,
    pub status: AccountStatus,
    pub lock: LoginLockState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Public projection
    pub fn profile(&self) -> AccountProfile {
        AccountProfile {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            email_verified: self.email_verified,
            account_status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn reference(&self) -> AccountRef {
        AccountRef {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Values for inserting an account; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub email_verified: bool,
    pub otp: Option<OtpState>,
}

/// Account as returned by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProfile {
    pub id: AccountId,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(rename = "isEmailVerified")]
    pub email_verified: bool,
    pub account_status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountProfile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Owner or assignee shown on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRef {
    pub id: AccountId,
    pub name: String,
    pub email: String,
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

string_enum!(TaskStatus, "task status", {
    Pending => "pending",
    InProgress => "in-progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

string_enum!(TaskPriority, "task priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});

impl TaskPriority {
    /// High and urgent form the "high priority" bucket
    pub fn is_high(&self) -> bool {
        matches!(self, Self::High | Self::Urgent)
    }
}

/// Stored task record
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Immutable owner
    pub created_by: AccountId,
    pub assigned_to: Option<AccountId>,
    pub due_date: Option<DateTime<Utc>>,
    /// Stamped on entering `completed`; never cleared
    pub completed_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Past due and still open
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.due_date {
            Some(due) => {
                due < now && !matches!(self.status, TaskStatus::Completed | TaskStatus::Cancelled)
            }
            None => false,
        }
    }
}

/// Values for inserting a task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub created_by: AccountId,
    pub assigned_to: Option<AccountId>,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

/// Allow-listed task fields an update may change.
///
/// `due_date` is doubly optional: `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub tags: Option<Vec<String>>,
}

impl TaskChanges {
    /// Apply to a task in place.
    ///
    /// `completed_at` is stamped only when the status moves into
    /// `completed` from another status. Leaving `completed` keeps it.
    pub fn apply(&self, task: &mut Task, now: DateTime<Utc>) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(status) = self.status {
            if status == TaskStatus::Completed && task.status != TaskStatus::Completed {
                task.completed_at = Some(now);
            }
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(tags) = &self.tags {
            task.tags = tags.clone();
        }
        task.updated_at = now;
    }
}

/// Task as returned by the API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub created_by: Option<AccountRef>,
    pub assigned_to: Option<AccountRef>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub is_overdue: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Paging and aggregates
// ============================================================================

/// Requested page (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 10 }
    }
}

impl PageRequest {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(10).max(1),
        }
    }

    /// Rows to skip
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

/// Paging metadata returned with every listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    pub fn new(total: u64, request: PageRequest) -> Self {
        let total_pages = total.div_ceil(u64::from(request.limit));
        Self {
            total,
            page: request.page,
            limit: request.limit,
            total_pages,
            has_next_page: u64::from(request.page) < total_pages,
            has_prev_page: request.page > 1,
        }
    }
}

/// One page of results
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Task counts for a scope (one owner, or everything)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: u64,
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub high_priority: u64,
}

impl TaskStats {
    /// Fold one task into the counts
    pub fn record(&mut self, task: &Task) {
        self.total += 1;
        match task.status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
        if task.priority.is_high() {
            self.high_priority += 1;
        }
    }
}

/// Account counts for the admin dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStats {
    /// Non-deleted accounts
    pub total: u64,
    /// Verified and active
    pub verified: u64,
    /// Admin and active
    pub admins: u64,
    /// Non-deleted, created inside the recent window
    pub recent_registrations: u64,
}
