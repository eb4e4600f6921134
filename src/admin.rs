//! Administrative operations
//!
//! Account listing, inspection, role and status changes, soft deletion
//! and system-wide counts. Callers are already known to be admins (the
//! router puts these behind `require_admin`); the rules enforced here are
//! the ones that depend on the target, such as never acting on oneself.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::clock::{delta, Clock};
use crate::model::{
    AccountId, AccountProfile, AccountStats, AccountStatus, Page, PageRequest, Pagination, Role,
};
use crate::observability::SecurityEvent;
use crate::security_event;
use crate::store::{AccountFilter, AccountStore, StoreError, TaskFilter, TaskStore};

/// Window for "recent registrations"
const RECENT_WINDOW: std::time::Duration = std::time::Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("User not found.")]
    NotFound,
    #[error("You cannot change your own role.")]
    OwnRole,
    #[error("You cannot change your own account status.")]
    OwnStatus,
    #[error("You cannot delete your own account.")]
    OwnAccount,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Listing filters
#[derive(Debug, Clone, Default)]
pub struct AccountQuery {
    pub role: Option<Role>,
    pub verified: Option<bool>,
    pub search: Option<String>,
    pub page: PageRequest,
}

/// Task counts shown on an account's detail page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTaskStats {
    pub total: u64,
    pub completed: u64,
    pub pending: u64,
    pub in_progress: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetail {
    pub user: AccountProfile,
    pub task_stats: AccountTaskStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub total: u64,
    pub completed: u64,
    pub pending: u64,
    /// Percentage, two decimals; 0 when there are no tasks
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemStats {
    pub users: AccountStats,
    pub tasks: TaskSummary,
}

/// `completed / total * 100`, rounded to two decimals
pub fn completion_rate(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let rate = completed as f64 / total as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

#[derive(Clone)]
pub struct AdminService {
    accounts: Arc<dyn AccountStore>,
    tasks: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl AdminService {
    pub fn new(accounts: Arc<dyn AccountStore>, tasks: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { accounts, tasks, clock }
    }

    pub async fn list_accounts(&self, query: AccountQuery) -> Result<Page<AccountProfile>, AdminError> {
        let filter = AccountFilter {
            role: query.role,
            verified: query.verified,
            search: query.search.filter(|s| !s.trim().is_empty()),
        };
        let (accounts, total) = self.accounts.list_accounts(&filter, query.page).await?;
        Ok(Page {
            items: accounts.iter().map(|a| a.profile()).collect(),
            pagination: Pagination::new(total, query.page),
        })
    }

    pub async fn get_account(&self, id: AccountId) -> Result<AccountDetail, AdminError> {
        let account = self
            .accounts
            .find_account(id)
            .await?
            .filter(|a| a.status != AccountStatus::Deleted)
            .ok_or(AdminError::NotFound)?;

        let stats = self.tasks.task_stats(&TaskFilter::owned_by(Some(id))).await?;
        Ok(AccountDetail {
            user: account.profile(),
            task_stats: AccountTaskStats {
                total: stats.total,
                completed: stats.completed,
                pending: stats.pending,
                in_progress: stats.in_progress,
            },
        })
    }

    pub async fn update_role(
        &self,
        caller: &AccountProfile,
        id: AccountId,
        role: Role,
    ) -> Result<AccountProfile, AdminError> {
        if caller.id == id {
            return Err(AdminError::OwnRole);
        }
        let account = self
            .accounts
            .set_role(id, role, self.clock.now())
            .await?
            .ok_or(AdminError::NotFound)?;
        security_event!(
            SecurityEvent::RoleChanged,
            admin_id = %caller.id,
            account_id = %id,
            role = %role,
            "Account role changed"
        );
        Ok(account.profile())
    }

    /// Activate or suspend an account. Deletion goes through
    /// [`AdminService::delete_account`].
    pub async fn update_status(
        &self,
        caller: &AccountProfile,
        id: AccountId,
        status: AccountStatus,
    ) -> Result<AccountProfile, AdminError> {
        if caller.id == id {
            return Err(AdminError::OwnStatus);
        }
        let account = self
            .accounts
            .set_status(id, status, self.clock.now())
            .await?
            .ok_or(AdminError::NotFound)?;
        security_event!(
            SecurityEvent::StatusChanged,
            admin_id = %caller.id,
            account_id = %id,
            status = %status,
            "Account status changed"
        );
        Ok(account.profile())
    }

    /// Soft delete. A second delete reports `NotFound`.
    pub async fn delete_account(&self, caller: &AccountProfile, id: AccountId) -> Result<(), AdminError> {
        if caller.id == id {
            return Err(AdminError::OwnAccount);
        }
        self.accounts
            .set_status(id, AccountStatus::Deleted, self.clock.now())
            .await?
            .ok_or(AdminError::NotFound)?;
        security_event!(
            SecurityEvent::AccountDeleted,
            admin_id = %caller.id,
            account_id = %id,
            "Account deleted"
        );
        Ok(())
    }

    pub async fn system_stats(&self) -> Result<SystemStats, AdminError> {
        let recent_since = self.clock.now() - delta(RECENT_WINDOW);
        let users = self.accounts.account_stats(recent_since).await?;
        let tasks = self.tasks.task_stats(&TaskFilter::default()).await?;
        Ok(SystemStats {
            users,
            tasks: TaskSummary {
                total: tasks.total,
                completed: tasks.completed,
                pending: tasks.pending,
                completion_rate: completion_rate(tasks.completed, tasks.total),
            },
        })
    }
}
