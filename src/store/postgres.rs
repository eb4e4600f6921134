//! PostgreSQL store
//!
//! Every mutating trait method is a single statement. Conditional writes
//! (`WHERE ... RETURNING`) stand in for compare-and-set, and the login
//! lock transition is computed by `CASE` expressions in the `UPDATE`
//! itself, mirroring [`LoginLockState::charge_failure`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::{AccountFilter, AccountStore, StoreError, TaskFilter, TaskStore};
use crate::clock::delta;
use crate::database::DatabaseError;
use crate::login::{FailedLogin, LockoutPolicy, LoginLockState};
use crate::model::{
    Account, AccountId, AccountRef, AccountStats, AccountStatus, NewAccount, NewTask, PageRequest,
    Role, Task, TaskChanges, TaskId, TaskStats, TaskStatus,
};
use crate::otp::{OtpPolicy, OtpState};

const ACCOUNT_COLUMNS: &str = "id, name, email, password_hash, role, email_verified, otp_code, \
     otp_expires_at, otp_attempts, otp_last_sent_at, status, failed_login_attempts, locked_until, \
     created_at, updated_at";

const TASK_COLUMNS: &str = "id, title, description, status, priority, created_by, assigned_to, \
     due_date, completed_at, tags, is_deleted, created_at, updated_at";

/// `$1` role, `$2` verified, `$3` search pattern
const ACCOUNT_WHERE: &str = r"status <> 'deleted'
    AND ($1::text IS NULL OR role = $1)
    AND ($2::bool IS NULL OR email_verified = $2)
    AND ($3::text IS NULL OR name ILIKE $3 ESCAPE '\' OR email ILIKE $3 ESCAPE '\')";

/// `$1` owner, `$2` status, `$3` priority, `$4` search pattern
const TASK_WHERE: &str = r"NOT is_deleted
    AND ($1::uuid IS NULL OR created_by = $1)
    AND ($2::text IS NULL OR status = $2)
    AND ($3::text IS NULL OR priority = $3)
    AND ($4::text IS NULL OR title ILIKE $4 ESCAPE '\' OR description ILIKE $4 ESCAPE '\')";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
            sqlx::Error::PoolTimedOut => StoreError::Timeout,
            sqlx::Error::RowNotFound => StoreError::NotFound,
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Escape `%`, `_` and `\` for use inside an `ILIKE ... ESCAPE '\'` pattern
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn search_pattern(search: Option<&str>) -> Option<String> {
    search.map(|s| format!("%{}%", escape_like(s)))
}

fn decode<T: std::str::FromStr<Err = crate::model::ParseEnumError>>(raw: &str) -> Result<T, StoreError> {
    raw.parse().map_err(|e: crate::model::ParseEnumError| StoreError::Backend(e.to_string()))
}

fn count(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

#[derive(FromRow)]
struct AccountRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    email_verified: bool,
    otp_code: Option<String>,
    otp_expires_at: Option<DateTime<Utc>>,
    otp_attempts: i32,
    otp_last_sent_at: Option<DateTime<Utc>>,
    status: String,
    failed_login_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let otp = match (row.otp_code, row.otp_expires_at) {
            (Some(code), Some(expires_at)) => Some(OtpState {
                code,
                expires_at,
                attempts: u32::try_from(row.otp_attempts).unwrap_or(0),
                last_sent_at: row.otp_last_sent_at.unwrap_or(row.updated_at),
            }),
            _ => None,
        };

        Ok(Account {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role: decode(&row.role)?,
            email_verified: row.email_verified,
            otp,
            status: decode(&row.status)?,
            lock: LoginLockState {
                failed_attempts: u32::try_from(row.failed_login_attempts).unwrap_or(0),
                locked_until: row.locked_until,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    title: String,
    description: String,
    status: String,
    priority: String,
    created_by: Uuid,
    assigned_to: Option<Uuid>,
    due_date: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    tags: Vec<String>,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: row.id,
            title: row.title,
            description: row.description,
            status: decode(&row.status)?,
            priority: decode(&row.priority)?,
            created_by: row.created_by,
            assigned_to: row.assigned_to,
            due_date: row.due_date,
            completed_at: row.completed_at,
            tags: row.tags,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn accounts(rows: Vec<AccountRow>) -> Result<Vec<Account>, StoreError> {
    rows.into_iter().map(Account::try_from).collect()
}

fn tasks(rows: Vec<TaskRow>) -> Result<Vec<Task>, StoreError> {
    rows.into_iter().map(Task::try_from).collect()
}

#[derive(FromRow)]
struct TaskStatsRow {
    total: i64,
    pending: i64,
    in_progress: i64,
    completed: i64,
    cancelled: i64,
    high_priority: i64,
}

#[derive(FromRow)]
struct AccountStatsRow {
    total: i64,
    verified: i64,
    admins: i64,
    recent: i64,
}

/// PostgreSQL implementation of both store traits
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self { pool, query_timeout }
    }

    /// Apply the embedded migrations in `migrations/`
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        info!("Database migrations applied");
        Ok(())
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout),
        }
    }

    async fn fetch_account(&self, sql: &str, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = self
            .timed(sqlx::query_as(sql).bind(id).fetch_optional(&self.pool))
            .await?;
        row.map(Account::try_from).transpose()
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn insert_account(&self, account: NewAccount, now: DateTime<Utc>) -> Result<Account, StoreError> {
        let sql = format!(
            "INSERT INTO accounts (id, name, email, password_hash, role, email_verified, otp_code, \
             otp_expires_at, otp_attempts, otp_last_sent_at, status, failed_login_attempts, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'active', 0, $11, $11) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let otp = account.otp.as_ref();
        let row: AccountRow = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(Uuid::new_v4())
                    .bind(&account.name)
                    .bind(&account.email)
                    .bind(&account.password_hash)
                    .bind(account.role.as_str())
                    .bind(account.email_verified)
                    .bind(otp.map(|o| o.code.as_str()))
                    .bind(otp.map(|o| o.expires_at))
                    .bind(otp.map_or(0, |o| o.attempts as i32))
                    .bind(otp.map(|o| o.last_sent_at))
                    .bind(now)
                    .fetch_one(&self.pool),
            )
            .await?;
        row.try_into()
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        self.fetch_account(&sql, id).await
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE lower(email) = lower($1)");
        let row: Option<AccountRow> = self
            .timed(sqlx::query_as(&sql).bind(email).fetch_optional(&self.pool))
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn delete_account(&self, id: AccountId) -> Result<bool, StoreError> {
        let result = self
            .timed(sqlx::query("DELETE FROM accounts WHERE id = $1").bind(id).execute(&self.pool))
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_otp(
        &self,
        id: AccountId,
        otp: OtpState,
        sent_before: Option<DateTime<Utc>>,
    ) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "UPDATE accounts SET otp_code = $2, otp_expires_at = $3, otp_attempts = $4, \
             otp_last_sent_at = $5, updated_at = $5 \
             WHERE id = $1 AND NOT email_verified \
               AND ($6::timestamptz IS NULL OR otp_last_sent_at IS NULL OR otp_last_sent_at <= $6) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: Option<AccountRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(id)
                    .bind(&otp.code)
                    .bind(otp.expires_at)
                    .bind(otp.attempts as i32)
                    .bind(otp.last_sent_at)
                    .bind(sent_before)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn record_otp_failure(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
        policy: &OtpPolicy,
    ) -> Result<Option<u32>, StoreError> {
        let attempts: Option<(i32,)> = self
            .timed(
                sqlx::query_as(
                    "UPDATE accounts SET otp_attempts = otp_attempts + 1 \
                     WHERE id = $1 AND NOT email_verified AND otp_code IS NOT NULL \
                       AND otp_attempts < $2 AND otp_expires_at >= $3 \
                     RETURNING otp_attempts",
                )
                .bind(id)
                .bind(policy.max_attempts as i32)
                .bind(now)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(attempts.map(|(n,)| u32::try_from(n).unwrap_or(0)))
    }

    async fn complete_verification(
        &self,
        id: AccountId,
        code: &str,
        now: DateTime<Utc>,
        policy: &OtpPolicy,
    ) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "UPDATE accounts SET email_verified = TRUE, otp_code = NULL, otp_expires_at = NULL, \
             otp_attempts = 0, otp_last_sent_at = NULL, updated_at = $3 \
             WHERE id = $1 AND NOT email_verified AND otp_code = $2 \
               AND otp_attempts < $4 AND otp_expires_at >= $3 \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: Option<AccountRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(id)
                    .bind(code.trim())
                    .bind(now)
                    .bind(policy.max_attempts as i32)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn record_login_failure(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<FailedLogin, StoreError> {
        let lock_deadline = now + delta(policy.lockout_duration);
        let counted: Option<(i32, Option<DateTime<Utc>>)> = self
            .timed(
                sqlx::query_as(
                    "UPDATE accounts SET \
                       failed_login_attempts = CASE \
                         WHEN locked_until IS NOT NULL THEN 1 \
                         ELSE failed_login_attempts + 1 END, \
                       locked_until = CASE \
                         WHEN locked_until IS NULL AND failed_login_attempts + 1 >= $3 THEN $4 \
                         ELSE NULL END, \
                       updated_at = $2 \
                     WHERE id = $1 AND (locked_until IS NULL OR locked_until <= $2) \
                     RETURNING failed_login_attempts, locked_until",
                )
                .bind(id)
                .bind(now)
                .bind(policy.max_attempts as i32)
                .bind(lock_deadline)
                .fetch_optional(&self.pool),
            )
            .await?;

        if let Some((failed, locked_until)) = counted {
            return Ok(FailedLogin::Counted {
                state: LoginLockState {
                    failed_attempts: u32::try_from(failed).unwrap_or(0),
                    locked_until,
                },
                newly_locked: locked_until.is_some(),
            });
        }

        // Refused: either the account is gone or a lock is in force
        let current: Option<(i32, Option<DateTime<Utc>>)> = self
            .timed(
                sqlx::query_as("SELECT failed_login_attempts, locked_until FROM accounts WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        let (failed, locked_until) = current.ok_or(StoreError::NotFound)?;
        let state = LoginLockState {
            failed_attempts: u32::try_from(failed).unwrap_or(0),
            locked_until,
        };
        state
            .lockout(now)
            .map(FailedLogin::Locked)
            .ok_or_else(|| StoreError::Backend("login lock changed during update".into()))
    }

    async fn clear_login_failures(&self, id: AccountId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = self
            .timed(
                sqlx::query(
                    "UPDATE accounts SET failed_login_attempts = 0, locked_until = NULL, \
                       updated_at = CASE \
                         WHEN failed_login_attempts <> 0 OR locked_until IS NOT NULL THEN $2 \
                         ELSE updated_at END \
                     WHERE id = $1 AND (locked_until IS NULL OR locked_until <= $2)",
                )
                .bind(id)
                .bind(now)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_role(&self, id: AccountId, role: Role, now: DateTime<Utc>) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "UPDATE accounts SET role = $2, updated_at = $3 \
             WHERE id = $1 AND status <> 'deleted' RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: Option<AccountRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(id)
                    .bind(role.as_str())
                    .bind(now)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn set_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "UPDATE accounts SET status = $2, updated_at = $3 \
             WHERE id = $1 AND status <> 'deleted' RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: Option<AccountRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(id)
                    .bind(status.as_str())
                    .bind(now)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn list_accounts(
        &self,
        filter: &AccountFilter,
        page: PageRequest,
    ) -> Result<(Vec<Account>, u64), StoreError> {
        let role = filter.role.map(|r| r.as_str());
        let search = search_pattern(filter.search.as_deref());

        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {ACCOUNT_WHERE} \
             ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5"
        );
        let rows: Vec<AccountRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(role)
                    .bind(filter.verified)
                    .bind(search.as_deref())
                    .bind(i64::from(page.limit))
                    .bind(page.offset() as i64)
                    .fetch_all(&self.pool),
            )
            .await?;

        let count_sql = format!("SELECT COUNT(*) FROM accounts WHERE {ACCOUNT_WHERE}");
        let (total,): (i64,) = self
            .timed(
                sqlx::query_as(&count_sql)
                    .bind(role)
                    .bind(filter.verified)
                    .bind(search.as_deref())
                    .fetch_one(&self.pool),
            )
            .await?;

        Ok((accounts(rows)?, count(total)))
    }

    async fn account_refs(&self, ids: &[AccountId]) -> Result<HashMap<AccountId, AccountRef>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(Uuid, String, String)> = self
            .timed(
                sqlx::query_as("SELECT id, name, email FROM accounts WHERE id = ANY($1)")
                    .bind(ids)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, email)| (id, AccountRef { id, name, email }))
            .collect())
    }

    async fn account_stats(&self, recent_since: DateTime<Utc>) -> Result<AccountStats, StoreError> {
        let row: AccountStatsRow = self
            .timed(
                sqlx::query_as(
                    "SELECT COUNT(*) AS total, \
                       COUNT(*) FILTER (WHERE email_verified AND status = 'active') AS verified, \
                       COUNT(*) FILTER (WHERE role = 'admin' AND status = 'active') AS admins, \
                       COUNT(*) FILTER (WHERE created_at >= $1) AS recent \
                     FROM accounts WHERE status <> 'deleted'",
                )
                .bind(recent_since)
                .fetch_one(&self.pool),
            )
            .await?;
        Ok(AccountStats {
            total: count(row.total),
            verified: count(row.verified),
            admins: count(row.admins),
            recent_registrations: count(row.recent),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.timed(sqlx::query("SELECT 1").execute(&self.pool)).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn insert_task(&self, task: NewTask, now: DateTime<Utc>) -> Result<Task, StoreError> {
        let sql = format!(
            "INSERT INTO tasks (id, title, description, status, priority, created_by, assigned_to, \
             due_date, completed_at, tags, is_deleted, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE, $11, $11) \
             RETURNING {TASK_COLUMNS}"
        );
        let completed_at = (task.status == TaskStatus::Completed).then_some(now);
        let row: TaskRow = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(Uuid::new_v4())
                    .bind(&task.title)
                    .bind(&task.description)
                    .bind(task.status.as_str())
                    .bind(task.priority.as_str())
                    .bind(task.created_by)
                    .bind(task.assigned_to)
                    .bind(task.due_date)
                    .bind(completed_at)
                    .bind(&task.tags)
                    .bind(now)
                    .fetch_one(&self.pool),
            )
            .await?;
        row.try_into()
    }

    async fn find_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND NOT is_deleted");
        let row: Option<TaskRow> = self
            .timed(sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool))
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn list_tasks(&self, filter: &TaskFilter, page: PageRequest) -> Result<(Vec<Task>, u64), StoreError> {
        let status = filter.status.map(|s| s.as_str());
        let priority = filter.priority.map(|p| p.as_str());
        let search = search_pattern(filter.search.as_deref());

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE {TASK_WHERE} \
             ORDER BY created_at DESC, id DESC LIMIT $5 OFFSET $6"
        );
        let rows: Vec<TaskRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(filter.owner)
                    .bind(status)
                    .bind(priority)
                    .bind(search.as_deref())
                    .bind(i64::from(page.limit))
                    .bind(page.offset() as i64)
                    .fetch_all(&self.pool),
            )
            .await?;

        let count_sql = format!("SELECT COUNT(*) FROM tasks WHERE {TASK_WHERE}");
        let (total,): (i64,) = self
            .timed(
                sqlx::query_as(&count_sql)
                    .bind(filter.owner)
                    .bind(status)
                    .bind(priority)
                    .bind(search.as_deref())
                    .fetch_one(&self.pool),
            )
            .await?;

        Ok((tasks(rows)?, count(total)))
    }

    async fn update_task(
        &self,
        id: TaskId,
        changes: &TaskChanges,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, StoreError> {
        // Right-hand sides see the pre-update row, so `status` below is the old status.
        let sql = format!(
            "UPDATE tasks SET \
               title = COALESCE($2, title), \
               description = COALESCE($3, description), \
               completed_at = CASE WHEN $4::text = 'completed' AND status <> 'completed' \
                                   THEN $9 ELSE completed_at END, \
               status = COALESCE($4, status), \
               priority = COALESCE($5, priority), \
               due_date = CASE WHEN $6 THEN $7 ELSE due_date END, \
               tags = COALESCE($8, tags), \
               updated_at = $9 \
             WHERE id = $1 AND NOT is_deleted \
             RETURNING {TASK_COLUMNS}"
        );
        let row: Option<TaskRow> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(id)
                    .bind(changes.title.as_deref())
                    .bind(changes.description.as_deref())
                    .bind(changes.status.map(|s| s.as_str()))
                    .bind(changes.priority.map(|p| p.as_str()))
                    .bind(changes.due_date.is_some())
                    .bind(changes.due_date.flatten())
                    .bind(changes.tags.as_deref())
                    .bind(now)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn soft_delete_task(&self, id: TaskId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = self
            .timed(
                sqlx::query("UPDATE tasks SET is_deleted = TRUE, updated_at = $2 WHERE id = $1 AND NOT is_deleted")
                    .bind(id)
                    .bind(now)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn task_stats(&self, filter: &TaskFilter) -> Result<TaskStats, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS total, \
               COUNT(*) FILTER (WHERE status = 'pending') AS pending, \
               COUNT(*) FILTER (WHERE status = 'in-progress') AS in_progress, \
               COUNT(*) FILTER (WHERE status = 'completed') AS completed, \
               COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled, \
               COUNT(*) FILTER (WHERE priority IN ('high', 'urgent')) AS high_priority \
             FROM tasks WHERE {TASK_WHERE}"
        );
        let row: TaskStatsRow = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(filter.owner)
                    .bind(filter.status.map(|s| s.as_str()))
                    .bind(filter.priority.map(|p| p.as_str()))
                    .bind(search_pattern(filter.search.as_deref()))
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(TaskStats {
            total: count(row.total),
            pending: count(row.pending),
            in_progress: count(row.in_progress),
            completed: count(row.completed),
            cancelled: count(row.cancelled),
            high_priority: count(row.high_priority),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_search_pattern() {
        assert_eq!(search_pattern(Some("rep")), Some("%rep%".to_string()));
        assert_eq!(search_pattern(None), None);
    }
}
