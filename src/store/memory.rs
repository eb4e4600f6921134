//! In-process store
//!
//! Default backend for development and the backend every test runs
//! against. All records live behind one `parking_lot::RwLock`; each
//! mutating trait method takes the write guard once, so it is atomic with
//! respect to every other call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{AccountFilter, AccountStore, StoreError, TaskFilter, TaskStore};
use crate::login::{FailedLogin, LockoutPolicy, LoginLockState};
use crate::model::{
    Account, AccountId, AccountRef, AccountStats, AccountStatus, NewAccount, NewTask, PageRequest,
    Role, Task, TaskChanges, TaskId, TaskStats, TaskStatus,
};
use crate::otp::{OtpCheck, OtpPolicy, OtpState};

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, Entry<Account>>,
    emails: HashMap<String, AccountId>,
    tasks: HashMap<TaskId, Entry<Task>>,
    seq: u64,
}

/// Record plus insertion sequence, used to break `created_at` ties.
struct Entry<T> {
    seq: u64,
    record: T,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn live_account_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        self.accounts
            .get_mut(&id)
            .map(|e| &mut e.record)
            .filter(|a| a.status != AccountStatus::Deleted)
    }
}

/// Newest first, with later inserts first among equal timestamps.
fn newest_first<'a, T: 'a>(
    entries: impl Iterator<Item = &'a Entry<T>>,
    created_at: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<&'a Entry<T>> {
    let mut sorted: Vec<_> = entries.collect();
    sorted.sort_by(|a, b| {
        created_at(&b.record)
            .cmp(&created_at(&a.record))
            .then(b.seq.cmp(&a.seq))
    });
    sorted
}

fn paginate<T: Clone>(sorted: Vec<&Entry<T>>, page: PageRequest) -> (Vec<T>, u64) {
    let total = sorted.len() as u64;
    let items = sorted
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit as usize)
        .map(|e| e.record.clone())
        .collect();
    (items, total)
}

/// In-memory implementation of both store traits
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_account(&self, account: NewAccount, now: DateTime<Utc>) -> Result<Account, StoreError> {
        let mut inner = self.inner.write();
        if inner.emails.contains_key(&account.email) {
            return Err(StoreError::DuplicateEmail);
        }

        let record = Account {
            id: Uuid::new_v4(),
            name: account.name,
            email: account.email,
            password_hash: account.password_hash,
            role: account.role,
            email_verified: account.email_verified,
            otp: account.otp,
            status: AccountStatus::Active,
            lock: LoginLockState::default(),
            created_at: now,
            updated_at: now,
        };

        let seq = inner.next_seq();
        inner.emails.insert(record.email.clone(), record.id);
        inner.accounts.insert(record.id, Entry { seq, record: record.clone() });
        Ok(record)
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.inner.read().accounts.get(&id).map(|e| e.record.clone()))
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .emails
            .get(email)
            .and_then(|id| inner.accounts.get(id))
            .map(|e| e.record.clone()))
    }

    async fn delete_account(&self, id: AccountId) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        match inner.accounts.remove(&id) {
            Some(entry) => {
                inner.emails.remove(&entry.record.email);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_otp(
        &self,
        id: AccountId,
        otp: OtpState,
        sent_before: Option<DateTime<Utc>>,
    ) -> Result<Option<Account>, StoreError> {
        let mut inner = self.inner.write();
        let Some(account) = inner.accounts.get_mut(&id).map(|e| &mut e.record) else {
            return Ok(None);
        };
        if account.email_verified {
            return Ok(None);
        }
        if let (Some(cutoff), Some(current)) = (sent_before, account.otp.as_ref()) {
            if current.last_sent_at > cutoff {
                return Ok(None);
            }
        }
        account.updated_at = otp.last_sent_at;
        account.otp = Some(otp);
        Ok(Some(account.clone()))
    }

    async fn record_otp_failure(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
        policy: &OtpPolicy,
    ) -> Result<Option<u32>, StoreError> {
        let mut inner = self.inner.write();
        let otp = inner
            .accounts
            .get_mut(&id)
            .map(|e| &mut e.record)
            .filter(|a| !a.email_verified)
            .and_then(|a| a.otp.as_mut())
            .filter(|otp| otp.is_live(now, policy));
        Ok(otp.map(|otp| {
            otp.attempts += 1;
            otp.attempts
        }))
    }

    async fn complete_verification(
        &self,
        id: AccountId,
        code: &str,
        now: DateTime<Utc>,
        policy: &OtpPolicy,
    ) -> Result<Option<Account>, StoreError> {
        let mut inner = self.inner.write();
        let Some(account) = inner.accounts.get_mut(&id).map(|e| &mut e.record) else {
            return Ok(None);
        };
        let pending = account
            .otp
            .as_ref()
            .is_some_and(|otp| otp.check(code, now, policy) == OtpCheck::Match);
        if account.email_verified || !pending {
            return Ok(None);
        }
        account.email_verified = true;
        account.otp = None;
        account.updated_at = now;
        Ok(Some(account.clone()))
    }

    async fn record_login_failure(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<FailedLogin, StoreError> {
        let mut inner = self.inner.write();
        let account = inner
            .accounts
            .get_mut(&id)
            .map(|e| &mut e.record)
            .ok_or(StoreError::NotFound)?;
        let outcome = account.lock.charge_failure(now, policy);
        if let FailedLogin::Counted { state, .. } = outcome {
            account.lock = state;
            account.updated_at = now;
        }
        Ok(outcome)
    }

    async fn clear_login_failures(&self, id: AccountId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let Some(account) = inner.accounts.get_mut(&id).map(|e| &mut e.record) else {
            return Ok(false);
        };
        if account.lock.is_locked(now) {
            return Ok(false);
        }
        if account.lock != LoginLockState::cleared() {
            account.lock = LoginLockState::cleared();
            account.updated_at = now;
        }
        Ok(true)
    }

    async fn set_role(&self, id: AccountId, role: Role, now: DateTime<Utc>) -> Result<Option<Account>, StoreError> {
        let mut inner = self.inner.write();
        Ok(inner.live_account_mut(id).map(|account| {
            account.role = role;
            account.updated_at = now;
            account.clone()
        }))
    }

    async fn set_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError> {
        let mut inner = self.inner.write();
        Ok(inner.live_account_mut(id).map(|account| {
            account.status = status;
            account.updated_at = now;
            account.clone()
        }))
    }

    async fn list_accounts(
        &self,
        filter: &AccountFilter,
        page: PageRequest,
    ) -> Result<(Vec<Account>, u64), StoreError> {
        let inner = self.inner.read();
        let sorted = newest_first(
            inner.accounts.values().filter(|e| filter.matches(&e.record)),
            |a| a.created_at,
        );
        Ok(paginate(sorted, page))
    }

    async fn account_refs(&self, ids: &[AccountId]) -> Result<HashMap<AccountId, AccountRef>, StoreError> {
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.accounts.get(id))
            .map(|e| (e.record.id, e.record.reference()))
            .collect())
    }

    async fn account_stats(&self, recent_since: DateTime<Utc>) -> Result<AccountStats, StoreError> {
        let inner = self.inner.read();
        let mut stats = AccountStats::default();
        for account in inner.accounts.values().map(|e| &e.record) {
            if account.status == AccountStatus::Deleted {
                continue;
            }
            stats.total += 1;
            if account.email_verified && account.is_active() {
                stats.verified += 1;
            }
            if account.is_admin() && account.is_active() {
                stats.admins += 1;
            }
            if account.created_at >= recent_since {
                stats.recent_registrations += 1;
            }
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: NewTask, now: DateTime<Utc>) -> Result<Task, StoreError> {
        let record = Task {
            id: Uuid::new_v4(),
            title: task.title,
            description: task.description,
            status: task.status,
            priority: task.priority,
            created_by: task.created_by,
            assigned_to: task.assigned_to,
            due_date: task.due_date,
            completed_at: (task.status == TaskStatus::Completed).then_some(now),
            tags: task.tags,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        let mut inner = self.inner.write();
        let seq = inner.next_seq();
        inner.tasks.insert(record.id, Entry { seq, record: record.clone() });
        Ok(record)
    }

    async fn find_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self
            .inner
            .read()
            .tasks
            .get(&id)
            .map(|e| &e.record)
            .filter(|t| !t.is_deleted)
            .cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter, page: PageRequest) -> Result<(Vec<Task>, u64), StoreError> {
        let inner = self.inner.read();
        let sorted = newest_first(
            inner.tasks.values().filter(|e| filter.matches(&e.record)),
            |t| t.created_at,
        );
        Ok(paginate(sorted, page))
    }

    async fn update_task(
        &self,
        id: TaskId,
        changes: &TaskChanges,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, StoreError> {
        let mut inner = self.inner.write();
        let task = inner
            .tasks
            .get_mut(&id)
            .map(|e| &mut e.record)
            .filter(|t| !t.is_deleted);
        Ok(task.map(|task| {
            changes.apply(task, now);
            task.clone()
        }))
    }

    async fn soft_delete_task(&self, id: TaskId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        match inner.tasks.get_mut(&id).map(|e| &mut e.record) {
            Some(task) if !task.is_deleted => {
                task.is_deleted = true;
                task.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn task_stats(&self, filter: &TaskFilter) -> Result<TaskStats, StoreError> {
        let inner = self.inner.read();
        let mut stats = TaskStats::default();
        inner
            .tasks
            .values()
            .map(|e| &e.record)
            .filter(|t| filter.matches(t))
            .for_each(|t| stats.record(t));
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskPriority;
    use std::sync::Arc;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            name: "Alice".into(),
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::User,
            email_verified: false,
            otp: None,
        }
    }

    fn new_task(owner: AccountId, title: &str) -> NewTask {
        NewTask {
            title: title.into(),
            description: "A description long enough".into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            created_by: owner,
            assigned_to: None,
            due_date: None,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_account(new_account("a@x.com"), now).await.unwrap();
        let err = store.insert_account(new_account("a@x.com"), now).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn test_delete_frees_email() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let account = store.insert_account(new_account("a@x.com"), now).await.unwrap();
        assert!(store.delete_account(account.id).await.unwrap());
        assert!(store.find_account_by_email("a@x.com").await.unwrap().is_none());
        store.insert_account(new_account("a@x.com"), now).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_login_failures_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let account = store.insert_account(new_account("a@x.com"), now).await.unwrap();
        let policy = LockoutPolicy::builder().max_attempts(50).build();
        let id = account.id;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let policy = policy.clone();
            handles.push(tokio::spawn(async move {
                store.record_login_failure(id, now, &policy).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let account = store.find_account(id).await.unwrap().unwrap();
        assert_eq!(account.lock.failed_attempts, 20);
    }

    #[tokio::test]
    async fn test_failures_against_active_lock_are_not_counted() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let account = store.insert_account(new_account("a@x.com"), now).await.unwrap();
        let policy = LockoutPolicy::default();

        for _ in 0..5 {
            let outcome = store.record_login_failure(account.id, now, &policy).await.unwrap();
            assert!(matches!(outcome, FailedLogin::Counted { .. }));
        }
        let outcome = store.record_login_failure(account.id, now, &policy).await.unwrap();
        assert!(matches!(outcome, FailedLogin::Locked(_)));
        assert!(!store.clear_login_failures(account.id, now).await.unwrap());

        let stored = store.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.lock.failed_attempts, 5);

        let later = now + chrono::Duration::hours(2) + chrono::Duration::seconds(1);
        assert!(store.clear_login_failures(account.id, later).await.unwrap());
        let stored = store.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.lock, LoginLockState::cleared());
    }

    #[tokio::test]
    async fn test_complete_verification_is_compare_and_set() {
        let store = MemoryStore::new();
        let policy = OtpPolicy::default();
        let now = Utc::now();
        let mut fresh = new_account("a@x.com");
        fresh.otp = Some(OtpState::issue("123456".into(), now, &policy));
        let account = store.insert_account(fresh, now).await.unwrap();

        assert!(store
            .complete_verification(account.id, "654321", now, &policy)
            .await
            .unwrap()
            .is_none());
        let verified = store
            .complete_verification(account.id, "123456", now, &policy)
            .await
            .unwrap()
            .unwrap();
        assert!(verified.email_verified);
        assert!(verified.otp.is_none());
        assert!(store
            .complete_verification(account.id, "123456", now, &policy)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_spent_or_expired_code_cannot_verify() {
        let store = MemoryStore::new();
        let policy = OtpPolicy::default();
        let now = Utc::now();
        let mut fresh = new_account("a@x.com");
        fresh.otp = Some(OtpState::issue("123456".into(), now, &policy));
        let account = store.insert_account(fresh, now).await.unwrap();

        for expected in 1..=5 {
            let attempts = store.record_otp_failure(account.id, now, &policy).await.unwrap();
            assert_eq!(attempts, Some(expected));
        }
        assert_eq!(store.record_otp_failure(account.id, now, &policy).await.unwrap(), None);
        assert!(store
            .complete_verification(account.id, "123456", now, &policy)
            .await
            .unwrap()
            .is_none());

        let mut fresh = new_account("b@x.com");
        fresh.otp = Some(OtpState::issue("654321".into(), now, &policy));
        let other = store.insert_account(fresh, now).await.unwrap();
        let late = now + chrono::Duration::hours(1);
        assert_eq!(store.record_otp_failure(other.id, late, &policy).await.unwrap(), None);
        assert!(store
            .complete_verification(other.id, "654321", late, &policy)
            .await
            .unwrap()
            .is_none());

        let stored = store.find_account(other.id).await.unwrap().unwrap();
        assert!(!stored.email_verified);
        assert_eq!(stored.otp.unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn test_replace_otp_respects_cooldown_cutoff() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        let mut fresh = new_account("a@x.com");
        fresh.otp = Some(OtpState::issue("111111".into(), t0, &Default::default()));
        let account = store.insert_account(fresh, t0).await.unwrap();

        let next = OtpState::issue("222222".into(), t0, &Default::default());
        let cutoff = t0 - chrono::Duration::seconds(60);
        assert!(store.replace_otp(account.id, next.clone(), Some(cutoff)).await.unwrap().is_none());
        let updated = store.replace_otp(account.id, next, None).await.unwrap().unwrap();
        assert_eq!(updated.otp.unwrap().code, "222222");
    }

    #[tokio::test]
    async fn test_list_tasks_newest_first_and_paged() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        for i in 0..5 {
            store.insert_task(new_task(owner, &format!("Task {i}")), now).await.unwrap();
        }
        let (items, total) = store
            .list_tasks(&TaskFilter::owned_by(Some(owner)), PageRequest::new(Some(1), Some(2)))
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Task 4");
        assert_eq!(items[1].title, "Task 3");
    }

    #[tokio::test]
    async fn test_soft_delete_hides_task() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let task = store.insert_task(new_task(Uuid::new_v4(), "Gone soon"), now).await.unwrap();
        assert!(store.soft_delete_task(task.id, now).await.unwrap());
        assert!(!store.soft_delete_task(task.id, now).await.unwrap());
        assert!(store.find_task(task.id).await.unwrap().is_none());
        assert_eq!(store.task_stats(&TaskFilter::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_deleted_account_not_updated() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let account = store.insert_account(new_account("a@x.com"), now).await.unwrap();
        store.set_status(account.id, AccountStatus::Deleted, now).await.unwrap().unwrap();
        assert!(store.set_status(account.id, AccountStatus::Deleted, now).await.unwrap().is_none());
        assert!(store.set_role(account.id, Role::Admin, now).await.unwrap().is_none());
    }
}
