//! Task queries and mutations
//!
//! Every operation is scoped by the caller: non-admins only ever see and
//! touch tasks they created, whatever filters they send; admins see all
//! non-deleted tasks.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::clock::Clock;
use crate::model::{
    AccountProfile, AccountStatus, NewTask, Page, PageRequest, Pagination, Task, TaskChanges, TaskId,
    TaskPriority, TaskStats, TaskStatus, TaskView,
};
use crate::observability::SecurityEvent;
use crate::security_event;
use crate::store::{AccountStore, StoreError, TaskFilter, TaskStore};

/// Task engine failures
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task not found.")]
    NotFound,
    #[error("Not authorized to {action} this task.")]
    Forbidden { action: &'static str },
    #[error("assignedTo: Assigned user does not exist")]
    UnknownAssignee,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validated input for a new task; the owner comes from the caller
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assigned_to: Option<uuid::Uuid>,
    pub due_date: Option<chrono::DateTime<chrono::Utc>>,
    pub tags: Vec<String>,
}

/// Listing filters
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub search: Option<String>,
    pub page: PageRequest,
}

/// Task engine
#[derive(Clone)]
pub struct TaskService {
    tasks: Arc<dyn TaskStore>,
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

/// Owner check shared by get, update and delete
fn authorize(caller: &AccountProfile, task: &Task, action: &'static str) -> Result<(), TaskError> {
    if caller.is_admin() || task.created_by == caller.id {
        return Ok(());
    }
    security_event!(
        SecurityEvent::AccessDenied,
        account_id = %caller.id,
        task_id = %task.id,
        action,
        "Task access denied"
    );
    Err(TaskError::Forbidden { action })
}

/// Owner scope for a caller: their own tasks, or everything for admins
fn scope(caller: &AccountProfile) -> Option<uuid::Uuid> {
    (!caller.is_admin()).then_some(caller.id)
}

impl TaskService {
    pub fn new(tasks: Arc<dyn TaskStore>, accounts: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self { tasks, accounts, clock }
    }

    async fn live_task(&self, id: TaskId) -> Result<Task, TaskError> {
        self.tasks.find_task(id).await?.ok_or(TaskError::NotFound)
    }

    /// Resolve owner and assignee references for a batch of tasks
    async fn views(&self, tasks: Vec<Task>) -> Result<Vec<TaskView>, TaskError> {
        let ids: Vec<_> = tasks
            .iter()
            .flat_map(|t| std::iter::once(t.created_by).chain(t.assigned_to))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let refs = self.accounts.account_refs(&ids).await?;
        let now = self.clock.now();

        Ok(tasks
            .into_iter()
            .map(|task| TaskView {
                is_overdue: task.is_overdue(now),
                created_by: refs.get(&task.created_by).cloned(),
                assigned_to: task.assigned_to.and_then(|id| refs.get(&id).cloned()),
                id: task.id,
                title: task.title,
                description: task.description,
                status: task.status,
                priority: task.priority,
                due_date: task.due_date,
                completed_at: task.completed_at,
                tags: task.tags,
                created_at: task.created_at,
                updated_at: task.updated_at,
            })
            .collect())
    }

    async fn view(&self, task: Task) -> Result<TaskView, TaskError> {
        self.views(vec![task])
            .await?
            .pop()
            .ok_or(TaskError::NotFound)
    }

    pub async fn create(&self, caller: &AccountProfile, draft: TaskDraft) -> Result<TaskView, TaskError> {
        if let Some(assignee) = draft.assigned_to {
            let exists = self
                .accounts
                .find_account(assignee)
                .await?
                .is_some_and(|a| a.status != AccountStatus::Deleted);
            if !exists {
                return Err(TaskError::UnknownAssignee);
            }
        }

        let task = self
            .tasks
            .insert_task(
                NewTask {
                    title: draft.title.trim().to_string(),
                    description: draft.description.trim().to_string(),
                    status: draft.status.unwrap_or_default(),
                    priority: draft.priority.unwrap_or_default(),
                    created_by: caller.id,
                    assigned_to: draft.assigned_to,
                    due_date: draft.due_date,
                    tags: draft.tags,
                },
                self.clock.now(),
            )
            .await?;
        debug!(task_id = %task.id, owner = %caller.id, "Task created");
        self.view(task).await
    }

    pub async fn list(&self, caller: &AccountProfile, query: TaskQuery) -> Result<Page<TaskView>, TaskError> {
        let filter = TaskFilter {
            owner: scope(caller),
            status: query.status,
            priority: query.priority,
            search: query.search.filter(|s| !s.trim().is_empty()),
        };
        let (tasks, total) = self.tasks.list_tasks(&filter, query.page).await?;
        Ok(Page {
            items: self.views(tasks).await?,
            pagination: Pagination::new(total, query.page),
        })
    }

    pub async fn get(&self, caller: &AccountProfile, id: TaskId) -> Result<TaskView, TaskError> {
        let task = self.live_task(id).await?;
        authorize(caller, &task, "view")?;
        self.view(task).await
    }

    pub async fn update(
        &self,
        caller: &AccountProfile,
        id: TaskId,
        mut changes: TaskChanges,
    ) -> Result<TaskView, TaskError> {
        let task = self.live_task(id).await?;
        authorize(caller, &task, "update")?;

        changes.title = changes.title.map(|t| t.trim().to_string());
        changes.description = changes.description.map(|d| d.trim().to_string());

        let updated = self
            .tasks
            .update_task(id, &changes, self.clock.now())
            .await?
            .ok_or(TaskError::NotFound)?;
        self.view(updated).await
    }

    pub async fn delete(&self, caller: &AccountProfile, id: TaskId) -> Result<(), TaskError> {
        let task = self.live_task(id).await?;
        authorize(caller, &task, "delete")?;
        if !self.tasks.soft_delete_task(id, self.clock.now()).await? {
            return Err(TaskError::NotFound);
        }
        debug!(task_id = %id, by = %caller.id, "Task deleted");
        Ok(())
    }

    pub async fn stats(&self, caller: &AccountProfile) -> Result<TaskStats, TaskError> {
        Ok(self.tasks.task_stats(&TaskFilter::owned_by(scope(caller))).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestApp;
    use std::time::Duration;

    fn draft(title: &str) -> TaskDraft {
        TaskDraft {
            title: title.into(),
            description: "Something that needs doing".into(),
            ..Default::default()
        }
    }

    async fn two_users(app: &TestApp) -> (AccountProfile, AccountProfile) {
        let alice = app.verified_account("Alice", "alice@x.com", "Secret123").await.account;
        let bob = app.verified_account("Bob", "bob@x.com", "Secret123").await.account;
        (alice, bob)
    }

    #[tokio::test]
    async fn test_create_defaults_and_owner_ref() {
        let app = TestApp::new();
        let (alice, _) = two_users(&app).await;
        let view = app.state.tasks.create(&alice, draft("  Write report ")).await.unwrap();
        assert_eq!(view.title, "Write report");
        assert_eq!(view.status, TaskStatus::Pending);
        assert_eq!(view.priority, TaskPriority::Medium);
        assert_eq!(view.created_by.unwrap().name, "Alice");
        assert!(!view.is_overdue);
    }

    #[tokio::test]
    async fn test_unknown_assignee_rejected() {
        let app = TestApp::new();
        let (alice, _) = two_users(&app).await;
        let mut d = draft("Delegate");
        d.assigned_to = Some(uuid::Uuid::new_v4());
        let err = app.state.tasks.create(&alice, d).await.unwrap_err();
        assert!(matches!(err, TaskError::UnknownAssignee));
    }

    #[tokio::test]
    async fn test_non_admin_list_is_scoped() {
        let app = TestApp::new();
        let (alice, bob) = two_users(&app).await;
        app.state.tasks.create(&alice, draft("Alice task")).await.unwrap();
        app.state.tasks.create(&bob, draft("Bob task")).await.unwrap();

        let query = TaskQuery {
            search: Some("task".into()),
            ..Default::default()
        };
        let page = app.state.tasks.list(&alice, query).await.unwrap();
        assert_eq!(page.pagination.total, 1);
        assert!(page.items.iter().all(|t| t.created_by.as_ref().unwrap().id == alice.id));
    }

    #[tokio::test]
    async fn test_admin_sees_everything() {
        let app = TestApp::new();
        let (alice, bob) = two_users(&app).await;
        let admin = app.admin_account("Root", "root@x.com", "Secret123").await.account;
        app.state.tasks.create(&alice, draft("Alice task")).await.unwrap();
        app.state.tasks.create(&bob, draft("Bob task")).await.unwrap();

        let page = app.state.tasks.list(&admin, TaskQuery::default()).await.unwrap();
        assert_eq!(page.pagination.total, 2);
        assert_eq!(app.state.tasks.stats(&admin).await.unwrap().total, 2);
        assert_eq!(app.state.tasks.stats(&bob).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_other_users_task_is_forbidden() {
        let app = TestApp::new();
        let (alice, bob) = two_users(&app).await;
        let task = app.state.tasks.create(&alice, draft("Private")).await.unwrap();

        let err = app.state.tasks.get(&bob, task.id).await.unwrap_err();
        assert_eq!(err.to_string(), "Not authorized to view this task.");
        assert!(matches!(
            app.state.tasks.delete(&bob, task.id).await,
            Err(TaskError::Forbidden { action: "delete" })
        ));
    }

    #[tokio::test]
    async fn test_completed_at_kept_when_reopened() {
        let app = TestApp::new();
        let (alice, _) = two_users(&app).await;
        let task = app.state.tasks.create(&alice, draft("Finish me")).await.unwrap();

        let before = app.clock.now();
        let done = app
            .state
            .tasks
            .update(
                &alice,
                task.id,
                TaskChanges { status: Some(TaskStatus::Completed), ..Default::default() },
            )
            .await
            .unwrap();
        let stamped = done.completed_at.unwrap();
        assert!(stamped >= before);

        app.clock.advance(Duration::from_secs(30));
        let reopened = app
            .state
            .tasks
            .update(
                &alice,
                task.id,
                TaskChanges { status: Some(TaskStatus::Pending), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(reopened.status, TaskStatus::Pending);
        assert_eq!(reopened.completed_at, Some(stamped));
    }

    #[tokio::test]
    async fn test_second_delete_is_not_found() {
        let app = TestApp::new();
        let (alice, _) = two_users(&app).await;
        let task = app.state.tasks.create(&alice, draft("Short lived")).await.unwrap();
        app.state.tasks.delete(&alice, task.id).await.unwrap();
        assert!(matches!(
            app.state.tasks.delete(&alice, task.id).await,
            Err(TaskError::NotFound)
        ));
        assert!(matches!(app.state.tasks.get(&alice, task.id).await, Err(TaskError::NotFound)));
    }

    #[tokio::test]
    async fn test_overdue_flag() {
        let app = TestApp::new();
        let (alice, _) = two_users(&app).await;
        let mut d = draft("Due soon");
        d.due_date = Some(app.clock.now() + chrono::Duration::hours(1));
        let task = app.state.tasks.create(&alice, d).await.unwrap();
        assert!(!task.is_overdue);

        app.clock.advance(Duration::from_secs(2 * 3600));
        assert!(app.state.tasks.get(&alice, task.id).await.unwrap().is_overdue);
    }

    #[tokio::test]
    async fn test_pagination_metadata() {
        let app = TestApp::new();
        let (alice, _) = two_users(&app).await;
        for i in 0..5 {
            app.state.tasks.create(&alice, draft(&format!("Task {i}"))).await.unwrap();
        }
        let query = TaskQuery {
            page: PageRequest::new(Some(2), Some(2)),
            ..Default::default()
        };
        let page = app.state.tasks.list(&alice, query).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.pagination.total_pages, 3);
        assert!(page.pagination.has_next_page);
        assert!(page.pagination.has_prev_page);
    }
}
