//! `/api/tasks` handlers
//!
//! Payloads arrive as strings and are checked field by field so a bad
//! request gets every problem back at once; conversion into engine types
//! happens only after validation passed.

use axum::{extract::State, response::IntoResponse};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::response::ApiResponse;
use super::{page_request, validate_choice, validate_page, AppState};
use crate::error::Result;
use crate::gate::CurrentAccount;
use crate::model::{Pagination, TaskChanges, TaskId, TaskPriority, TaskStats, TaskStatus, TaskView};
use crate::tasks::{TaskDraft, TaskQuery};
use crate::validation::{
    parse_timestamp, validate_collection_size, validate_length, validate_timestamp, Validate,
    ValidatedJson, ValidatedPath, ValidatedQuery, ValidationError, ValidationErrorCode,
    ValidationErrors,
};

const MAX_TAGS: usize = 20;
const MAX_TAG_LEN: usize = 30;

/// Trimmed, non-empty tags
fn clean_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn validate_tags(tags: &[String], errors: &mut ValidationErrors) {
    let tags = clean_tags(tags);
    errors.check(validate_collection_size(&tags, MAX_TAGS, "tags"));
    if tags.iter().any(|t| t.chars().count() > MAX_TAG_LEN) {
        errors.push(ValidationError::for_field(
            "tags",
            ValidationErrorCode::TooLong,
            format!("Each tag must be at most {MAX_TAG_LEN} characters"),
        ));
    }
}

fn validate_title(title: &str, errors: &mut ValidationErrors) {
    errors.check(validate_length(title, 3, 100, "title"));
}

fn validate_description(description: &str, errors: &mut ValidationErrors) {
    errors.check(validate_length(description, 10, 1000, "description"));
}

/// Distinguishes an absent field from an explicit `null`
fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
    pub due_date: Option<String>,
    pub tags: Vec<String>,
}

impl Validate for CreateTaskRequest {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        validate_title(&self.title, &mut errors);
        validate_description(&self.description, &mut errors);
        if let Some(status) = &self.status {
            errors.check(validate_choice(status, TaskStatus::ALL, "status"));
        }
        if let Some(priority) = &self.priority {
            errors.check(validate_choice(priority, TaskPriority::ALL, "priority"));
        }
        if let Some(assignee) = &self.assigned_to {
            if Uuid::parse_str(assignee.trim()).is_err() {
                errors.push(ValidationError::for_field(
                    "assignedTo",
                    ValidationErrorCode::InvalidFormat,
                    "Invalid user id",
                ));
            }
        }
        if let Some(due) = &self.due_date {
            errors.check(validate_timestamp(due, "dueDate"));
        }
        validate_tags(&self.tags, &mut errors);
        errors.into_result()
    }
}

impl CreateTaskRequest {
    /// Engine input; call after validation
    fn into_draft(self) -> TaskDraft {
        TaskDraft {
            status: self.status.and_then(|s| s.parse().ok()),
            priority: self.priority.and_then(|p| p.parse().ok()),
            assigned_to: self.assigned_to.and_then(|a| Uuid::parse_str(a.trim()).ok()),
            due_date: self.due_date.as_deref().and_then(parse_timestamp),
            tags: clean_tags(&self.tags),
            title: self.title,
            description: self.description,
        }
    }
}

/// Only these fields can change; anything else in the body is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    /// `null` clears the due date
    #[serde(deserialize_with = "double_option")]
    pub due_date: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
}

impl Validate for UpdateTaskRequest {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Some(title) = &self.title {
            validate_title(title, &mut errors);
        }
        if let Some(description) = &self.description {
            validate_description(description, &mut errors);
        }
        if let Some(status) = &self.status {
            errors.check(validate_choice(status, TaskStatus::ALL, "status"));
        }
        if let Some(priority) = &self.priority {
            errors.check(validate_choice(priority, TaskPriority::ALL, "priority"));
        }
        if let Some(Some(due)) = &self.due_date {
            errors.check(validate_timestamp(due, "dueDate"));
        }
        if let Some(tags) = &self.tags {
            validate_tags(tags, &mut errors);
        }
        errors.into_result()
    }
}

impl UpdateTaskRequest {
    fn into_changes(self) -> TaskChanges {
        TaskChanges {
            title: self.title,
            description: self.description,
            status: self.status.and_then(|s| s.parse().ok()),
            priority: self.priority.and_then(|p| p.parse().ok()),
            due_date: self.due_date.map(|due| due.as_deref().and_then(parse_timestamp)),
            tags: self.tags.as_deref().map(clean_tags),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListTasksQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
}

impl Validate for ListTasksQuery {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        validate_page(self.page, self.limit, &mut errors);
        if let Some(status) = self.status.as_deref().filter(|s| !s.is_empty()) {
            errors.check(validate_choice(status, TaskStatus::ALL, "status"));
        }
        if let Some(priority) = self.priority.as_deref().filter(|p| !p.is_empty()) {
            errors.check(validate_choice(priority, TaskPriority::ALL, "priority"));
        }
        errors.into_result()
    }
}

// ============================================================================
// Response data
// ============================================================================

#[derive(Debug, Serialize)]
struct TaskData {
    task: TaskView,
}

#[derive(Debug, Serialize)]
struct TaskListData {
    tasks: Vec<TaskView>,
    pagination: Pagination,
}

#[derive(Debug, Serialize)]
struct StatsData {
    stats: TaskStats,
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /api/tasks`
pub async fn create_task(
    State(state): State<AppState>,
    CurrentAccount(caller): CurrentAccount,
    ValidatedJson(body): ValidatedJson<CreateTaskRequest>,
) -> Result<impl IntoResponse> {
    let task = state.tasks.create(&caller, body.into_draft()).await?;
    Ok(ApiResponse::created(TaskData { task }).with_message("Task created successfully!"))
}

/// `GET /api/tasks`
pub async fn list_tasks(
    State(state): State<AppState>,
    CurrentAccount(caller): CurrentAccount,
    ValidatedQuery(query): ValidatedQuery<ListTasksQuery>,
) -> Result<impl IntoResponse> {
    let query = TaskQuery {
        page: page_request(query.page, query.limit),
        status: query.status.and_then(|s| s.parse().ok()),
        priority: query.priority.and_then(|p| p.parse().ok()),
        search: query.search,
    };
    let page = state.tasks.list(&caller, query).await?;
    Ok(ApiResponse::ok(TaskListData {
        tasks: page.items,
        pagination: page.pagination,
    }))
}

/// `GET /api/tasks/stats`
pub async fn task_stats(
    State(state): State<AppState>,
    CurrentAccount(caller): CurrentAccount,
) -> Result<impl IntoResponse> {
    let stats = state.tasks.stats(&caller).await?;
    Ok(ApiResponse::ok(StatsData { stats }))
}

/// `GET /api/tasks/{id}`
pub async fn get_task(
    State(state): State<AppState>,
    CurrentAccount(caller): CurrentAccount,
    ValidatedPath(id): ValidatedPath<TaskId>,
) -> Result<impl IntoResponse> {
    let task = state.tasks.get(&caller, id).await?;
    Ok(ApiResponse::ok(TaskData { task }))
}

/// `PUT /api/tasks/{id}`
pub async fn update_task(
    State(state): State<AppState>,
    CurrentAccount(caller): CurrentAccount,
    ValidatedPath(id): ValidatedPath<TaskId>,
    ValidatedJson(body): ValidatedJson<UpdateTaskRequest>,
) -> Result<impl IntoResponse> {
    let task = state.tasks.update(&caller, id, body.into_changes()).await?;
    Ok(ApiResponse::ok(TaskData { task }).with_message("Task updated successfully!"))
}

/// `DELETE /api/tasks/{id}`
pub async fn delete_task(
    State(state): State<AppState>,
    CurrentAccount(caller): CurrentAccount,
    ValidatedPath(id): ValidatedPath<TaskId>,
) -> Result<impl IntoResponse> {
    state.tasks.delete(&caller, id).await?;
    Ok(ApiResponse::message("Task deleted successfully!"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(json: serde_json::Value) -> CreateTaskRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_create_validation() {
        let ok = create(serde_json::json!({
            "title": "Write report",
            "description": "Quarterly numbers for the board",
            "priority": "urgent",
            "dueDate": "2030-01-01",
            "tags": [" work ", ""]
        }));
        assert!(ok.is_valid());
        let draft = ok.into_draft();
        assert_eq!(draft.priority, Some(TaskPriority::Urgent));
        assert_eq!(draft.tags, vec!["work".to_string()]);
        assert!(draft.due_date.is_some());

        let bad = create(serde_json::json!({
            "title": "ab",
            "description": "short",
            "status": "done",
            "assignedTo": "nobody",
            "dueDate": "tomorrow"
        }));
        let messages = bad.validate().unwrap_err().messages();
        assert_eq!(messages.len(), 5);
        assert!(messages.contains(
            &"status: Must be one of: pending, in-progress, completed, cancelled".to_string()
        ));
    }

    #[test]
    fn test_tag_limits() {
        let mut request = create(serde_json::json!({
            "title": "Write report",
            "description": "Quarterly numbers for the board",
        }));
        request.tags = (0..21).map(|i| format!("t{i}")).collect();
        assert!(!request.is_valid());
        request.tags = vec!["x".repeat(31)];
        assert!(!request.is_valid());
    }

    #[test]
    fn test_update_distinguishes_null_due_date() {
        let absent: UpdateTaskRequest = serde_json::from_str(r#"{"title": "New title"}"#).unwrap();
        assert_eq!(absent.into_changes().due_date, None);

        let cleared: UpdateTaskRequest = serde_json::from_str(r#"{"dueDate": null}"#).unwrap();
        assert_eq!(cleared.into_changes().due_date, Some(None));

        let set: UpdateTaskRequest = serde_json::from_str(r#"{"dueDate": "2030-05-01T10:00:00Z"}"#).unwrap();
        assert!(matches!(set.into_changes().due_date, Some(Some(_))));
    }

    #[test]
    fn test_update_ignores_protected_fields() {
        let request: UpdateTaskRequest =
            serde_json::from_str(r#"{"status": "completed", "createdBy": "x", "isDeleted": true}"#).unwrap();
        assert!(request.is_valid());
        let changes = request.into_changes();
        assert_eq!(changes.status, Some(TaskStatus::Completed));
        assert_eq!(changes.title, None);
    }

    #[test]
    fn test_list_query_limits() {
        let query = |page, limit| ListTasksQuery {
            page,
            limit,
            ..Default::default()
        };
        assert!(query(None, None).is_valid());
        assert!(query(Some(2), Some(100)).is_valid());
        assert!(!query(Some(0), None).is_valid());
        assert!(!query(None, Some(101)).is_valid());
    }
}
