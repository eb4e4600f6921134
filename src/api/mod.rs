//! HTTP surface
//!
//! [`app`] assembles the full router: public auth routes, gated auth,
//! task and admin routes, a health probe, and the hardening layers from
//! [`SecureRouter`]. Handlers are thin; they validate the payload, call
//! one engine method and wrap the result in [`ApiResponse`].
//!
//! | Prefix | Gate |
//! |---|---|
//! | `/api/auth/{register,verify-otp,resend-otp,login}` | public |
//! | `/api/auth/{me,logout}`, `/api/tasks/**` | `require_auth` |
//! | `/api/admin/**` | `require_auth` + `require_admin` |
//! | `/health` | `optional_auth` |

pub mod admin;
pub mod auth;
pub mod response;
pub mod tasks;

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

pub use response::ApiResponse;

use crate::accounts::AccountService;
use crate::admin::AdminService;
use crate::clock::Clock;
use crate::config::HttpConfig;
use crate::error::AppError;
use crate::gate::{optional_auth, require_admin, require_auth, CurrentAccount};
use crate::layers::SecureRouter;
use crate::login::LockoutPolicy;
use crate::model::PageRequest;
use crate::notifier::Notifier;
use crate::otp::OtpPolicy;
use crate::store::{AccountStore, MemoryStore, TaskStore};
use crate::tasks::TaskService;
use crate::token::TokenIssuer;
use crate::validation::{validate_range, ValidationError, ValidationErrorCode, ValidationErrors};

/// Largest accepted `limit` on listings
pub const MAX_PAGE_SIZE: u32 = 100;

/// Store handles, usually two views of one backend
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub tasks: Arc<dyn TaskStore>,
}

impl Stores {
    /// Fresh in-memory backend
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            accounts: store.clone(),
            tasks: store,
        }
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub accounts: AccountService,
    pub tasks: TaskService,
    pub admin: AdminService,
    pub tokens: Arc<TokenIssuer>,
    pub account_store: Arc<dyn AccountStore>,
}

impl AppState {
    pub fn new(
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        tokens: Arc<TokenIssuer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts: AccountService::new(stores.accounts.clone(), notifier, tokens.clone(), clock.clone()),
            tasks: TaskService::new(stores.tasks.clone(), stores.accounts.clone(), clock.clone()),
            admin: AdminService::new(stores.accounts.clone(), stores.tasks, clock),
            tokens,
            account_store: stores.accounts,
        }
    }

    pub fn with_otp_policy(mut self, policy: OtpPolicy) -> Self {
        self.accounts = self.accounts.with_otp_policy(policy);
        self
    }

    pub fn with_lockout_policy(mut self, policy: LockoutPolicy) -> Self {
        self.accounts = self.accounts.with_lockout_policy(policy);
        self
    }
}

/// Build the complete application router.
pub fn app(state: AppState, http: &HttpConfig) -> Router {
    let gate = || middleware::from_fn_with_state(state.clone(), require_auth);

    let auth_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout))
        .route_layer(gate())
        .route("/register", post(auth::register))
        .route("/verify-otp", post(auth::verify_otp))
        .route("/resend-otp", post(auth::resend_otp))
        .route("/login", post(auth::login));

    let task_routes = Router::new()
        .route("/", get(tasks::list_tasks).post(tasks::create_task))
        .route("/stats", get(tasks::task_stats))
        .route(
            "/{id}",
            get(tasks::get_task).put(tasks::update_task).delete(tasks::delete_task),
        )
        .route_layer(gate());

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users))
        .route("/users/{id}", get(admin::get_user).delete(admin::delete_user))
        .route("/users/{id}/role", put(admin::update_role))
        .route("/users/{id}/status", put(admin::update_status))
        .route("/stats", get(admin::system_stats))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(gate());

    let health_routes = Router::new()
        .route("/health", get(health))
        .route_layer(middleware::from_fn_with_state(state.clone(), optional_auth));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/tasks", task_routes)
        .nest("/api/admin", admin_routes)
        .merge(health_routes)
        .fallback(not_found)
        .with_state(state)
        .with_security(http)
}

/// `GET /health`
///
/// Anonymous callers get the status only; admins also see the version and
/// the store check result.
async fn health(State(state): State<AppState>, caller: Option<CurrentAccount>) -> Response {
    let store = state.account_store.ping().await;
    let healthy = store.is_ok();
    if let Err(e) = &store {
        warn!(error = %e, "Health check: store unreachable");
    }

    let status = if healthy { "ok" } else { "unavailable" };
    let mut body = json!({ "success": healthy, "data": { "status": status } });
    if caller.is_some_and(|CurrentAccount(c)| c.is_admin()) {
        body["data"]["version"] = json!(env!("CARGO_PKG_VERSION"));
        body["data"]["store"] = json!(match &store {
            Ok(()) => "ok".to_string(),
            Err(e) => e.to_string(),
        });
    }

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

async fn not_found(uri: Uri) -> AppError {
    AppError::not_found(format!("Route {} not found", uri.path()))
}

// ============================================================================
// Shared payload checks
// ============================================================================

/// `value` must parse as one of `allowed`
pub(crate) fn validate_choice<T>(value: &str, allowed: &[T], field: &str) -> Result<(), ValidationError>
where
    T: FromStr + fmt::Display,
{
    if value.parse::<T>().is_ok() {
        return Ok(());
    }
    let options: Vec<String> = allowed.iter().map(ToString::to_string).collect();
    Err(ValidationError::for_field(
        field,
        ValidationErrorCode::NotAllowed,
        format!("Must be one of: {}", options.join(", ")),
    ))
}

/// `page >= 1`, `1 <= limit <= MAX_PAGE_SIZE`
pub(crate) fn validate_page(page: Option<u32>, limit: Option<u32>, errors: &mut ValidationErrors) {
    if page == Some(0) {
        errors.push(ValidationError::for_field(
            "page",
            ValidationErrorCode::OutOfRange,
            "Must be at least 1",
        ));
    }
    if let Some(limit) = limit {
        errors.check(validate_range(limit, 1, MAX_PAGE_SIZE, "limit"));
    }
}

pub(crate) fn page_request(page: Option<u32>, limit: Option<u32>) -> PageRequest {
    PageRequest::new(page, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;

    #[test]
    fn test_validate_choice() {
        assert!(validate_choice("in-progress", TaskStatus::ALL, "status").is_ok());
        let err = validate_choice("done", TaskStatus::ALL, "status").unwrap_err();
        assert_eq!(
            err.to_string(),
            "status: Must be one of: pending, in-progress, completed, cancelled"
        );
    }

    #[test]
    fn test_validate_page() {
        let mut errors = ValidationErrors::new();
        validate_page(Some(0), Some(500), &mut errors);
        assert_eq!(
            errors.messages(),
            vec![
                "page: Must be at least 1".to_string(),
                "limit: Must be between 1 and 100".to_string()
            ]
        );
    }
}
