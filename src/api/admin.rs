//! `/api/admin` handlers. Mounted behind `require_auth` and `require_admin`.

use axum::{extract::State, response::IntoResponse};
use serde::{Deserialize, Serialize};

use super::response::ApiResponse;
use super::{page_request, validate_choice, validate_page, AppState};
use crate::admin::AccountQuery;
use crate::error::{AppError, Result};
use crate::gate::CurrentAccount;
use crate::model::{AccountId, AccountProfile, AccountStatus, Pagination, Role};
use crate::validation::{
    Validate, ValidatedJson, ValidatedPath, ValidatedQuery, ValidationError, ValidationErrorCode,
    ValidationErrors,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListUsersQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub role: Option<String>,
    /// "true" or "false"
    pub verified: Option<String>,
    pub search: Option<String>,
}

impl Validate for ListUsersQuery {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        validate_page(self.page, self.limit, &mut errors);
        if let Some(role) = self.role.as_deref().filter(|r| !r.is_empty()) {
            errors.check(validate_choice(role, Role::ALL, "role"));
        }
        if let Some(verified) = &self.verified {
            if verified.parse::<bool>().is_err() {
                errors.push(ValidationError::for_field(
                    "verified",
                    ValidationErrorCode::NotAllowed,
                    "Must be one of: true, false",
                ));
            }
        }
        errors.into_result()
    }
}

/// Role change body. The value is checked by the handler so the client
/// gets the dedicated message rather than a generic validation list.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RoleRequest {
    pub role: Option<String>,
}

impl Validate for RoleRequest {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        Ok(())
    }
}

impl RoleRequest {
    fn role(&self) -> Result<Role> {
        self.role
            .as_deref()
            .and_then(|r| r.parse().ok())
            .ok_or_else(|| AppError::bad_request(r#"Invalid role. Must be either "user" or "admin"."#))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatusRequest {
    pub status: Option<String>,
}

impl Validate for StatusRequest {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        Ok(())
    }
}

impl StatusRequest {
    /// Only `active` and `suspended`; deletion has its own route
    fn status(&self) -> Result<AccountStatus> {
        match self.status.as_deref().map(str::parse) {
            Some(Ok(status @ (AccountStatus::Active | AccountStatus::Suspended))) => Ok(status),
            _ => Err(AppError::bad_request(
                r#"Invalid status. Must be either "active" or "suspended"."#,
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct UserListData {
    users: Vec<AccountProfile>,
    pagination: Pagination,
}

#[derive(Debug, Serialize)]
struct UserData {
    user: AccountProfile,
}

/// `GET /api/admin/users`
pub async fn list_users(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<ListUsersQuery>,
) -> Result<impl IntoResponse> {
    let query = AccountQuery {
        page: page_request(query.page, query.limit),
        role: query.role.and_then(|r| r.parse().ok()),
        verified: query.verified.and_then(|v| v.parse().ok()),
        search: query.search,
    };
    let page = state.admin.list_accounts(query).await?;
    Ok(ApiResponse::ok(UserListData {
        users: page.items,
        pagination: page.pagination,
    }))
}

/// `GET /api/admin/users/{id}`
pub async fn get_user(
    State(state): State<AppState>,
    ValidatedPath(id): ValidatedPath<AccountId>,
) -> Result<impl IntoResponse> {
    let detail = state.admin.get_account(id).await?;
    Ok(ApiResponse::ok(detail))
}

/// `PUT /api/admin/users/{id}/role`
pub async fn update_role(
    State(state): State<AppState>,
    CurrentAccount(caller): CurrentAccount,
    ValidatedPath(id): ValidatedPath<AccountId>,
    ValidatedJson(body): ValidatedJson<RoleRequest>,
) -> Result<impl IntoResponse> {
    let role = body.role()?;
    let user = state.admin.update_role(&caller, id, role).await?;
    Ok(ApiResponse::ok(UserData { user }).with_message(format!("User role updated to {role} successfully!")))
}

/// `PUT /api/admin/users/{id}/status`
pub async fn update_status(
    State(state): State<AppState>,
    CurrentAccount(caller): CurrentAccount,
    ValidatedPath(id): ValidatedPath<AccountId>,
    ValidatedJson(body): ValidatedJson<StatusRequest>,
) -> Result<impl IntoResponse> {
    let status = body.status()?;
    let user = state.admin.update_status(&caller, id, status).await?;
    let verb = match status {
        AccountStatus::Active => "activated",
        _ => "suspended",
    };
    Ok(ApiResponse::ok(UserData { user }).with_message(format!("User account {verb} successfully!")))
}

/// `DELETE /api/admin/users/{id}`
pub async fn delete_user(
    State(state): State<AppState>,
    CurrentAccount(caller): CurrentAccount,
    ValidatedPath(id): ValidatedPath<AccountId>,
) -> Result<impl IntoResponse> {
    state.admin.delete_account(&caller, id).await?;
    Ok(ApiResponse::message("User deleted successfully!"))
}

/// `GET /api/admin/stats`
pub async fn system_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let stats = state.admin.system_stats().await?;
    Ok(ApiResponse::ok(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_body() {
        let body = |role: Option<&str>| RoleRequest {
            role: role.map(String::from),
        };
        assert_eq!(body(Some("admin")).role().unwrap(), Role::Admin);
        let err = body(Some("root")).role().unwrap_err();
        assert_eq!(err.message, r#"Invalid role. Must be either "user" or "admin"."#);
        assert!(body(None).role().is_err());
    }

    #[test]
    fn test_status_body_rejects_deleted() {
        let body = |status: &str| StatusRequest {
            status: Some(status.to_string()),
        };
        assert_eq!(body("suspended").status().unwrap(), AccountStatus::Suspended);
        assert!(body("deleted").status().is_err());
        assert!(body("banned").status().is_err());
    }

    #[test]
    fn test_list_query_verified_flag() {
        let query = ListUsersQuery {
            verified: Some("yes".into()),
            ..Default::default()
        };
        assert!(!query.is_valid());
        let query = ListUsersQuery {
            verified: Some("false".into()),
            role: Some("admin".into()),
            ..Default::default()
        };
        assert!(query.is_valid());
    }
}
