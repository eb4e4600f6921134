//! Authorization gate
//!
//! Middleware that turns a bearer token into a [`CurrentAccount`] on the
//! request, and role checks layered on top of it.
//!
//! ```ignore
//! let tasks = Router::new()
//!     .route("/tasks", get(list_tasks))
//!     .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));
//!
//! let admin = Router::new()
//!     .route("/admin/stats", get(stats))
//!     .route_layer(middleware::from_fn(require_admin))
//!     .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));
//! ```
//!
//! Layers added later run first, so `require_auth` must be the outer
//! (last added) layer.

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;

use crate::api::AppState;
use crate::audit::record_account;
use crate::error::AppError;
use crate::model::{AccountProfile, AccountStatus, Role};
use crate::observability::SecurityEvent;
use crate::security_event;

const NOT_AUTHORIZED: &str = "Not authorized to access this route. Please login.";
const UNKNOWN_SUBJECT: &str = "User not found. Token is invalid.";
const INACTIVE: &str = "Account is suspended or deleted. Please contact support.";
const UNVERIFIED: &str = "Please verify your email before accessing this resource.";

/// The authenticated caller, placed in request extensions by
/// [`require_auth`] or [`optional_auth`].
#[derive(Debug, Clone)]
pub struct CurrentAccount(pub AccountProfile);

impl<S: Send + Sync> FromRequestParts<S> for CurrentAccount {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentAccount>()
            .cloned()
            .ok_or_else(|| AppError::unauthenticated(NOT_AUTHORIZED))
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for CurrentAccount {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<CurrentAccount>().cloned())
    }
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the caller behind a request's bearer token.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AccountProfile, AppError> {
    let token = bearer_token(headers).ok_or_else(|| AppError::unauthenticated(NOT_AUTHORIZED))?;

    let account_id = state.tokens.verify(token).map_err(|e| {
        security_event!(SecurityEvent::TokenRejected, reason = %e, "Bearer token rejected");
        AppError::from(e)
    })?;

    let account = state
        .account_store
        .find_account(account_id)
        .await?
        .ok_or_else(|| {
            security_event!(SecurityEvent::TokenRejected, account_id = %account_id, reason = "unknown_subject", "Bearer token rejected");
            AppError::unauthenticated(UNKNOWN_SUBJECT)
        })?;

    if account.status != AccountStatus::Active {
        security_event!(SecurityEvent::AccessDenied, account_id = %account.id, reason = "inactive", "Access denied");
        return Err(AppError::forbidden(INACTIVE));
    }
    if !account.email_verified {
        security_event!(SecurityEvent::AccessDenied, account_id = %account.id, reason = "unverified", "Access denied");
        return Err(AppError::forbidden(UNVERIFIED));
    }

    Ok(account.profile())
}

/// Reject the request unless it carries a token for an active, verified
/// account.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let account = authenticate(&state, request.headers()).await?;
    record_account(account.id);
    request.extensions_mut().insert(CurrentAccount(account));
    Ok(next.run(request).await)
}

/// Attach the caller when every check passes; never rejects.
pub async fn optional_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if bearer_token(request.headers()).is_some() {
        if let Ok(account) = authenticate(&state, request.headers()).await {
            record_account(account.id);
            request.extensions_mut().insert(CurrentAccount(account));
        }
    }
    next.run(request).await
}

/// Reject callers whose role is not in `roles`. Must run after
/// [`require_auth`].
pub async fn require_roles(roles: &[Role], request: Request, next: Next) -> Result<Response, AppError> {
    let Some(CurrentAccount(account)) = request.extensions().get::<CurrentAccount>() else {
        return Err(AppError::unauthenticated(NOT_AUTHORIZED));
    };
    if !roles.contains(&account.role) {
        security_event!(
            SecurityEvent::AccessDenied,
            account_id = %account.id,
            role = %account.role,
            path = %request.uri().path(),
            "Role not permitted"
        );
        return Err(AppError::forbidden(format!(
            "User role '{}' is not authorized to access this route.",
            account.role
        )));
    }
    Ok(next.run(request).await)
}

/// Admin-only routes
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    require_roles(&[Role::Admin], request, next).await
}
