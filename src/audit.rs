//! Request audit middleware
//!
//! Wraps every request in an `http_request` span carrying a correlation
//! id, client address, method and path, and logs one completion record
//! with status, outcome and latency. The gate records the authenticated
//! account on the same span (see [`record_account`]), so every log line
//! emitted while handling the request is attributable.
//!
//! ```ignore
//! use axum::{Router, middleware};
//! use taskgate::audit::audit_middleware;
//!
//! let app = Router::new()
//!     .route("/api/tasks", get(handler))
//!     .layer(middleware::from_fn(audit_middleware));
//! ```

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use std::fmt;
use std::time::Instant;
use tracing::{error, field, info, Instrument, Span};
use uuid::Uuid;

use crate::model::AccountId;
use crate::observability::SecurityEvent;
use crate::security_event;

/// Header echoing the correlation id back to the client
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Audit middleware, for `axum::middleware::from_fn`.
pub async fn audit_middleware(request: Request, next: Next) -> Response {
    let correlation_id = correlation_id(request.headers());
    let client_ip = client_ip(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
        client_ip = %client_ip,
        account_id = field::Empty,
    );

    let start = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let latency = start.elapsed();

    let status = response.status();
    let outcome = AuditOutcome::from_status(status);
    span.in_scope(|| {
        if outcome == AuditOutcome::RateLimited {
            security_event!(
                SecurityEvent::RateLimitExceeded,
                ip_address = %client_ip,
                path = %path,
                "Rate limit exceeded"
            );
        }
        if status.is_server_error() {
            error!(status = status.as_u16(), latency_ms = latency.as_millis() as u64, "Server error");
        } else {
            info!(
                status = status.as_u16(),
                outcome = %outcome,
                latency_ms = latency.as_millis() as u64,
                "Request completed"
            );
        }
    });

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Attach the authenticated account to the current request span
pub fn record_account(id: AccountId) {
    Span::current().record("account_id", field::display(id));
}

/// Incoming `X-Correlation-ID` / `X-Request-ID`, or a fresh one.
fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get("x-correlation-id")
        .or_else(|| headers.get(REQUEST_ID_HEADER))
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Client address from proxy headers, in priority order:
/// `X-Forwarded-For` (first hop), `X-Real-IP`, `CF-Connecting-IP`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let first = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };
    first("x-forwarded-for")
        .or_else(|| first("x-real-ip"))
        .or_else(|| first("cf-connecting-ip"))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Outcome of an audited request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    /// Rejected input or failed business rule
    Failure,
    /// 401/403/423
    Denied,
    RateLimited,
    Error,
}

impl AuditOutcome {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            s if s.is_success() || s.is_redirection() => Self::Success,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::LOCKED => Self::Denied,
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited,
            s if s.is_server_error() => Self::Error,
            _ => Self::Failure,
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
            Self::RateLimited => "rate_limited",
            Self::Error => "error",
        })
    }
}
