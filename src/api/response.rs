//! Success envelope
//!
//! Errors render through [`AppError`](crate::error::AppError); successes
//! through [`ApiResponse`], so both share the
//! `{ success, message?, data? }` shape.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Successful response body plus its status code
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip)]
    status: StatusCode,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// 200 with data
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// 201 with data
    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            ..Self::ok(data)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl ApiResponse<()> {
    /// 200 with only a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::ok(json!({"n": 1})).with_message("done")).unwrap();
        assert_eq!(body, json!({"success": true, "message": "done", "data": {"n": 1}}));

        let body = serde_json::to_value(ApiResponse::message("Logged out successfully.")).unwrap();
        assert_eq!(body, json!({"success": true, "message": "Logged out successfully."}));
    }

    #[test]
    fn test_created_status() {
        let response = ApiResponse::created(json!({})).into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
