//! End-to-end tests through the full router and layer stack.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use tower::ServiceExt;

use taskgate::testing::{missing_security_headers, TestApp};

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &TestApp, req: Request<Body>) -> Response {
    app.router().oneshot(req).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_account_lifecycle() {
    let app = TestApp::new();
    let email = "carol@example.com";

    let response = send(
        &app,
        request(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "name": "Carol", "email": email, "password": "Secret123" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["email"], email);
    assert_eq!(body["data"]["otpExpiresIn"], "10 minutes");

    // Resend straight away hits the cooldown
    let response = send(
        &app,
        request(Method::POST, "/api/auth/resend-otp", None, Some(json!({ "email": email }))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    // Unverified login is refused
    let response = send(
        &app,
        request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": email, "password": "Secret123" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let code = app.notifier.last_code(email).unwrap();
    let response = send(
        &app,
        request(
            Method::POST,
            "/api/auth/verify-otp",
            None,
            Some(json!({ "email": email, "otp": code })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Email verified successfully! You can now login.");
    assert!(body["data"]["token"].is_string());

    let response = send(
        &app,
        request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "Carol@Example.com", "password": "Secret123" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let token = body["data"]["token"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["user"]["isEmailVerified"], true);

    let response = send(&app, request(Method::GET, "/api/auth/me", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["user"]["email"], email);
}

#[tokio::test]
async fn test_login_lockout() {
    let app = TestApp::new();
    app.verified_account("Dan", "dan@example.com", "Secret123").await;

    let login = |password: &str| {
        request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "dan@example.com", "password": password })),
        )
    };

    for _ in 0..5 {
        let response = send(&app, login("Wrong123")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Locked even with the right password
    let response = send(&app, login("Secret123")).await;
    assert_eq!(response.status(), StatusCode::LOCKED);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    app.clock.advance(std::time::Duration::from_secs(2 * 60 * 60 + 1));
    let response = send(&app, login("Secret123")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_gate_rejections() {
    let app = TestApp::new();

    let response = send(&app, request(Method::GET, "/api/tasks", None, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Not authorized to access this route. Please login.");

    let response = send(&app, request(Method::GET, "/api/tasks", Some("not-a-jwt"), None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let user = app.verified_account("Erin", "erin@example.com", "Secret123").await;
    let response = send(&app, request(Method::GET, "/api/admin/stats", Some(&user.token), None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(
        body["message"],
        "User role 'user' is not authorized to access this route."
    );
}

#[tokio::test]
async fn test_task_ownership() {
    let app = TestApp::new();
    let owner = app.verified_account("Fay", "fay@example.com", "Secret123").await;
    let other = app.verified_account("Gus", "gus@example.com", "Secret123").await;
    let admin = app.admin_account("Hal", "hal@example.com", "Secret123").await;

    let response = send(
        &app,
        request(
            Method::POST,
            "/api/tasks",
            Some(&owner.token),
            Some(json!({
                "title": "Write report",
                "description": "Quarterly numbers for the board",
                "priority": "high",
                "tags": [" finance ", "", "q3"]
            })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    let task = &body["data"]["task"];
    assert_eq!(task["status"], "pending");
    assert_eq!(task["tags"], json!(["finance", "q3"]));
    let id = task["id"].as_str().unwrap().to_string();
    let uri = format!("/api/tasks/{id}");

    let response = send(&app, request(Method::GET, &uri, Some(&other.token), None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(&app, request(Method::GET, &uri, Some(&admin.token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app,
        request(
            Method::PUT,
            &uri,
            Some(&owner.token),
            Some(json!({ "status": "completed" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["data"]["task"]["completedAt"].is_string());

    let response = send(&app, request(Method::GET, "/api/tasks/stats", Some(&owner.token), None)).await;
    let body = json_body(response).await;
    assert_eq!(body["data"]["stats"]["total"], 1);

    let response = send(&app, request(Method::DELETE, &uri, Some(&owner.token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = send(&app, request(Method::GET, &uri, Some(&owner.token), None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, request(Method::GET, "/api/tasks/not-a-uuid", Some(&owner.token), None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_cannot_change_own_role() {
    let app = TestApp::new();
    let admin = app.admin_account("Ivy", "ivy@example.com", "Secret123").await;
    let user = app.verified_account("Jon", "jon@example.com", "Secret123").await;

    let response = send(
        &app,
        request(
            Method::PUT,
            &format!("/api/admin/users/{}/role", admin.account.id),
            Some(&admin.token),
            Some(json!({ "role": "user" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        request(
            Method::PUT,
            &format!("/api/admin/users/{}/status", user.account.id),
            Some(&admin.token),
            Some(json!({ "status": "suspended" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "User account suspended successfully!");

    // The suspended account's token no longer passes the gate
    let response = send(&app, request(Method::GET, "/api/auth/me", Some(&user.token), None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_security_headers_and_fallback() {
    let app = TestApp::new();

    let response = send(&app, request(Method::GET, "/health", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(missing_security_headers(response.headers()).is_empty());
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "ok");
    assert!(body["data"].get("version").is_none());

    let response = send(&app, request(Method::GET, "/api/nope", None, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(missing_security_headers(response.headers()).is_empty());
    let body = json_body(response).await;
    assert_eq!(body["message"], "Route /api/nope not found");
}

#[tokio::test]
async fn test_health_detail_for_admins() {
    let app = TestApp::new();
    let admin = app.admin_account("Kim", "kim@example.com", "Secret123").await;

    let response = send(&app, request(Method::GET, "/health", Some(&admin.token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["store"], "ok");
    assert!(body["data"]["version"].is_string());
}
