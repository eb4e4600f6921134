//! `/api/auth` handlers

use axum::{
    extract::State,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::response::ApiResponse;
use super::AppState;
use crate::accounts::Session;
use crate::error::Result;
use crate::gate::CurrentAccount;
use crate::model::{AccountId, AccountProfile};
use crate::observability::SecurityEvent;
use crate::password::PasswordPolicy;
use crate::security_event;
use crate::validation::{
    validate_email, validate_length, validate_required, Validate, ValidatedJson, ValidationError,
    ValidationErrorCode, ValidationErrors,
};

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl Validate for RegisterRequest {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(validate_length(&self.name, 2, 50, "name"));
        errors.check(validate_email(&self.email));
        PasswordPolicy::default().validate_into(&self.password, &mut errors);
        errors.into_result()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

impl Validate for VerifyOtpRequest {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(validate_email(&self.email));
        errors.check(validate_otp(&self.otp));
        errors.into_result()
    }
}

fn validate_otp(otp: &str) -> std::result::Result<(), ValidationError> {
    validate_required(otp, "otp")?;
    let otp = otp.trim();
    if otp.len() != 6 || !otp.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::for_field(
            "otp",
            ValidationErrorCode::InvalidFormat,
            "OTP must be a 6-digit number",
        ));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResendOtpRequest {
    pub email: String,
}

impl Validate for ResendOtpRequest {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        validate_email(&self.email).map_err(Into::into)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(validate_email(&self.email));
        errors.check(validate_required(&self.password, "password"));
        errors.into_result()
    }
}

// ============================================================================
// Response data
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationData {
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<AccountId>,
    email: String,
    name: String,
    otp_expires_in: String,
}

#[derive(Debug, Serialize)]
struct SessionData {
    user: AccountProfile,
    token: String,
}

impl From<Session> for SessionData {
    fn from(session: Session) -> Self {
        Self {
            user: session.account,
            token: session.token,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResendData {
    otp_expires_in: String,
}

#[derive(Debug, Serialize)]
struct ProfileData {
    user: AccountProfile,
}

fn minutes(n: u64) -> String {
    format!("{n} minutes")
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /api/auth/register`
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<RegisterRequest>,
) -> Result<Response> {
    let registration = state
        .accounts
        .register(&body.name, &body.email, &body.password)
        .await?;

    let expires = minutes(registration.otp_expires_in_minutes);
    if registration.created {
        let data = RegistrationData {
            user_id: Some(registration.account_id),
            email: registration.email,
            name: registration.name,
            otp_expires_in: expires,
        };
        Ok(ApiResponse::created(data)
            .with_message("Registration successful! OTP sent to your email. Please verify to login.")
            .into_response())
    } else {
        let data = RegistrationData {
            user_id: None,
            email: registration.email,
            name: registration.name,
            otp_expires_in: expires,
        };
        Ok(ApiResponse::ok(data)
            .with_message("User already exists but email not verified. New OTP sent to your email.")
            .into_response())
    }
}

/// `POST /api/auth/verify-otp`
pub async fn verify_otp(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<VerifyOtpRequest>,
) -> Result<impl IntoResponse> {
    let session = state.accounts.verify_otp(&body.email, body.otp.trim()).await?;
    Ok(ApiResponse::ok(SessionData::from(session))
        .with_message("Email verified successfully! You can now login."))
}

/// `POST /api/auth/resend-otp`
pub async fn resend_otp(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<ResendOtpRequest>,
) -> Result<impl IntoResponse> {
    let expires_in = state.accounts.resend_otp(&body.email).await?;
    Ok(ApiResponse::ok(ResendData {
        otp_expires_in: minutes(expires_in),
    })
    .with_message("New OTP sent to your email."))
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse> {
    let session = state.accounts.login(&body.email, &body.password).await?;
    Ok(ApiResponse::ok(SessionData::from(session)).with_message("Login successful!"))
}

/// `GET /api/auth/me`
pub async fn me(State(state): State<AppState>, CurrentAccount(caller): CurrentAccount) -> Result<impl IntoResponse> {
    let user = state.accounts.profile(caller.id).await?;
    Ok(ApiResponse::ok(ProfileData { user }))
}

/// `POST /api/auth/logout`
///
/// Tokens are not revoked; the client discards its copy.
pub async fn logout(CurrentAccount(caller): CurrentAccount) -> impl IntoResponse {
    security_event!(SecurityEvent::Logout, account_id = %caller.id, "Logout");
    ApiResponse::message("Logged out successfully.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_validation_collects_everything() {
        let request = RegisterRequest {
            name: "A".into(),
            email: "not-an-email".into(),
            password: "short".into(),
        };
        let messages = request.validate().unwrap_err().messages();
        assert!(messages.contains(&"name: Must be at least 2 characters".to_string()));
        assert!(messages.contains(&"email: Please provide a valid email address".to_string()));
        assert!(messages
            .iter()
            .any(|m| m == "password: Password must contain at least one uppercase letter"));
        assert!(messages
            .iter()
            .any(|m| m == "password: Password must contain at least one number"));
    }

    #[test]
    fn test_otp_format() {
        let request = |otp: &str| VerifyOtpRequest {
            email: "a@x.com".into(),
            otp: otp.into(),
        };
        assert!(request("123456").is_valid());
        assert!(!request("12345").is_valid());
        assert!(!request("12a456").is_valid());
        assert_eq!(
            request("").validate().unwrap_err().messages(),
            vec!["otp: Field is required".to_string()]
        );
    }

    #[test]
    fn test_login_needs_password() {
        let request = LoginRequest {
            email: "a@x.com".into(),
            password: String::new(),
        };
        assert!(!request.is_valid());
    }
}
