//! API request/response models for registration, login and logout.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::models::users::UserResponse;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegistrationInfo {
    pub enabled: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub message: String,
    /// The new account's referral code (registration only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
    /// Where the client should go next
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthSuccessResponse {
    pub message: String,
}

fn with_cookie(mut response: Response, cookie: Option<&str>) -> Response {
    if let Some(cookie) = cookie {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!("Failed to encode session cookie: {}", e),
        }
    }
    response
}

/// 201 with the new account, plus a session cookie when auto-login is enabled.
pub struct RegisterResponse {
    pub auth_response: AuthResponse,
    pub cookie: Option<String>,
}

impl IntoResponse for RegisterResponse {
    fn into_response(self) -> Response {
        with_cookie(
            (StatusCode::CREATED, Json(self.auth_response)).into_response(),
            self.cookie.as_deref(),
        )
    }
}

/// Login result. Pending accounts denied a session get 403 with a cookie that clears any old
/// session.
pub struct LoginResponse {
    pub status: StatusCode,
    pub auth_response: AuthResponse,
    pub cookie: String,
}

impl IntoResponse for LoginResponse {
    fn into_response(self) -> Response {
        with_cookie((self.status, Json(self.auth_response)).into_response(), Some(&self.cookie))
    }
}

pub struct LogoutResponse {
    pub auth_response: AuthSuccessResponse,
    pub cookie: String,
}

impl IntoResponse for LogoutResponse {
    fn into_response(self) -> Response {
        with_cookie(Json(self.auth_response).into_response(), Some(&self.cookie))
    }
}
