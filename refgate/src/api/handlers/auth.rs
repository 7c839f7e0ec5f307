use axum::{Json, extract::State, http::StatusCode};
use metrics::counter;
use tracing::{error, info};

use crate::{
    AppState,
    api::models::{
        auth::{
            AuthResponse, AuthSuccessResponse, LoginRequest, LoginResponse, LogoutResponse, RegisterRequest, RegisterResponse,
            RegistrationInfo,
        },
        users::{CurrentUser, Role, UserResponse},
    },
    auth::{password, session},
    config::{Config, PendingLoginPolicy},
    cookies::{CookieSpec, expired_cookie},
    db::models::users::UserCreateDBRequest,
    errors::Error,
    referral::ReferralContext,
    types::abbrev_uuid,
};

/// Get registration information
#[utoipa::path(
    get,
    path = "/authentication/register",
    tag = "authentication",
    responses(
        (status = 200, description = "Registration info", body = RegistrationInfo),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_registration_info(State(state): State<AppState>) -> Result<Json<RegistrationInfo>, Error> {
    let enabled = state.config.auth.allow_registration;
    Ok(Json(RegistrationInfo {
        enabled,
        message: if enabled {
            "Registration is enabled".to_string()
        } else {
            "Registration is disabled".to_string()
        },
    }))
}

/// Register a new account
///
/// New accounts start pending. A referral code found in the `ra_referral` cookie, the referral
/// session or the `ref` query parameter attributes the account to that code's owner.
#[utoipa::path(
    post,
    path = "/authentication/register",
    request_body = RegisterRequest,
    tag = "authentication",
    params(("ref" = Option<String>, Query, description = "Referral code")),
    responses(
        (status = 201, description = "User registered successfully", body = AuthResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "User already exists"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    context: ReferralContext,
    Json(request): Json<RegisterRequest>,
) -> Result<RegisterResponse, Error> {
    if !state.config.auth.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    let username = request.username.trim();
    if username.is_empty() {
        return Err(Error::BadRequest {
            message: "Username is required".to_string(),
        });
    }
    let email = request.email.trim();
    if !email.contains('@') {
        return Err(Error::BadRequest {
            message: "A valid email address is required".to_string(),
        });
    }

    let password_config = &state.config.auth.password;
    if request.password.len() < password_config.min_length {
        return Err(Error::BadRequest {
            message: format!("Password must be at least {} characters", password_config.min_length),
        });
    }
    if request.password.len() > password_config.max_length {
        return Err(Error::BadRequest {
            message: format!("Password must be no more than {} characters", password_config.max_length),
        });
    }

    let password_hash = password::hash_string_blocking(request.password, password_config.into()).await?;
    let created_user = state
        .store
        .create_user(&UserCreateDBRequest {
            username: username.to_string(),
            email: email.to_string(),
            display_name: request.display_name,
            password_hash: Some(password_hash),
            role: Role::Pending,
        })
        .await?;
    counter!("refgate_registrations_total").increment(1);
    info!(user_id = %abbrev_uuid(&created_user.id), "User registered");

    // The account exists from here on, so attribution problems never fail the registration
    let referral_code = match state.referrals.on_user_registered(&created_user, &context).await {
        Ok(outcome) => Some(outcome.referral_code),
        Err(e) => {
            error!(user_id = %abbrev_uuid(&created_user.id), error = %e, "Referral processing failed for new user");
            state.notices.push(
                "attribution",
                format!("Referral processing for user {} was skipped: {e}", created_user.username),
            );
            None
        }
    };

    let user_response = UserResponse::from(created_user);
    let cookie = if state.config.auth.auto_login_after_registration {
        let current_user = CurrentUser::from(user_response.clone());
        Some(create_session_cookie(
            &session::create_session_token(&current_user, &state.config)?,
            &state.config,
        ))
    } else {
        None
    };

    Ok(RegisterResponse {
        auth_response: AuthResponse {
            user: user_response,
            message: "Registration successful".to_string(),
            referral_code,
            redirect_to: Some(state.config.gate.holding_page_path()),
        },
        cookie,
    })
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/authentication/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account pending activation", body = AuthResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<LoginResponse, Error> {
    let invalid = || Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    };

    let user = state
        .store
        .get_user_by_email(request.email.trim())
        .await?
        .ok_or_else(invalid)?;
    let password_hash = user.password_hash.clone().ok_or_else(invalid)?;

    if !password::verify_string_blocking(request.password, password_hash).await? {
        return Err(invalid());
    }

    let pending = user.role.is_pending();
    let user_response = UserResponse::from(user);

    if pending && state.config.auth.pending_login == PendingLoginPolicy::Deny {
        info!(user_id = %abbrev_uuid(&user_response.id), "Refusing session for pending account");
        return Ok(LoginResponse {
            status: StatusCode::FORBIDDEN,
            auth_response: AuthResponse {
                user: user_response,
                message: "Your account is pending activation".to_string(),
                referral_code: None,
                redirect_to: Some(format!("{}?activation=pending", state.config.referral.registration_path)),
            },
            cookie: expired_cookie(&state.config.auth.session.cookie_name),
        });
    }

    let current_user = CurrentUser::from(user_response.clone());
    let token = session::create_session_token(&current_user, &state.config)?;

    Ok(LoginResponse {
        status: StatusCode::OK,
        auth_response: AuthResponse {
            user: user_response,
            message: "Login successful".to_string(),
            referral_code: None,
            redirect_to: pending.then(|| state.config.gate.holding_page_path()),
        },
        cookie: create_session_cookie(&token, &state.config),
    })
}

/// Logout (clear session)
#[utoipa::path(
    post,
    path = "/authentication/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> Result<LogoutResponse, Error> {
    Ok(LogoutResponse {
        auth_response: AuthSuccessResponse {
            message: "Logout successful".to_string(),
        },
        cookie: expired_cookie(&state.config.auth.session.cookie_name),
    })
}

fn create_session_cookie(token: &str, config: &Config) -> String {
    let session_config = &config.auth.session;
    CookieSpec {
        name: &session_config.cookie_name,
        value: token,
        max_age: session_config.timeout,
        domain: None,
        secure: session_config.cookie_secure,
        same_site: &session_config.cookie_same_site,
    }
    .render()
}
