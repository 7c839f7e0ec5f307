//! Middleware that remembers a referral code seen in the query string.
//!
//! Any request carrying `?ref=CODE` stores the code in the referral cookie and the server-side
//! session. Anonymous page views outside the registration page are then sent to the registration
//! page with the code attached.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::{debug, warn};

use crate::AppState;
use crate::auth::current_user::authenticate;
use crate::config::ReferralConfig;
use crate::cookies::{CookieSpec, read_cookie};
use crate::gate::is_api_path;
use crate::referral::context::{query_value, sanitize_code};
use crate::referral::session::ReferralSessions;

/// `Set-Cookie` value for the referral cookie.
pub fn referral_cookie(config: &ReferralConfig, code: &str) -> String {
    CookieSpec {
        name: &config.cookie_name,
        value: code,
        max_age: config.cookie_max_age,
        domain: config.cookie_domain.as_deref(),
        secure: config.cookie_secure,
        same_site: "lax",
    }
    .render()
}

fn session_cookie(config: &ReferralConfig, session_id: &str) -> String {
    CookieSpec {
        name: &config.session_cookie_name,
        value: session_id,
        max_age: config.session_ttl,
        domain: config.cookie_domain.as_deref(),
        secure: config.cookie_secure,
        same_site: "lax",
    }
    .render()
}

/// Registration page URL carrying the code.
pub fn registration_redirect(config: &ReferralConfig, code: &str) -> String {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(&config.query_param, code)
        .finish();
    format!("{}?{}", config.registration_path, query)
}

pub async fn capture_referral(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let config = &state.config.referral;
    let Some(code) = query_value(request.uri().query(), &config.query_param).and_then(|raw| sanitize_code(&raw)) else {
        return next.run(request).await;
    };

    let (session_id, new_session) = match read_cookie(request.headers(), &config.session_cookie_name) {
        Some(existing) => (existing.to_string(), false),
        None => (ReferralSessions::new_session_id(), true),
    };
    state.referral_sessions.set(&session_id, &code).await;
    debug!(path = %request.uri().path(), "Captured referral code from query");

    let path = request.uri().path();
    let wants_redirect = config.redirect_to_registration
        && request.method() == Method::GET
        && !is_api_path(path)
        && !path.starts_with(&config.registration_path);

    let anonymous = wants_redirect
        && match authenticate(request.headers(), &state).await {
            Ok(user) => user.is_none(),
            Err(e) => {
                warn!(error = %e, "Could not resolve caller while capturing referral");
                false
            }
        };

    let mut response = if anonymous {
        Redirect::to(&registration_redirect(config, &code)).into_response()
    } else {
        next.run(request).await
    };

    let mut cookies = vec![referral_cookie(config, &code)];
    if new_session {
        cookies.push(session_cookie(config, &session_id));
    }
    for cookie in cookies {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "Skipping unrepresentable referral cookie"),
        }
    }

    response
}
