//! Access gate for pending accounts.
//!
//! [`decide`] is a pure function of the caller's current role and the request path. The
//! [`access_gate`] middleware applies redirect decisions before routing; page rendering applies
//! restrict decisions by replacing page content with the pending notice.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::{trace, warn};

use crate::AppState;
use crate::api::models::users::Role;
use crate::auth::current_user::authenticate;
use crate::config::{Config, GateMode};

const STATIC_EXTENSIONS: &[&str] = &[".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".ico", ".svg"];
const API_PREFIXES: &[&str] = &["/api/", "/admin/api/", "/authentication/", "/internal/", "/admin/docs"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    /// Serve the page with its content replaced by the pending notice
    Restrict,
    /// Send the caller to this path instead
    Redirect(String),
}

pub fn is_static_asset(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    STATIC_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Machine endpoints that are never gated.
pub fn is_api_path(path: &str) -> bool {
    path == "/healthz" || API_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

fn is_logout(path: &str) -> bool {
    path.to_ascii_lowercase().contains("logout")
}

fn same_path(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Paths every caller may reach regardless of role.
pub fn is_exempt(path: &str, config: &Config) -> bool {
    same_path(path, &config.gate.holding_page_path())
        || path.starts_with(&config.referral.registration_path)
        || is_logout(path)
        || is_static_asset(path)
        || is_api_path(path)
}

/// Decide what a caller with `role` (`None` when anonymous) may see at `path`.
pub fn decide(role: Option<Role>, path: &str, config: &Config) -> GateDecision {
    if !role.is_some_and(|r| r.is_pending()) || is_exempt(path, config) {
        return GateDecision::Allow;
    }

    let holding_page = config.gate.holding_page_path();
    let in_restricted_section = path
        .split('/')
        .any(|segment| config.gate.restricted_sections.iter().any(|s| s == segment));
    if in_restricted_section {
        return GateDecision::Redirect(holding_page);
    }

    match config.gate.mode {
        GateMode::Restrict => GateDecision::Restrict,
        GateMode::Redirect => GateDecision::Redirect(holding_page),
    }
}

pub async fn access_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if is_exempt(path, &state.config) {
        return next.run(request).await;
    }

    let role = match authenticate(request.headers(), &state).await {
        Ok(user) => user.map(|u| u.role),
        Err(e) => {
            // Fail open: the page handlers re-check the caller and report the storage error
            warn!(error = %e, "Could not resolve caller for access gate");
            None
        }
    };

    match decide(role, path, &state.config) {
        GateDecision::Redirect(target) => {
            trace!(%path, %target, "Redirecting pending account");
            Redirect::to(&target).into_response()
        }
        GateDecision::Allow | GateDecision::Restrict => next.run(request).await,
    }
}
