use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{HeaderMap, request::Parts},
};
use tracing::{instrument, trace};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    cookies::read_cookie,
    errors::{Error, Result},
    types::abbrev_uuid,
};

/// Resolve the caller from the session cookie.
///
/// Returns `Ok(None)` when there is no cookie, the token is invalid or expired, or the account
/// no longer exists. Storage failures are propagated.
#[instrument(skip_all)]
pub async fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<Option<CurrentUser>> {
    let Some(token) = read_cookie(headers, &state.config.auth.session.cookie_name) else {
        trace!("No session cookie present");
        return Ok(None);
    };

    let claims = match session::verify_session_token(token, &state.config) {
        Ok(claims) => claims,
        Err(e) => {
            // Expired tokens are expected, so they don't fail the request
            trace!("Ignoring invalid session token: {:?}", e);
            return Ok(None);
        }
    };

    let user = state.store.get_user(claims.sub).await?;
    if user.is_none() {
        trace!("Session for deleted user {}", abbrev_uuid(&claims.sub));
    }
    Ok(user.map(CurrentUser::from))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        authenticate(&parts.headers, state)
            .await?
            .ok_or(Error::Unauthenticated { message: None })
    }
}

impl OptionalFromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Option<Self>> {
        authenticate(&parts.headers, state).await
    }
}

/// Reject callers without the administrator role.
pub fn require_admin(user: &CurrentUser, action: &str, resource: &str) -> Result<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions {
            action: action.to_string(),
            resource: resource.to_string(),
        })
    }
}
