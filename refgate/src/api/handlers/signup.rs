//! Registration landing and `/sign-up/{username}` share links.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::{IntoParams, ToSchema};

use crate::{
    AppState,
    errors::Error,
    referral::{ReferralContext, capture::referral_cookie},
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct SignUpQuery {
    /// Set to `pending` when a pending account was turned away at login
    pub activation: Option<String>,
}

/// What the registration page needs to show before the form is submitted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignUpLanding {
    pub registration_enabled: bool,
    /// Code that registration would be attributed to
    pub referral_code: Option<String>,
    pub referred_by_username: Option<String>,
    pub activation_pending: bool,
}

/// Registration landing page
#[utoipa::path(
    get,
    path = "/sign-up/",
    tag = "referrals",
    params(SignUpQuery),
    responses(
        (status = 200, description = "Registration landing details", body = SignUpLanding),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn sign_up_landing(
    State(state): State<AppState>,
    Query(query): Query<SignUpQuery>,
    context: ReferralContext,
) -> Result<Json<SignUpLanding>, Error> {
    let referrer = match state.referrals.resolve(&context).await? {
        Some((referrer_id, _)) => state.store.get_user(referrer_id).await?,
        None => None,
    };

    Ok(Json(SignUpLanding {
        registration_enabled: state.config.auth.allow_registration,
        referral_code: referrer.as_ref().and(context.candidate().map(|(code, _)| code)),
        referred_by_username: referrer.map(|r| r.username),
        activation_pending: query.activation.as_deref() == Some("pending"),
    }))
}

/// Share link: store the named user's code in the referral cookie and go to registration
#[utoipa::path(
    get,
    path = "/sign-up/{username}",
    tag = "referrals",
    params(("username" = String, Path, description = "Referrer's username")),
    responses(
        (status = 303, description = "Redirect to the registration page"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn sign_up_with_username(State(state): State<AppState>, Path(username): Path<String>) -> Result<Response, Error> {
    let config = &state.config.referral;
    let mut response = Redirect::to(&config.registration_path).into_response();

    let Some(code) = state.referrals.code_for_username(&username).await? else {
        debug!("No referral code for share link username");
        return Ok(response);
    };

    match HeaderValue::from_str(&referral_cookie(config, &code)) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => warn!(error = %e, "Skipping unrepresentable referral cookie"),
    }
    Ok(response)
}
