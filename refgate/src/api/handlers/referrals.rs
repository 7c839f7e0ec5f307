use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::{
    AppState,
    activation::ActivationStatus,
    api::models::{
        referrals::{ReferralInfo, ReferralStatusQuery},
        users::CurrentUser,
    },
    auth::current_user::require_admin,
    errors::Error,
    types::{UserId, UserIdOrCurrent},
};

/// Check a user's activation status
///
/// Available to anonymous callers. Unknown or malformed ids are rejected with `invalid_user`.
#[utoipa::path(
    get,
    path = "/api/v1/referral-status",
    tag = "referrals",
    params(ReferralStatusQuery),
    responses(
        (status = 200, description = "Current status and referral progress", body = ActivationStatus),
        (status = 400, description = "Invalid user ID"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_referral_status(
    State(state): State<AppState>,
    Query(query): Query<ReferralStatusQuery>,
) -> Result<Json<ActivationStatus>, Error> {
    let raw = query.user_id.unwrap_or_default();
    let user_id: UserId = raw.trim().parse().map_err(|_| Error::InvalidUser { id: raw.clone() })?;

    Ok(Json(state.activation.status(user_id).await?))
}

/// Get a user's referral code, link and progress
///
/// Use `current` as the id for the caller's own record. Administrators may read any user.
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/referral",
    tag = "referrals",
    params(("user_id" = String, Path, description = "User ID or `current`")),
    responses(
        (status = 200, description = "Referral details", body = ReferralInfo),
        (status = 400, description = "Invalid user ID"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not allowed to view this user"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_user_referral(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrCurrent>,
    current_user: CurrentUser,
) -> Result<Json<ReferralInfo>, Error> {
    let target = match user_id {
        UserIdOrCurrent::Current(_) => current_user.id,
        UserIdOrCurrent::Id(id) => id,
    };
    if target != current_user.id {
        require_admin(&current_user, "read", "referrals")?;
    }

    Ok(Json(state.referrals.info(target).await?))
}
