//! Administrator endpoints: activation settings, referral reporting, manual status changes,
//! operator notices and page editing.

use axum::{
    Json,
    extract::{Path, State},
};

use crate::{
    AppState,
    api::models::{
        pages::{PageResponse, PageUpsertRequest},
        referrals::{ReferralAnalytics, ReferralSummary},
        users::{CurrentUser, UserResponse, UserStatusUpdate},
    },
    auth::current_user::require_admin,
    db::models::{pages::PageUpsertDBRequest, settings::ActivationSettings},
    errors::Error,
    notices::AdminNotice,
    types::UserId,
};

/// Get activation settings
#[utoipa::path(
    get,
    path = "/settings",
    tag = "admin",
    responses(
        (status = 200, description = "Current activation settings", body = ActivationSettings),
        (status = 403, description = "Administrators only"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_settings(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<ActivationSettings>, Error> {
    require_admin(&current_user, "read", "settings")?;
    Ok(Json(state.activation.settings().await?))
}

/// Replace activation settings
///
/// A new threshold applies to future evaluations only; active accounts stay active.
#[utoipa::path(
    put,
    path = "/settings",
    tag = "admin",
    request_body = ActivationSettings,
    responses(
        (status = 200, description = "Settings saved", body = ActivationSettings),
        (status = 400, description = "Threshold below 1"),
        (status = 403, description = "Administrators only"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_settings(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(settings): Json<ActivationSettings>,
) -> Result<Json<ActivationSettings>, Error> {
    require_admin(&current_user, "update", "settings")?;
    Ok(Json(state.activation.update_settings(&settings).await?))
}

/// List every user's referral code, count and referred users
#[utoipa::path(
    get,
    path = "/referrals",
    tag = "admin",
    responses(
        (status = 200, description = "Referral overview", body = [ReferralSummary]),
        (status = 403, description = "Administrators only"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_referrals(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<ReferralSummary>>, Error> {
    require_admin(&current_user, "read", "referrals")?;
    Ok(Json(state.referrals.summaries().await?))
}

/// Referral totals and top referrers
#[utoipa::path(
    get,
    path = "/analytics",
    tag = "admin",
    responses(
        (status = 200, description = "Referral analytics", body = ReferralAnalytics),
        (status = 403, description = "Administrators only"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_analytics(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<ReferralAnalytics>, Error> {
    require_admin(&current_user, "read", "analytics")?;
    Ok(Json(state.referrals.analytics().await?))
}

/// Manually activate an account or return it to pending
#[utoipa::path(
    patch,
    path = "/users/{user_id}/status",
    tag = "admin",
    request_body = UserStatusUpdate,
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "Administrator accounts cannot be changed"),
        (status = 403, description = "Administrators only"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_user_status(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: CurrentUser,
    Json(update): Json<UserStatusUpdate>,
) -> Result<Json<UserResponse>, Error> {
    require_admin(&current_user, "update", "user status")?;
    let user = state.referrals.set_status(user_id, update.status).await?;
    Ok(Json(user.into()))
}

/// Notices about degraded features (failed emails, skipped attributions)
#[utoipa::path(
    get,
    path = "/notices",
    tag = "admin",
    responses(
        (status = 200, description = "Recent notices, oldest first", body = [AdminNotice]),
        (status = 403, description = "Administrators only"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_notices(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<AdminNotice>>, Error> {
    require_admin(&current_user, "read", "notices")?;
    Ok(Json(state.notices.list()))
}

/// Create or replace a page
#[utoipa::path(
    put,
    path = "/pages/{slug}",
    tag = "admin",
    request_body = PageUpsertRequest,
    params(("slug" = String, Path, description = "Page slug")),
    responses(
        (status = 200, description = "Saved page", body = PageResponse),
        (status = 400, description = "Invalid slug"),
        (status = 403, description = "Administrators only"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn upsert_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    current_user: CurrentUser,
    Json(request): Json<PageUpsertRequest>,
) -> Result<Json<PageResponse>, Error> {
    require_admin(&current_user, "update", "pages")?;
    if slug.is_empty() || !slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::BadRequest {
            message: format!("Invalid page slug '{slug}'"),
        });
    }

    let page = state
        .store
        .upsert_page(&PageUpsertDBRequest {
            slug,
            title: request.title,
            body: request.body,
        })
        .await?;
    tracing::debug!(slug = %page.slug, "Page saved");
    Ok(Json(page.into()))
}
