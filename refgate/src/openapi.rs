//! OpenAPI documentation, served at `/admin/docs`.
//!
//! [`ApiDoc`] covers the public surface and nests [`AdminApiDoc`] under `/admin/api/v1`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::{activation, api, db, notices};

/// Session cookie security scheme.
struct SessionCookieAddon;

impl Modify for SessionCookieAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "SessionCookie".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "refgate_session",
                    "Session cookie set by `POST /authentication/login`",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::admin::get_settings,
        api::handlers::admin::update_settings,
        api::handlers::admin::list_referrals,
        api::handlers::admin::get_analytics,
        api::handlers::admin::update_user_status,
        api::handlers::admin::list_notices,
        api::handlers::admin::upsert_page,
    ),
    components(
        schemas(
            db::models::settings::ActivationSettings,
            api::models::referrals::ReferralSummary,
            api::models::referrals::ReferralAnalytics,
            api::models::referrals::TopReferrer,
            api::models::users::UserStatusUpdate,
            api::models::users::UserResponse,
            api::models::pages::PageUpsertRequest,
            api::models::pages::PageResponse,
            notices::AdminNotice,
        )
    ),
    tags(
        (name = "admin", description = "Administrator-only settings and reporting"),
    )
)]
pub struct AdminApiDoc;

#[derive(OpenApi)]
#[openapi(
    modifiers(&SessionCookieAddon),
    paths(
        api::handlers::auth::get_registration_info,
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::signup::sign_up_landing,
        api::handlers::signup::sign_up_with_username,
        api::handlers::pages::render_page,
        api::handlers::referrals::get_referral_status,
        api::handlers::referrals::get_user_referral,
    ),
    nest(
        (path = "/admin/api/v1", api = AdminApiDoc)
    ),
    components(
        schemas(
            api::models::auth::RegistrationInfo,
            api::models::auth::RegisterRequest,
            api::models::auth::LoginRequest,
            api::models::auth::AuthResponse,
            api::models::auth::AuthSuccessResponse,
            api::models::users::Role,
            api::models::users::AccountStatus,
            api::models::users::UserResponse,
            api::models::referrals::ReferralInfo,
            api::handlers::signup::SignUpLanding,
            activation::ActivationStatus,
        )
    ),
    tags(
        (name = "authentication", description = "Registration, login and logout"),
        (name = "referrals", description = "Referral codes, links and activation progress"),
        (name = "pages", description = "Content pages"),
    ),
    info(
        title = "refgate",
        description = "Referral-gated account activation. New accounts stay pending until enough referred signups arrive.",
    )
)]
pub struct ApiDoc;
