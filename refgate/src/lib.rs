//! # refgate: referral-gated account activation
//!
//! `refgate` keeps newly registered accounts in a `pending` state until enough people sign up
//! through their referral link. Every account gets a unique referral code at registration. A
//! code arriving on any request (`?ref=CODE`) is remembered in a cookie and a server-side
//! session, and a later registration is attributed to the code's owner. Once an owner's
//! confirmed referral count reaches the configured threshold the account flips to `active` and
//! a single activation email goes out.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum). Storage sits behind the
//! [`db::store::Store`] trait with an in-memory backend and, with the `postgres` feature, a
//! PostgreSQL backend.
//!
//! ### Request Flow
//!
//! Two middlewares run before path matching:
//!
//! 1. [`referral::capture::capture_referral`] stores a `?ref=` code in the referral cookie and
//!    session, and sends anonymous page views to the registration page.
//! 2. [`gate::access_gate`] redirects pending accounts away from restricted sections.
//!
//! Handlers then resolve the caller from the session cookie. The role is read from the store on
//! every request, so an activation takes effect on the very next page view.
//!
//! ### Core Components
//!
//! - [`referral`]: code issuance, the referral context, attribution on registration, reporting
//! - [`activation`]: the `pending -> active` state machine and its notification
//! - [`gate`]: what pending accounts may see
//! - [`placeholders`]: `[referral_link]`, `[referral_status]` and `[referral_count]` in page bodies
//! - [`api`]: HTTP handlers and JSON models
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use refgate::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = refgate::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     refgate::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod activation;
pub mod api;
pub mod auth;
pub mod config;
mod cookies;
pub mod db;
mod email;
pub mod errors;
pub mod gate;
pub mod notices;
pub mod notifications;
mod openapi;
pub mod placeholders;
pub mod referral;
pub mod telemetry;
mod types;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::{
    Router, ServiceExt,
    http::{self, HeaderValue},
    middleware::from_fn_with_state,
    routing::{get, patch, post, put},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tower::Layer;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;
pub use types::{ReferralId, UserId};

use crate::{
    activation::ActivationService,
    api::models::users::Role,
    auth::password,
    config::DatabaseConfig,
    db::{
        models::{pages::PageUpsertDBRequest, settings::ActivationSettings, users::UserCreateDBRequest},
        store::{InMemoryStore, Store},
    },
    email::EmailService,
    gate::access_gate,
    notices::AdminNotices,
    notifications::{DisabledNotifier, Notifier},
    openapi::ApiDoc,
    referral::{ReferralContext, ReferralService, ReferralSessions, capture::capture_referral},
};

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .store(store)
///     .referrals(referrals)
///     .activation(activation)
///     .referral_sessions(sessions)
///     .notices(notices)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub referrals: ReferralService,
    pub activation: ActivationService,
    pub referral_sessions: ReferralSessions,
    pub notices: AdminNotices,
}

/// Wire the services together over a store and notifier.
pub(crate) fn build_app_state(
    config: Arc<Config>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    notices: AdminNotices,
) -> AppState {
    let activation = ActivationService::new(
        store.clone(),
        notifier,
        notices.clone(),
        config.defaults.clone(),
        config.site_url.clone(),
    );
    let referrals = ReferralService::new(store.clone(), activation.clone(), config.clone());

    AppState::builder()
        .referral_sessions(ReferralSessions::new(config.referral.session_ttl))
        .config(config)
        .store(store)
        .referrals(referrals)
        .activation(activation)
        .notices(notices)
        .build()
}

/// Get the refgate database migrator
#[cfg(feature = "postgres")]
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Open the configured storage backend, running migrations for PostgreSQL.
#[instrument(skip_all)]
pub async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    match &config.database {
        DatabaseConfig::Memory => {
            warn!("Using the in-memory store, all data is lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        #[cfg(feature = "postgres")]
        DatabaseConfig::Postgres { url, max_connections } => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(*max_connections)
                .connect(url)
                .await?;
            migrator().run(&pool).await?;
            info!("Connected to PostgreSQL and applied migrations");
            Ok(Arc::new(db::store::PostgresStore::new(pool)))
        }
        #[cfg(not(feature = "postgres"))]
        DatabaseConfig::Postgres { .. } => {
            anyhow::bail!("database.type is postgres but refgate was built without the `postgres` feature")
        }
    }
}

/// Build the activation notifier. A transport that can't be built disables email and leaves a
/// notice for administrators instead of failing startup.
fn build_notifier(config: &Config, notices: &AdminNotices) -> Arc<dyn Notifier> {
    match EmailService::new(config) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            warn!(error = %e, "Email transport unavailable, activation emails are disabled");
            notices.push("email", format!("Activation emails are disabled: {e}"));
            Arc::new(DisabledNotifier { reason: e.to_string() })
        }
    }
}

/// Create the initial administrator if it doesn't exist, or reset its password if it does.
///
/// The email doubles as the username. New administrators get a referral code like any other
/// account.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(state: &AppState, email: &str, password: &str) -> anyhow::Result<UserId> {
    let password_hash = password::hash_string_blocking(password.to_string(), (&state.config.auth.password).into()).await?;

    if let Some(existing) = state.store.get_user_by_email(email).await? {
        state.store.set_password_hash(existing.id, &password_hash).await?;
        if existing.role != Role::Administrator {
            state.store.set_role(existing.id, Role::Administrator).await?;
        }
        return Ok(existing.id);
    }

    let admin = state
        .store
        .create_user(&UserCreateDBRequest {
            username: email.to_string(),
            email: email.to_string(),
            display_name: None,
            password_hash: Some(password_hash),
            role: Role::Administrator,
        })
        .await?;
    state.referrals.on_user_registered(&admin, &ReferralContext::default()).await?;
    info!("Created initial administrator");
    Ok(admin.id)
}

/// Seed what a fresh install needs: the administrator, the activation settings and the
/// holding page. Existing settings and pages are left untouched.
#[instrument(skip_all)]
pub async fn seed_store(state: &AppState) -> anyhow::Result<()> {
    if let Some(password) = state.config.admin_password.as_deref() {
        create_initial_admin_user(state, &state.config.admin_email, password).await?;
    }

    if state.store.load_settings().await?.is_none() {
        state
            .store
            .save_settings(&ActivationSettings::from(&state.config.defaults))
            .await?;
        debug!("Seeded activation settings from defaults");
    }

    let gate = &state.config.gate;
    let created = state
        .store
        .create_page_if_missing(&PageUpsertDBRequest {
            slug: gate.holding_page.clone(),
            title: gate.holding_page_title.clone(),
            body: gate.holding_page_body.clone(),
        })
        .await?;
    if created {
        debug!(slug = %gate.holding_page, "Created holding page");
    }

    Ok(())
}

/// Remove all referral data and the holding page, and return pending accounts to active.
/// Accounts and other pages are kept.
///
/// Only meaningful against a persistent store: the in-memory store starts empty, so there is
/// nothing to remove and this fails instead of reporting success.
#[instrument(skip_all)]
pub async fn uninstall(config: &Config) -> anyhow::Result<()> {
    if matches!(config.database, DatabaseConfig::Memory) {
        anyhow::bail!("database.type is memory, there is no persisted referral data to remove");
    }
    let store = build_store(config).await?;
    store.purge_referral_data(&config.gate.holding_page).await?;
    info!(holding_page = %config.gate.holding_page, "Referral data removed, pending accounts restored to active");
    Ok(())
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        origins.push(origin.origin().ascii_serialization().parse::<HeaderValue>()?);
    }

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]))
}

/// Build the main application router with all endpoints and middleware.
///
/// The referral capture and access gate middlewares are not part of the router; they are
/// applied around it by [`Application`] so they run before path matching.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let auth_routes = Router::new()
        .route(
            "/authentication/register",
            get(api::handlers::auth::get_registration_info).post(api::handlers::auth::register),
        )
        .route("/authentication/login", post(api::handlers::auth::login))
        .route("/authentication/logout", post(api::handlers::auth::logout))
        .with_state(state.clone());

    let registration_path = &state.config.referral.registration_path;
    let share_link_path = format!("{}/{{username}}", registration_path.trim_end_matches('/'));
    let signup_routes = Router::new()
        .route(registration_path, get(api::handlers::signup::sign_up_landing))
        .route(&share_link_path, get(api::handlers::signup::sign_up_with_username))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route(
            "/settings",
            get(api::handlers::admin::get_settings).put(api::handlers::admin::update_settings),
        )
        .route("/referrals", get(api::handlers::admin::list_referrals))
        .route("/analytics", get(api::handlers::admin::get_analytics))
        .route("/users/{user_id}/status", patch(api::handlers::admin::update_user_status))
        .route("/notices", get(api::handlers::admin::list_notices))
        .route("/pages/{slug}", put(api::handlers::admin::upsert_page))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/pages/{slug}", get(api::handlers::pages::render_page))
        .route("/api/v1/referral-status", get(api::handlers::referrals::get_referral_status))
        .route("/api/v1/users/{user_id}/referral", get(api::handlers::referrals::get_user_referral))
        .with_state(state.clone())
        .merge(auth_routes)
        .merge(signup_routes)
        .nest("/admin/api/v1", api_routes)
        .merge(Scalar::with_url("/admin/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

pub struct Application {
    router: Router,
    app_state: AppState,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting refgate with configuration: {:#?}", config);

        let store = build_store(&config).await?;
        let notices = AdminNotices::new();
        let notifier = build_notifier(&config, &notices);
        Self::new_with_store(config, store, notifier, notices).await
    }

    /// Create an application over an existing store and notifier
    pub async fn new_with_store(
        config: Config,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        notices: AdminNotices,
    ) -> anyhow::Result<Self> {
        let app_state = build_app_state(Arc::new(config), store, notifier, notices);
        seed_store(&app_state).await?;
        let router = build_router(&app_state)?;

        Ok(Self { router, app_state })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        // Apply middleware before path matching for tests
        let gated = from_fn_with_state(self.app_state.clone(), access_gate).layer(self.router);
        let service = from_fn_with_state(self.app_state, capture_referral).layer(gated);
        axum_test::TestServer::new(service.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.app_state.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "refgate listening on http://{}, public site at {}",
            bind_addr, self.app_state.config.site_url
        );

        // Apply middleware before path matching
        let gated = from_fn_with_state(self.app_state.clone(), access_gate).layer(self.router);
        let service = from_fn_with_state(self.app_state, capture_referral).layer(gated);

        axum::serve(listener, service.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
