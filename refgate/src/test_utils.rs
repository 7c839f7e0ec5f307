//! Test utilities: configuration, a recording notifier, and app/state constructors.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use axum_test::TestServer;
use parking_lot::Mutex;

use crate::{
    AppState, Application,
    api::models::users::{CurrentUser, Role},
    auth::session,
    config::{Config, EmailTransportConfig},
    db::{
        models::users::{UserCreateDBRequest, UserDBResponse},
        store::InMemoryStore,
    },
    errors::Error,
    notices::AdminNotices,
    notifications::{ActivationEmail, Notifier},
};

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("refgate-test-emails-{}", std::process::id()));

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        admin_email: "admin@test.com".to_string(),
        admin_password: None,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        ..Default::default()
    };
    config.auth.session.cookie_secure = false;
    config.referral.cookie_secure = false;
    // Cheap hashes keep the suite fast
    config.auth.password.argon2_memory_kib = 128;
    config.auth.password.argon2_iterations = 1;
    config.email.transport = EmailTransportConfig::File {
        path: temp_dir.to_string_lossy().to_string(),
    };
    config
}

/// Captures activation emails instead of delivering them.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<ActivationEmail>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Make every following send fail.
    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<ActivationEmail> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, email: &str) -> usize {
        self.sent.lock().iter().filter(|m| m.to_email == email).count()
    }

    pub fn total(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_activation(&self, email: &ActivationEmail) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Internal {
                operation: format!("send activation email to {}", email.to_email),
            });
        }
        self.sent.lock().push(email.clone());
        Ok(())
    }
}

/// State over an empty in-memory store. Nothing is seeded.
pub fn create_test_state() -> (AppState, RecordingNotifier) {
    let notifier = RecordingNotifier::default();
    let state = crate::build_app_state(
        Arc::new(create_test_config()),
        Arc::new(InMemoryStore::new()),
        Arc::new(notifier.clone()),
        AdminNotices::new(),
    );
    (state, notifier)
}

pub async fn create_test_app() -> (TestServer, AppState, RecordingNotifier) {
    create_test_app_with_config(create_test_config()).await
}

pub async fn create_test_app_with_config(config: Config) -> (TestServer, AppState, RecordingNotifier) {
    let notifier = RecordingNotifier::default();
    let app = Application::new_with_store(
        config,
        Arc::new(InMemoryStore::new()),
        Arc::new(notifier.clone()),
        AdminNotices::new(),
    )
    .await
    .expect("Failed to create application");

    let state = app.app_state.clone();
    (app.into_test_server(), state, notifier)
}

/// Create a user directly in the store, with `{username}@example.com` as the email and no
/// password.
pub async fn create_test_user(state: &AppState, username: &str, role: Role) -> UserDBResponse {
    state
        .store
        .create_user(&UserCreateDBRequest {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            display_name: None,
            password_hash: None,
            role,
        })
        .await
        .expect("Failed to create test user")
}

/// `Cookie` header value carrying a session for `user`.
pub fn session_cookie(state: &AppState, user: &UserDBResponse) -> String {
    let token = session::create_session_token(&CurrentUser::from(user.clone()), &state.config).expect("Failed to create session token");
    format!("{}={}", state.config.auth.session.cookie_name, token)
}
