//! Activation notifications.
//!
//! The activation state machine hands a rendered [`ActivationEmail`] to a [`Notifier`] once per
//! `pending -> active` transition. Delivery is fire-and-forget: a failed send is reported back to
//! the caller for logging and never retried.

use async_trait::async_trait;
use minijinja::{Environment, context};
use tracing::warn;
use url::Url;

use crate::db::models::settings::ActivationSettings;
use crate::db::models::users::UserDBResponse;
use crate::errors::Error;

/// A rendered activation email, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationEmail {
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_activation(&self, email: &ActivationEmail) -> Result<(), Error>;
}

/// Used when the mail transport could not be built. Every send fails, which the state machine
/// logs like any other delivery failure.
pub struct DisabledNotifier {
    pub reason: String,
}

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send_activation(&self, _email: &ActivationEmail) -> Result<(), Error> {
        Err(Error::Internal {
            operation: format!("send activation email: notifications disabled ({})", self.reason),
        })
    }
}

fn render(env: &Environment<'_>, template: &str, ctx: &minijinja::Value) -> String {
    match env.render_str(template, ctx) {
        Ok(rendered) => rendered,
        Err(e) => {
            warn!(error = %e, "Activation email template failed to render, sending it verbatim");
            template.to_string()
        }
    }
}

/// Render the configured subject and body for a newly activated user.
///
/// Templates see `username`, `display_name`, `referral_count`, `threshold` and `site_url`. A
/// template that fails to render is sent as written.
pub fn render_activation_email(
    user: &UserDBResponse,
    settings: &ActivationSettings,
    referral_count: i64,
    site_url: &Url,
) -> ActivationEmail {
    let env = Environment::new();
    let display_name = user.display_name.clone().unwrap_or_else(|| user.username.clone());
    let ctx = context! {
        username => &user.username,
        display_name => &display_name,
        referral_count => referral_count,
        threshold => settings.threshold,
        site_url => site_url.as_str(),
    };

    ActivationEmail {
        to_email: user.email.clone(),
        to_name: user.display_name.clone(),
        subject: render(&env, &settings.email_subject, &ctx),
        body: render(&env, &settings.email_body, &ctx),
    }
}
