//! Database model for the activation settings singleton.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::DefaultSettings;

/// Global activation policy, read by the activation state machine on every evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct ActivationSettings {
    /// Confirmed referrals required before a pending account is activated
    pub threshold: i64,
    /// Activate automatically once the threshold is reached
    pub auto_activation: bool,
    /// Subject template for the activation email
    pub email_subject: String,
    /// Body template for the activation email
    pub email_body: String,
}

impl From<&DefaultSettings> for ActivationSettings {
    fn from(defaults: &DefaultSettings) -> Self {
        Self {
            threshold: defaults.threshold,
            auto_activation: defaults.auto_activation,
            email_subject: defaults.email_subject.clone(),
            email_body: defaults.email_body.clone(),
        }
    }
}
