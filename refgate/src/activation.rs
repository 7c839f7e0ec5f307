//! Activation state machine.
//!
//! Accounts start `pending` and move to `active` once their confirmed referral count reaches the
//! configured threshold while auto-activation is on. The move is one-directional and is written as
//! a compare-and-set on the role, so exactly one caller observes the flip and that caller sends the
//! single activation notification.

use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;
use utoipa::ToSchema;

use crate::api::models::users::{AccountStatus, Role};
use crate::config::DefaultSettings;
use crate::db::models::settings::ActivationSettings;
use crate::errors::{Error, Result};
use crate::db::store::Store;
use crate::notices::AdminNotices;
use crate::notifications::{Notifier, render_activation_email};
use crate::types::{UserId, abbrev_uuid};

/// What caused an activation, recorded on the `refgate_activations_total` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationTrigger {
    /// Referral count reached the threshold
    Threshold,
    /// An administrator activated the account
    Manual,
}

impl ActivationTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            ActivationTrigger::Threshold => "threshold",
            ActivationTrigger::Manual => "manual",
        }
    }
}

/// Referral progress for one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ActivationStatus {
    pub status: AccountStatus,
    pub referral_count: i64,
    pub threshold: i64,
    /// Referrals still needed; only present while pending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
}

/// The transition guard. Only pending accounts move, and only when auto-activation is on.
pub fn should_activate(role: Role, referral_count: i64, settings: &ActivationSettings) -> bool {
    role.is_pending() && settings.auto_activation && referral_count >= settings.threshold
}

#[derive(Clone)]
pub struct ActivationService {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    notices: AdminNotices,
    defaults: DefaultSettings,
    site_url: Url,
}

impl ActivationService {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        notices: AdminNotices,
        defaults: DefaultSettings,
        site_url: Url,
    ) -> Self {
        Self {
            store,
            notifier,
            notices,
            defaults,
            site_url,
        }
    }

    /// Current settings, or the configured defaults if none have been saved.
    pub async fn settings(&self) -> Result<ActivationSettings> {
        Ok(self
            .store
            .load_settings()
            .await?
            .unwrap_or_else(|| ActivationSettings::from(&self.defaults)))
    }

    /// Replace the settings. Already active accounts are unaffected.
    #[instrument(skip(self, settings), fields(threshold = settings.threshold, auto_activation = settings.auto_activation), err)]
    pub async fn update_settings(&self, settings: &ActivationSettings) -> Result<ActivationSettings> {
        if settings.threshold < 1 {
            return Err(Error::BadRequest {
                message: "threshold must be at least 1".to_string(),
            });
        }
        Ok(self.store.save_settings(settings).await?)
    }

    /// Re-check an account against the current settings after its referral count changed.
    ///
    /// Returns true if this call activated the account.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn evaluate(&self, user_id: UserId) -> Result<bool> {
        let Some(user) = self.store.get_user(user_id).await? else {
            debug!("Skipping evaluation for missing user");
            return Ok(false);
        };
        if !user.role.is_pending() {
            return Ok(false);
        }

        let settings = self.settings().await?;
        let count = self.store.referral_count(user_id).await?;
        if !should_activate(user.role, count, &settings) {
            debug!(count, threshold = settings.threshold, "Threshold not met");
            return Ok(false);
        }

        self.activate(user_id, ActivationTrigger::Threshold).await
    }

    /// Move a pending account to active and notify its owner.
    ///
    /// Returns false without notifying if the account was not pending, including when a
    /// concurrent caller activated it first.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id), trigger = trigger.as_str()), err)]
    pub async fn activate(&self, user_id: UserId, trigger: ActivationTrigger) -> Result<bool> {
        if !self.store.transition_role(user_id, Role::Pending, Role::Active).await? {
            debug!("Account was not pending, nothing to do");
            return Ok(false);
        }

        counter!("refgate_activations_total", "trigger" => trigger.as_str()).increment(1);
        info!("Account activated");

        self.notify(user_id).await;
        Ok(true)
    }

    /// Send the activation email. Failures are logged and surfaced to administrators only.
    async fn notify(&self, user_id: UserId) {
        let outcome = match self.send_notification(user_id).await {
            Ok(()) => "sent",
            Err(e) => {
                warn!(user_id = %abbrev_uuid(&user_id), error = %e, "Failed to send activation email");
                self.notices.push(
                    "email",
                    format!("Activation email for user {} was not sent: {e}", abbrev_uuid(&user_id)),
                );
                "failed"
            }
        };
        counter!("refgate_notifications_total", "outcome" => outcome).increment(1);
    }

    async fn send_notification(&self, user_id: UserId) -> Result<()> {
        let user = self.store.get_user(user_id).await?.ok_or_else(|| Error::NotFound {
            resource: "User".to_string(),
            id: user_id.to_string(),
        })?;
        let settings = self.settings().await?;
        let count = self.store.referral_count(user_id).await?;

        let email = render_activation_email(&user, &settings, count, &self.site_url);
        self.notifier.send_activation(&email).await
    }

    /// Referral progress for an account.
    ///
    /// # Errors
    /// - `InvalidUser` if no such account exists
    pub async fn status(&self, user_id: UserId) -> Result<ActivationStatus> {
        let user = self.store.get_user(user_id).await?.ok_or_else(|| Error::InvalidUser {
            id: user_id.to_string(),
        })?;
        let settings = self.settings().await?;
        let referral_count = self.store.referral_count(user_id).await?;
        let status = AccountStatus::from(user.role);

        Ok(ActivationStatus {
            status,
            referral_count,
            threshold: settings.threshold,
            remaining: (status == AccountStatus::Pending).then(|| (settings.threshold - referral_count).max(0)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::referrals::ReferralCreateDBRequest;
    use crate::test_utils::{create_test_state, create_test_user};
    use uuid::Uuid;

    fn settings(threshold: i64, auto_activation: bool) -> ActivationSettings {
        ActivationSettings {
            threshold,
            auto_activation,
            email_subject: "s".to_string(),
            email_body: "b".to_string(),
        }
    }

    #[test]
    fn test_should_activate() {
        assert!(should_activate(Role::Pending, 5, &settings(5, true)));
        assert!(should_activate(Role::Pending, 6, &settings(5, true)));
        assert!(!should_activate(Role::Pending, 4, &settings(5, true)));
        assert!(!should_activate(Role::Pending, 10, &settings(5, false)));
        assert!(!should_activate(Role::Active, 10, &settings(5, true)));
        assert!(!should_activate(Role::Administrator, 10, &settings(5, true)));
    }

    async fn refer(state: &crate::AppState, referrer: UserId, n: usize) {
        for i in 0..n {
            let user = create_test_user(state, &format!("invitee-{}-{i}", abbrev_uuid(&referrer)), Role::Pending).await;
            state
                .store
                .insert_referral(&ReferralCreateDBRequest {
                    user_id: user.id,
                    referral_code: format!("code-{}", Uuid::new_v4()),
                    referrer_id: Some(referrer),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_evaluate_activates_at_threshold_and_notifies_once() {
        let (state, notifier) = create_test_state();
        state.activation.update_settings(&settings(2, true)).await.unwrap();
        let referrer = create_test_user(&state, "rita", Role::Pending).await;

        refer(&state, referrer.id, 1).await;
        assert!(!state.activation.evaluate(referrer.id).await.unwrap());

        refer(&state, referrer.id, 1).await;
        assert!(state.activation.evaluate(referrer.id).await.unwrap());
        // Further evaluations are no-ops
        assert!(!state.activation.evaluate(referrer.id).await.unwrap());

        let user = state.store.get_user(referrer.id).await.unwrap().unwrap();
        assert_eq!(user.role, Role::Active);
        assert_eq!(notifier.sent_to(&referrer.email), 1);
    }

    #[tokio::test]
    async fn test_auto_activation_off_keeps_pending() {
        let (state, notifier) = create_test_state();
        state.activation.update_settings(&settings(1, false)).await.unwrap();
        let referrer = create_test_user(&state, "rita", Role::Pending).await;

        refer(&state, referrer.id, 3).await;
        assert!(!state.activation.evaluate(referrer.id).await.unwrap());
        assert_eq!(notifier.total(), 0);
    }

    #[tokio::test]
    async fn test_raising_threshold_never_reverts_activation() {
        let (state, _) = create_test_state();
        state.activation.update_settings(&settings(1, true)).await.unwrap();
        let referrer = create_test_user(&state, "rita", Role::Pending).await;
        refer(&state, referrer.id, 1).await;
        assert!(state.activation.evaluate(referrer.id).await.unwrap());

        state.activation.update_settings(&settings(50, true)).await.unwrap();
        assert!(!state.activation.evaluate(referrer.id).await.unwrap());

        let status = state.activation.status(referrer.id).await.unwrap();
        assert_eq!(status.status, AccountStatus::Active);
        assert_eq!(status.remaining, None);
    }

    #[tokio::test]
    async fn test_manual_activation_notifies_once() {
        let (state, notifier) = create_test_state();
        let user = create_test_user(&state, "pat", Role::Pending).await;

        assert!(state.activation.activate(user.id, ActivationTrigger::Manual).await.unwrap());
        assert!(!state.activation.activate(user.id, ActivationTrigger::Manual).await.unwrap());
        assert_eq!(notifier.sent_to(&user.email), 1);
    }

    #[tokio::test]
    async fn test_failed_send_is_logged_as_notice() {
        let (state, notifier) = create_test_state();
        notifier.fail_sends(true);
        let user = create_test_user(&state, "pat", Role::Pending).await;

        assert!(state.activation.activate(user.id, ActivationTrigger::Manual).await.unwrap());

        let user = state.store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(user.role, Role::Active);
        let notices = state.notices.list();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].source, "email");
    }

    #[tokio::test]
    async fn test_status() {
        let (state, _) = create_test_state();
        state.activation.update_settings(&settings(5, true)).await.unwrap();
        let referrer = create_test_user(&state, "rita", Role::Pending).await;
        refer(&state, referrer.id, 2).await;

        let status = state.activation.status(referrer.id).await.unwrap();
        assert_eq!(
            status,
            ActivationStatus {
                status: AccountStatus::Pending,
                referral_count: 2,
                threshold: 5,
                remaining: Some(3),
            }
        );
    }

    #[tokio::test]
    async fn test_status_unknown_user_is_invalid() {
        let (state, _) = create_test_state();
        let err = state.activation.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidUser { .. }));
    }

    #[tokio::test]
    async fn test_threshold_below_one_rejected() {
        let (state, _) = create_test_state();
        let err = state.activation.update_settings(&settings(0, true)).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[tokio::test]
    async fn test_settings_fall_back_to_defaults() {
        let (state, _) = create_test_state();
        let loaded = state.activation.settings().await.unwrap();
        assert_eq!(loaded, ActivationSettings::from(&state.config.defaults));
    }
}
