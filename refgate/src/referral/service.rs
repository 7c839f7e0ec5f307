use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::activation::ActivationService;
use crate::api::models::referrals::{ReferralAnalytics, ReferralInfo, ReferralSummary, TopReferrer};
use crate::api::models::users::{AccountStatus, Role};
use crate::config::Config;
use crate::db::errors::DbError;
use crate::db::models::referrals::{ReferralCreateDBRequest, ReferralDBResponse, ReferralStatus};
use crate::db::models::users::UserDBResponse;
use crate::db::store::{Store, constraints};
use crate::errors::{Error, Result};
use crate::placeholders::referral_link;
use crate::referral::codes::{CodeGenerator, fallback_code};
use crate::referral::context::{ReferralContext, ReferralSource};
use crate::types::{UserId, abbrev_uuid};

const TOP_REFERRERS: usize = 10;

/// Result of the registration hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationOutcome {
    pub referral_code: String,
    pub referred_by: Option<UserId>,
    /// The referrer crossed the threshold because of this registration
    pub referrer_activated: bool,
}

#[derive(Clone)]
pub struct ReferralService {
    store: Arc<dyn Store>,
    activation: ActivationService,
    codes: CodeGenerator,
    config: Arc<Config>,
}

impl ReferralService {
    pub fn new(store: Arc<dyn Store>, activation: ActivationService, config: Arc<Config>) -> Self {
        Self {
            store,
            activation,
            codes: CodeGenerator::from_config(&config.referral),
            config,
        }
    }

    /// Owner of the context's candidate code. Unknown codes resolve to `None`.
    #[instrument(skip_all, err)]
    pub async fn resolve(&self, context: &ReferralContext) -> Result<Option<(UserId, ReferralSource)>> {
        let Some((code, source)) = context.candidate() else {
            return Ok(None);
        };

        match self.store.find_user_by_referral_code(&code).await? {
            Some(referrer) => Ok(Some((referrer, source))),
            None => {
                debug!(source = source.as_str(), "Ignoring unknown referral code");
                counter!("refgate_attributions_total", "outcome" => "unknown_code").increment(1);
                Ok(None)
            }
        }
    }

    /// Registration hook, called once the account exists.
    ///
    /// Issues the user's code, links them to whoever referred them and re-evaluates that
    /// referrer. A user can only ever hold one ledger record, so calling this again for the same
    /// user returns the existing record without counting twice.
    #[instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id)), err)]
    pub async fn on_user_registered(&self, user: &UserDBResponse, context: &ReferralContext) -> Result<RegistrationOutcome> {
        if let Some(existing) = self.store.get_referral(user.id).await? {
            warn!("User already has a referral record, skipping attribution");
            return Ok(RegistrationOutcome {
                referral_code: existing.referral_code,
                referred_by: existing.referrer_id,
                referrer_activated: false,
            });
        }

        // A failed lookup costs the attribution, never the user's own code
        let referrer = match self.resolve(context).await {
            Ok(resolved) => resolved.map(|(referrer, _)| referrer).filter(|referrer| *referrer != user.id),
            Err(e) => {
                warn!(error = %e, "Referrer lookup failed, registering without attribution");
                counter!("refgate_attributions_total", "outcome" => "lookup_failed").increment(1);
                None
            }
        };

        let code = self.codes.issue(self.store.as_ref(), user.id, &user.username).await?;
        let record = self.insert_record(user.id, code, referrer).await?;

        let Some(referrer_id) = record.referrer_id else {
            counter!("refgate_attributions_total", "outcome" => "none").increment(1);
            return Ok(RegistrationOutcome {
                referral_code: record.referral_code,
                referred_by: None,
                referrer_activated: false,
            });
        };

        counter!("refgate_attributions_total", "outcome" => "attributed").increment(1);
        info!(referrer_id = %abbrev_uuid(&referrer_id), "Registration attributed to referrer");

        let referrer_activated = self.activation.evaluate(referrer_id).await?;
        Ok(RegistrationOutcome {
            referral_code: record.referral_code,
            referred_by: Some(referrer_id),
            referrer_activated,
        })
    }

    /// Insert the ledger record, switching to the id-derived code if a concurrent registration
    /// claimed the issued one.
    async fn insert_record(&self, user_id: UserId, code: String, referrer: Option<UserId>) -> Result<ReferralDBResponse> {
        let request = ReferralCreateDBRequest {
            user_id,
            referral_code: code,
            referrer_id: referrer,
        };

        match self.store.insert_referral(&request).await {
            Ok(record) => Ok(record),
            Err(e) if e.is_unique_violation_on(constraints::REFERRALS_CODE) => {
                warn!("Issued referral code was taken concurrently, using fallback");
                let request = ReferralCreateDBRequest {
                    referral_code: fallback_code(user_id),
                    ..request
                };
                Ok(self.store.insert_referral(&request).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Code, link and progress for one user.
    ///
    /// # Errors
    /// - `InvalidUser` if no such account exists
    pub async fn info(&self, user_id: UserId) -> Result<ReferralInfo> {
        let user = self.store.get_user(user_id).await?.ok_or_else(|| Error::InvalidUser {
            id: user_id.to_string(),
        })?;
        let record = self.store.get_referral(user_id).await?;
        let progress = self.activation.status(user_id).await?;

        let referral_code = record.as_ref().map(|r| r.referral_code.clone());
        Ok(ReferralInfo {
            user_id,
            referral_link: referral_code
                .as_deref()
                .map(|code| referral_link(&self.config, code, &user.username)),
            username: user.username,
            referral_code,
            referred_by: record.and_then(|r| r.referrer_id),
            status: progress.status,
            referral_count: progress.referral_count,
            threshold: progress.threshold,
            remaining: progress.remaining,
        })
    }

    /// Code owned by the user with this username, if both exist.
    pub async fn code_for_username(&self, username: &str) -> Result<Option<String>> {
        let Some(user) = self.store.get_user_by_username(username).await? else {
            return Ok(None);
        };
        Ok(self.store.get_referral(user.id).await?.map(|r| r.referral_code))
    }

    /// Per-user overview for administrators, oldest account first.
    pub async fn summaries(&self) -> Result<Vec<ReferralSummary>> {
        let users = self.store.list_users().await?;
        let referrals = self.store.list_referrals().await?;

        let usernames: HashMap<UserId, &str> = users.iter().map(|u| (u.id, u.username.as_str())).collect();
        let mut codes: HashMap<UserId, &str> = HashMap::new();
        let mut referred: HashMap<UserId, Vec<String>> = HashMap::new();
        for record in &referrals {
            codes.insert(record.user_id, record.referral_code.as_str());
            if let (Some(referrer), ReferralStatus::Confirmed) = (record.referrer_id, record.status)
                && let Some(name) = usernames.get(&record.user_id)
            {
                referred.entry(referrer).or_default().push(name.to_string());
            }
        }

        Ok(users
            .iter()
            .map(|user| {
                let referred_users = referred.remove(&user.id).unwrap_or_default();
                ReferralSummary {
                    user_id: user.id,
                    username: user.username.clone(),
                    email: user.email.clone(),
                    referral_code: codes.get(&user.id).map(|c| c.to_string()),
                    referral_count: referred_users.len() as i64,
                    referred_users,
                    status: AccountStatus::from(user.role),
                    created_at: user.created_at,
                }
            })
            .collect())
    }

    pub async fn analytics(&self) -> Result<ReferralAnalytics> {
        let summaries = self.summaries().await?;

        let pending_users = summaries.iter().filter(|s| s.status == AccountStatus::Pending).count() as i64;
        let total_users = summaries.len() as i64;
        let total_referrals = summaries.iter().map(|s| s.referral_count).sum();

        let mut top: Vec<TopReferrer> = summaries
            .into_iter()
            .filter(|s| s.referral_count > 0)
            .map(|s| TopReferrer {
                user_id: s.user_id,
                username: s.username,
                referral_count: s.referral_count,
            })
            .collect();
        top.sort_by(|a, b| b.referral_count.cmp(&a.referral_count).then_with(|| a.username.cmp(&b.username)));
        top.truncate(TOP_REFERRERS);

        Ok(ReferralAnalytics {
            total_users,
            total_referrals,
            pending_users,
            active_users: total_users - pending_users,
            top_referrers: top,
        })
    }

    /// Administrator override of an account's status. Activation goes through the state
    /// machine so the owner is notified once; returning an account to pending is silent.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn set_status(&self, user_id: UserId, status: AccountStatus) -> Result<UserDBResponse> {
        let user = self.store.get_user(user_id).await?.ok_or_else(|| Error::NotFound {
            resource: "User".to_string(),
            id: user_id.to_string(),
        })?;
        if user.role == Role::Administrator {
            return Err(Error::BadRequest {
                message: "Administrator accounts have no activation status".to_string(),
            });
        }

        match status {
            AccountStatus::Active => {
                self.activation
                    .activate(user_id, crate::activation::ActivationTrigger::Manual)
                    .await?;
            }
            AccountStatus::Pending => {
                self.store.set_role(user_id, Role::Pending).await?;
                info!("Account returned to pending by administrator");
            }
        }

        self.store
            .get_user(user_id)
            .await?
            .ok_or(Error::Database(DbError::NotFound))
    }
}
