//! Database models for the referral ledger.

use crate::types::{ReferralId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// `confirmed` records were attributed to a referrer and count towards their activation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "referral_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Confirmed,
}

/// Database request for recording a user's referral code and (optional) referrer
#[derive(Debug, Clone)]
pub struct ReferralCreateDBRequest {
    pub user_id: UserId,
    pub referral_code: String,
    pub referrer_id: Option<UserId>,
}

impl ReferralCreateDBRequest {
    pub fn status(&self) -> ReferralStatus {
        if self.referrer_id.is_some() {
            ReferralStatus::Confirmed
        } else {
            ReferralStatus::Pending
        }
    }
}

/// Database response for a ledger record
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReferralDBResponse {
    pub id: ReferralId,
    pub user_id: UserId,
    pub referral_code: String,
    pub referrer_id: Option<UserId>,
    pub status: ReferralStatus,
    pub created_at: DateTime<Utc>,
}
