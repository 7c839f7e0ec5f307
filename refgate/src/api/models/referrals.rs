//! API request/response models for referrals, status checks and analytics.

use crate::api::models::users::AccountStatus;
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query for the public status check. The id is parsed by the handler so a malformed value
/// reports `invalid_user` rather than a generic query error.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ReferralStatusQuery {
    /// User ID to check
    pub user_id: Option<String>,
}

/// A user's referral code, link and progress.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReferralInfo {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub username: String,
    /// Absent for accounts created before referrals were enabled
    pub referral_code: Option<String>,
    pub referral_link: Option<String>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub referred_by: Option<UserId>,
    pub status: AccountStatus,
    pub referral_count: i64,
    pub threshold: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
}

/// One row of the administrator's referral overview.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReferralSummary {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    pub referral_code: Option<String>,
    pub referral_count: i64,
    /// Usernames this user referred, oldest first
    pub referred_users: Vec<String>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct TopReferrer {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub username: String,
    pub referral_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReferralAnalytics {
    pub total_users: i64,
    /// Confirmed referrals across all users
    pub total_referrals: i64,
    pub pending_users: i64,
    pub active_users: i64,
    /// Up to ten users with at least one referral, highest count first
    pub top_referrers: Vec<TopReferrer>,
}
