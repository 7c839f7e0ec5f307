//! Storage backends for accounts, the referral ledger, activation settings and pages.
//!
//! The referral ledger is the single source of truth for attribution: every registered user
//! owns exactly one record holding their code and (optionally) their referrer. A referrer's
//! count is always derived by counting confirmed records that point at them, so there is no
//! separate counter that could drift from the ledger.

use async_trait::async_trait;

use crate::api::models::users::Role;
use crate::db::errors::Result;
use crate::db::models::{
    pages::{PageDBResponse, PageUpsertDBRequest},
    referrals::{ReferralCreateDBRequest, ReferralDBResponse},
    settings::ActivationSettings,
    users::{UserCreateDBRequest, UserDBResponse},
};
use crate::types::UserId;

pub mod in_memory;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(test)]
mod tests;

pub use in_memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Constraint names shared by both backends.
pub mod constraints {
    pub const USERS_USERNAME: &str = "users_username_key";
    pub const USERS_EMAIL: &str = "users_email_key";
    pub const REFERRALS_USER: &str = "user_referrals_user_id_key";
    pub const REFERRALS_CODE: &str = "user_referrals_referral_code_key";
    pub const REFERRALS_NO_SELF: &str = "user_referrals_no_self_referral";
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Create a user.
    ///
    /// # Errors
    /// - `UniqueViolation` on `users_username_key` or `users_email_key`
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse>;

    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserDBResponse>>;

    /// All users, oldest first.
    async fn list_users(&self) -> Result<Vec<UserDBResponse>>;

    /// Move a user from `from` to `to` only if they currently hold `from`.
    ///
    /// Returns true if this call changed the role. A concurrent caller racing on the same
    /// transition sees false.
    async fn transition_role(&self, id: UserId, from: Role, to: Role) -> Result<bool>;

    /// Unconditionally set a user's role.
    ///
    /// # Errors
    /// - `NotFound` if the user doesn't exist
    async fn set_role(&self, id: UserId, role: Role) -> Result<UserDBResponse>;

    /// Update the password hash for an existing user.
    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> Result<()>;

    /// Whether any ledger record already holds this code.
    async fn referral_code_exists(&self, code: &str) -> Result<bool>;

    /// Owner of a referral code. Exact match only.
    async fn find_user_by_referral_code(&self, code: &str) -> Result<Option<UserId>>;

    /// Record a user's code and referrer. Records are confirmed if a referrer is set.
    ///
    /// # Errors
    /// - `UniqueViolation` on `user_referrals_referral_code_key` if the code is taken
    /// - `UniqueViolation` on `user_referrals_user_id_key` if the user already has a record
    /// - `CheckViolation` on `user_referrals_no_self_referral` if the user refers themself
    async fn insert_referral(&self, request: &ReferralCreateDBRequest) -> Result<ReferralDBResponse>;

    /// The ledger record owned by a user.
    async fn get_referral(&self, user_id: UserId) -> Result<Option<ReferralDBResponse>>;

    /// All ledger records, oldest first.
    async fn list_referrals(&self) -> Result<Vec<ReferralDBResponse>>;

    /// Number of confirmed records naming this user as referrer.
    async fn referral_count(&self, referrer_id: UserId) -> Result<i64>;

    async fn load_settings(&self) -> Result<Option<ActivationSettings>>;

    async fn save_settings(&self, settings: &ActivationSettings) -> Result<ActivationSettings>;

    async fn get_page(&self, slug: &str) -> Result<Option<PageDBResponse>>;

    /// Create or replace a page.
    async fn upsert_page(&self, request: &PageUpsertDBRequest) -> Result<PageDBResponse>;

    /// Create a page only if the slug is free. Returns true if created.
    async fn create_page_if_missing(&self, request: &PageUpsertDBRequest) -> Result<bool>;

    /// Remove every ledger record, the settings row and the holding page, and return pending
    /// accounts to `active`. Accounts and other pages are kept.
    async fn purge_referral_data(&self, holding_page: &str) -> Result<()>;
}
