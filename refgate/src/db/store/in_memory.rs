//! In-memory store implementation.
//!
//! Everything lives behind a single lock, so each operation (including uniqueness checks and
//! the role compare-and-set) is atomic. Suitable for tests and single-process deployments;
//! data is lost on restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::api::models::users::Role;
use crate::db::errors::{DbError, Result};
use crate::db::models::{
    pages::{PageDBResponse, PageUpsertDBRequest},
    referrals::{ReferralCreateDBRequest, ReferralDBResponse, ReferralStatus},
    settings::ActivationSettings,
    users::{UserCreateDBRequest, UserDBResponse},
};
use crate::types::UserId;

use super::{Store, constraints};

#[derive(Default)]
struct Tables {
    users: Vec<UserDBResponse>,
    referrals: Vec<ReferralDBResponse>,
    settings: Option<ActivationSettings>,
    pages: HashMap<String, PageDBResponse>,
}

/// In-memory implementation of the [`Store`] trait.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut tables = self.tables.write();

        if tables.users.iter().any(|u| u.username == request.username) {
            return Err(DbError::unique_violation("users", constraints::USERS_USERNAME));
        }
        if tables.users.iter().any(|u| u.email == request.email) {
            return Err(DbError::unique_violation("users", constraints::USERS_EMAIL));
        }

        let now = Utc::now();
        let user = UserDBResponse {
            id: Uuid::new_v4(),
            username: request.username.clone(),
            email: request.email.clone(),
            display_name: request.display_name.clone(),
            password_hash: request.password_hash.clone(),
            role: request.role,
            created_at: now,
            updated_at: now,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        Ok(self.tables.read().users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        Ok(self.tables.read().users.iter().find(|u| u.email == email).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserDBResponse>> {
        Ok(self.tables.read().users.iter().find(|u| u.username == username).cloned())
    }

    async fn list_users(&self) -> Result<Vec<UserDBResponse>> {
        Ok(self.tables.read().users.clone())
    }

    async fn transition_role(&self, id: UserId, from: Role, to: Role) -> Result<bool> {
        let mut tables = self.tables.write();
        match tables.users.iter_mut().find(|u| u.id == id) {
            Some(user) if user.role == from => {
                user.role = to;
                user.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_role(&self, id: UserId, role: Role) -> Result<UserDBResponse> {
        let mut tables = self.tables.write();
        let user = tables.users.iter_mut().find(|u| u.id == id).ok_or(DbError::NotFound)?;
        user.role = role;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> Result<()> {
        let mut tables = self.tables.write();
        let user = tables.users.iter_mut().find(|u| u.id == id).ok_or(DbError::NotFound)?;
        user.password_hash = Some(password_hash.to_string());
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn referral_code_exists(&self, code: &str) -> Result<bool> {
        Ok(self.tables.read().referrals.iter().any(|r| r.referral_code == code))
    }

    async fn find_user_by_referral_code(&self, code: &str) -> Result<Option<UserId>> {
        Ok(self
            .tables
            .read()
            .referrals
            .iter()
            .find(|r| r.referral_code == code)
            .map(|r| r.user_id))
    }

    async fn insert_referral(&self, request: &ReferralCreateDBRequest) -> Result<ReferralDBResponse> {
        let mut tables = self.tables.write();

        if request.referrer_id == Some(request.user_id) {
            return Err(DbError::CheckViolation {
                constraint: Some(constraints::REFERRALS_NO_SELF.to_string()),
                table: Some("user_referrals".to_string()),
                message: "a user cannot refer themselves".to_string(),
            });
        }
        if !tables.users.iter().any(|u| u.id == request.user_id) {
            return Err(DbError::ForeignKeyViolation {
                constraint: Some("user_referrals_user_id_fkey".to_string()),
                table: Some("user_referrals".to_string()),
                message: format!("user {} does not exist", request.user_id),
            });
        }
        if tables.referrals.iter().any(|r| r.user_id == request.user_id) {
            return Err(DbError::unique_violation("user_referrals", constraints::REFERRALS_USER));
        }
        if tables.referrals.iter().any(|r| r.referral_code == request.referral_code) {
            return Err(DbError::unique_violation("user_referrals", constraints::REFERRALS_CODE));
        }

        let record = ReferralDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            referral_code: request.referral_code.clone(),
            referrer_id: request.referrer_id,
            status: request.status(),
            created_at: Utc::now(),
        };
        tables.referrals.push(record.clone());
        Ok(record)
    }

    async fn get_referral(&self, user_id: UserId) -> Result<Option<ReferralDBResponse>> {
        Ok(self.tables.read().referrals.iter().find(|r| r.user_id == user_id).cloned())
    }

    async fn list_referrals(&self) -> Result<Vec<ReferralDBResponse>> {
        Ok(self.tables.read().referrals.clone())
    }

    async fn referral_count(&self, referrer_id: UserId) -> Result<i64> {
        let count = self
            .tables
            .read()
            .referrals
            .iter()
            .filter(|r| r.referrer_id == Some(referrer_id) && r.status == ReferralStatus::Confirmed)
            .count();
        Ok(count as i64)
    }

    async fn load_settings(&self) -> Result<Option<ActivationSettings>> {
        Ok(self.tables.read().settings.clone())
    }

    async fn save_settings(&self, settings: &ActivationSettings) -> Result<ActivationSettings> {
        if settings.threshold < 1 {
            return Err(DbError::CheckViolation {
                constraint: Some("activation_settings_threshold_positive".to_string()),
                table: Some("activation_settings".to_string()),
                message: "threshold must be at least 1".to_string(),
            });
        }
        self.tables.write().settings = Some(settings.clone());
        Ok(settings.clone())
    }

    async fn get_page(&self, slug: &str) -> Result<Option<PageDBResponse>> {
        Ok(self.tables.read().pages.get(slug).cloned())
    }

    async fn upsert_page(&self, request: &PageUpsertDBRequest) -> Result<PageDBResponse> {
        let page = PageDBResponse {
            slug: request.slug.clone(),
            title: request.title.clone(),
            body: request.body.clone(),
            updated_at: Utc::now(),
        };
        self.tables.write().pages.insert(page.slug.clone(), page.clone());
        Ok(page)
    }

    async fn create_page_if_missing(&self, request: &PageUpsertDBRequest) -> Result<bool> {
        let mut tables = self.tables.write();
        if tables.pages.contains_key(&request.slug) {
            return Ok(false);
        }
        tables.pages.insert(
            request.slug.clone(),
            PageDBResponse {
                slug: request.slug.clone(),
                title: request.title.clone(),
                body: request.body.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn purge_referral_data(&self, holding_page: &str) -> Result<()> {
        let mut tables = self.tables.write();
        tables.referrals.clear();
        tables.settings = None;
        tables.pages.remove(holding_page);
        let now = Utc::now();
        for user in tables.users.iter_mut().filter(|u| u.role.is_pending()) {
            user.role = Role::Active;
            user.updated_at = now;
        }
        Ok(())
    }
}
