//! PostgreSQL store implementation.
//!
//! Uniqueness, the no-self-referral rule and the role compare-and-set are enforced by the
//! database (see `migrations/`), so concurrent writers across processes stay consistent.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::api::models::users::Role;
use crate::db::errors::{DbError, Result};
use crate::db::models::{
    pages::{PageDBResponse, PageUpsertDBRequest},
    referrals::{ReferralCreateDBRequest, ReferralDBResponse},
    settings::ActivationSettings,
    users::{UserCreateDBRequest, UserDBResponse},
};
use crate::types::{UserId, abbrev_uuid};

use super::Store;

const USER_COLUMNS: &str = "id, username, email, display_name, password_hash, role, created_at, updated_at";
const REFERRAL_COLUMNS: &str = "id, user_id, referral_code, referrer_id, status, created_at";

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            "INSERT INTO users (id, username, email, display_name, password_hash, role)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&request.username)
        .bind(&request.email)
        .bind(&request.display_name)
        .bind(&request.password_hash)
        .bind(request.role)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    #[instrument(skip(self, email), err)]
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self) -> Result<Vec<UserDBResponse>> {
        let users = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn transition_role(&self, id: UserId, from: Role, to: Role) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET role = $3, updated_at = NOW() WHERE id = $1 AND role = $2")
            .bind(id)
            .bind(from)
            .bind(to)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn set_role(&self, id: UserId, role: Role) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(user)
    }

    #[instrument(skip(self, password_hash), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn referral_code_exists(&self, code: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM user_referrals WHERE referral_code = $1)")
            .bind(code)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    #[instrument(skip(self), err)]
    async fn find_user_by_referral_code(&self, code: &str) -> Result<Option<UserId>> {
        let user_id: Option<UserId> = sqlx::query_scalar("SELECT user_id FROM user_referrals WHERE referral_code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user_id)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    async fn insert_referral(&self, request: &ReferralCreateDBRequest) -> Result<ReferralDBResponse> {
        let record = sqlx::query_as::<_, ReferralDBResponse>(&format!(
            "INSERT INTO user_referrals (id, user_id, referral_code, referrer_id, status)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {REFERRAL_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.referral_code)
        .bind(request.referrer_id)
        .bind(request.status())
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn get_referral(&self, user_id: UserId) -> Result<Option<ReferralDBResponse>> {
        let record = sqlx::query_as::<_, ReferralDBResponse>(&format!("SELECT {REFERRAL_COLUMNS} FROM user_referrals WHERE user_id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn list_referrals(&self) -> Result<Vec<ReferralDBResponse>> {
        let records = sqlx::query_as::<_, ReferralDBResponse>(&format!(
            "SELECT {REFERRAL_COLUMNS} FROM user_referrals ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    #[instrument(skip(self), fields(referrer_id = %abbrev_uuid(&referrer_id)), err)]
    async fn referral_count(&self, referrer_id: UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_referrals WHERE referrer_id = $1 AND status = 'confirmed'")
            .bind(referrer_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    #[instrument(skip(self), err)]
    async fn load_settings(&self) -> Result<Option<ActivationSettings>> {
        let settings = sqlx::query_as::<_, ActivationSettings>(
            "SELECT threshold, auto_activation, email_subject, email_body FROM activation_settings WHERE id",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(settings)
    }

    #[instrument(skip(self, settings), fields(threshold = settings.threshold), err)]
    async fn save_settings(&self, settings: &ActivationSettings) -> Result<ActivationSettings> {
        let saved = sqlx::query_as::<_, ActivationSettings>(
            "INSERT INTO activation_settings (id, threshold, auto_activation, email_subject, email_body)
             VALUES (TRUE, $1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET
                threshold = EXCLUDED.threshold,
                auto_activation = EXCLUDED.auto_activation,
                email_subject = EXCLUDED.email_subject,
                email_body = EXCLUDED.email_body,
                updated_at = NOW()
             RETURNING threshold, auto_activation, email_subject, email_body",
        )
        .bind(settings.threshold)
        .bind(settings.auto_activation)
        .bind(&settings.email_subject)
        .bind(&settings.email_body)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }

    #[instrument(skip(self), err)]
    async fn get_page(&self, slug: &str) -> Result<Option<PageDBResponse>> {
        let page = sqlx::query_as::<_, PageDBResponse>("SELECT slug, title, body, updated_at FROM pages WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(page)
    }

    #[instrument(skip(self, request), fields(slug = %request.slug), err)]
    async fn upsert_page(&self, request: &PageUpsertDBRequest) -> Result<PageDBResponse> {
        let page = sqlx::query_as::<_, PageDBResponse>(
            "INSERT INTO pages (slug, title, body) VALUES ($1, $2, $3)
             ON CONFLICT (slug) DO UPDATE SET title = EXCLUDED.title, body = EXCLUDED.body, updated_at = NOW()
             RETURNING slug, title, body, updated_at",
        )
        .bind(&request.slug)
        .bind(&request.title)
        .bind(&request.body)
        .fetch_one(&self.pool)
        .await?;
        Ok(page)
    }

    #[instrument(skip(self, request), fields(slug = %request.slug), err)]
    async fn create_page_if_missing(&self, request: &PageUpsertDBRequest) -> Result<bool> {
        let result = sqlx::query("INSERT INTO pages (slug, title, body) VALUES ($1, $2, $3) ON CONFLICT (slug) DO NOTHING")
            .bind(&request.slug)
            .bind(&request.title)
            .bind(&request.body)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn purge_referral_data(&self, holding_page: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM user_referrals").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM activation_settings").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM pages WHERE slug = $1")
            .bind(holding_page)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET role = 'active', updated_at = NOW() WHERE role = 'pending'")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
