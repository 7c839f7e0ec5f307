//! API request/response models for content pages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::pages::PageDBResponse;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PageUpsertRequest {
    pub title: String,
    /// HTML body; may contain referral placeholders
    pub body: String,
}

/// A stored page with its placeholders unexpanded.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PageResponse {
    pub slug: String,
    pub title: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

impl From<PageDBResponse> for PageResponse {
    fn from(db: PageDBResponse) -> Self {
        Self {
            slug: db.slug,
            title: db.title,
            body: db.body,
            updated_at: db.updated_at,
        }
    }
}
