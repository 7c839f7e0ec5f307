//! Database model for content pages.

use chrono::{DateTime, Utc};

/// Database request for creating or replacing a page
#[derive(Debug, Clone)]
pub struct PageUpsertDBRequest {
    pub slug: String,
    pub title: String,
    pub body: String,
}

/// Database response for a page
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PageDBResponse {
    pub slug: String,
    pub title: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}
