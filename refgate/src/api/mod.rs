//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Authentication** (`/authentication/*`): Registration, login, logout
//! - **Registration landing** (`/sign-up/`, `/sign-up/{username}`): Referral-aware sign-up entry points
//! - **Pages** (`/pages/{slug}`): Content pages with referral placeholders
//! - **Referrals** (`/api/v1/*`): Activation status and per-user referral details
//! - **Administration** (`/admin/api/v1/*`): Settings, referral reporting, manual status changes
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa` annotations. API documentation is available at
//! `/admin/docs` when the server is running.

pub mod handlers;
pub mod models;
