//! HTTP request handlers for all API endpoints.
//!
//! - [`admin`]: Activation settings, referral overview and analytics, manual status, notices, pages
//! - [`auth`]: Registration, login and logout
//! - [`pages`]: Rendering content pages for the current viewer
//! - [`referrals`]: Activation status and referral details
//! - [`signup`]: Registration landing and username share links

pub mod admin;
pub mod auth;
pub mod pages;
pub mod referrals;
pub mod signup;
