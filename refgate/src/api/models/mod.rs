//! API request and response data models.
//!
//! These are the JSON shapes exchanged over HTTP. They are separate from the `db::models`
//! types so that storage details (password hashes, internal columns) never reach a response.

pub mod auth;
pub mod pages;
pub mod referrals;
pub mod users;
