//! Referral codes, attribution and the cookie/session/query channel.
//!
//! - [`codes`]: issuing unique referral codes
//! - [`context`]: the per-request referral input and its precedence rules
//! - [`session`]: server-side referral sessions
//! - [`capture`]: middleware persisting `?ref=` codes
//! - [`service`]: the registration hook and referral reporting

pub mod capture;
pub mod codes;
pub mod context;
pub mod service;
pub mod session;

pub use context::{ReferralContext, ReferralSource};
pub use service::{ReferralService, RegistrationOutcome};
pub use session::ReferralSessions;
