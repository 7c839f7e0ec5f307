//! Referral code generation.
//!
//! Codes are tried a bounded number of times against the ledger. When every attempt collides,
//! [`fallback_code`] embeds the user's id, which no other user can produce, so issuance never
//! fails on a collision.

use std::future::Future;

use chrono::Utc;
use rand::prelude::RngExt;
use rand::rng;
use sha2::{Digest, Sha256};
use tracing::{instrument, warn};

use crate::config::{CodeStyle, ReferralConfig};
use crate::db::errors::Result;
use crate::db::store::Store;
use crate::types::{UserId, abbrev_uuid};

const RANDOM_CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const RANDOM_CODE_LENGTH: usize = 8;
const SUFFIX_LENGTH: usize = 8;

/// Lowercase a username and collapse every run of non-alphanumerics into a single `-`.
pub fn normalize_handle(username: &str) -> String {
    let mut handle = String::with_capacity(username.len());
    for c in username.chars() {
        if c.is_ascii_alphanumeric() {
            handle.push(c.to_ascii_lowercase());
        } else if !handle.ends_with('-') {
            handle.push('-');
        }
    }
    let handle = handle.trim_matches('-');
    if handle.is_empty() { "user".to_string() } else { handle.to_string() }
}

fn hex_digest(parts: &[&[u8]], len: usize) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect::<String>()[..len].to_string()
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_else(|| Utc::now().timestamp_micros())
}

/// `{handle}-{8 hex}` with the suffix derived from the user id, the clock and a random nonce.
pub fn handle_code(username: &str, user_id: UserId) -> String {
    let nonce: u64 = rng().random();
    let suffix = hex_digest(
        &[user_id.as_bytes(), &now_nanos().to_be_bytes(), &nonce.to_be_bytes()],
        SUFFIX_LENGTH,
    );
    format!("{}-{}", normalize_handle(username), suffix)
}

/// Fixed-length code drawn from `0-9A-Z`.
pub fn random_code() -> String {
    let mut rng = rng();
    (0..RANDOM_CODE_LENGTH)
        .map(|_| RANDOM_CHARSET[rng.random_range(0..RANDOM_CHARSET.len())] as char)
        .collect()
}

/// `user-{id}-{8 hex}`. Unique by construction because it contains the owner's id.
pub fn fallback_code(user_id: UserId) -> String {
    let suffix = hex_digest(&[user_id.as_bytes(), &now_nanos().to_be_bytes()], SUFFIX_LENGTH);
    format!("user-{}-{}", user_id.simple(), suffix)
}

#[derive(Debug, Clone)]
pub struct CodeGenerator {
    style: CodeStyle,
    max_attempts: u32,
}

impl CodeGenerator {
    pub fn new(style: CodeStyle, max_attempts: u32) -> Self {
        Self { style, max_attempts }
    }

    pub fn from_config(config: &ReferralConfig) -> Self {
        Self::new(config.code_style, config.max_code_attempts)
    }

    /// One fresh candidate in the configured style.
    pub fn candidate(&self, user_id: UserId, username: &str) -> String {
        match self.style {
            CodeStyle::Handle => handle_code(username, user_id),
            CodeStyle::Random => random_code(),
        }
    }

    /// Issue a code not currently held by any ledger record.
    #[instrument(skip(self, store), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn issue(&self, store: &dyn Store, user_id: UserId, username: &str) -> Result<String> {
        self.issue_with(user_id, username, |code| async move { store.referral_code_exists(&code).await })
            .await
    }

    async fn issue_with<F, Fut>(&self, user_id: UserId, username: &str, mut taken: F) -> Result<String>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        for attempt in 1..=self.max_attempts {
            let code = self.candidate(user_id, username);
            if !taken(code.clone()).await? {
                return Ok(code);
            }
            warn!(attempt, "Referral code collision");
        }

        Ok(fallback_code(user_id))
    }
}
