//! Server-side referral sessions.
//!
//! A browser that arrives with a referral code gets a session id cookie; the code is remembered
//! against that id so it survives even if the referral cookie itself is dropped.

use moka::future::Cache;
use std::time::Duration;
use uuid::Uuid;

const MAX_SESSIONS: u64 = 100_000;

#[derive(Clone)]
pub struct ReferralSessions {
    cache: Cache<String, String>,
}

impl ReferralSessions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().max_capacity(MAX_SESSIONS).time_to_live(ttl).build(),
        }
    }

    pub fn new_session_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    pub async fn get(&self, session_id: &str) -> Option<String> {
        self.cache.get(session_id).await
    }

    pub async fn set(&self, session_id: &str, code: &str) {
        self.cache.insert(session_id.to_string(), code.to_string()).await;
    }
}
