//! Operator-visible notices for degraded features.
//!
//! Failures that must not abort a user's request (mail transport down, attribution skipped after a
//! storage error) are logged and also recorded here, where administrators can read them through
//! `GET /admin/api/v1/notices`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use utoipa::ToSchema;

const MAX_NOTICES: usize = 100;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdminNotice {
    /// Feature that degraded, e.g. `email` or `attribution`
    pub source: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Bounded, newest-last list of notices. Cloning shares the same list.
#[derive(Debug, Clone, Default)]
pub struct AdminNotices {
    inner: Arc<Mutex<VecDeque<AdminNotice>>>,
}

impl AdminNotices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, source: &str, message: impl Into<String>) {
        let mut notices = self.inner.lock();
        if notices.len() == MAX_NOTICES {
            notices.pop_front();
        }
        notices.push_back(AdminNotice {
            source: source.to_string(),
            message: message.into(),
            created_at: Utc::now(),
        });
    }

    pub fn list(&self) -> Vec<AdminNotice> {
        self.inner.lock().iter().cloned().collect()
    }
}
