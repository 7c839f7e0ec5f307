//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier
//! - [`ReferralId`]: Referral ledger record identifier
//!
//! [`abbrev_uuid`] shortens UUIDs to their first 8 chars for logging.

use serde::Deserialize;
use uuid::Uuid;

pub type UserId = Uuid;
pub type ReferralId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

#[derive(Debug, Clone, Deserialize)]
pub enum CurrentKeyword {
    #[serde(rename = "current")]
    Current,
}

/// Lets routes like /users/current/status and /users/{id}/status share a handler.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserIdOrCurrent {
    Current(CurrentKeyword),
    Id(UserId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }

    #[test]
    fn test_user_id_or_current() {
        let current: UserIdOrCurrent = serde_json::from_str("\"current\"").unwrap();
        assert!(matches!(current, UserIdOrCurrent::Current(_)));

        let id: UserIdOrCurrent = serde_json::from_str("\"550e8400-e29b-41d4-a716-446655440000\"").unwrap();
        assert!(matches!(id, UserIdOrCurrent::Id(_)));
    }
}
