//! Per-request referral input.
//!
//! A referral code can reach registration through three channels. [`ReferralContext`] collects all
//! three once per request and [`ReferralContext::candidate`] applies the precedence
//! cookie > session > query.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, request::Parts};

use crate::AppState;
use crate::config::ReferralConfig;
use crate::cookies::read_cookie;
use crate::referral::session::ReferralSessions;

const MAX_CODE_LENGTH: usize = 64;

/// Which channel supplied a referral code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferralSource {
    Cookie,
    Session,
    Query,
}

impl ReferralSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralSource::Cookie => "cookie",
            ReferralSource::Session => "session",
            ReferralSource::Query => "query",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferralContext {
    pub cookie: Option<String>,
    pub session: Option<String>,
    pub query: Option<String>,
}

impl ReferralContext {
    /// First usable code in precedence order, with the channel it came from.
    pub fn candidate(&self) -> Option<(String, ReferralSource)> {
        [
            (&self.cookie, ReferralSource::Cookie),
            (&self.session, ReferralSource::Session),
            (&self.query, ReferralSource::Query),
        ]
        .into_iter()
        .find_map(|(value, source)| value.as_deref().and_then(sanitize_code).map(|code| (code, source)))
    }

    /// Collect the three channels from request headers and the query string.
    pub async fn collect(
        headers: &HeaderMap,
        query: Option<&str>,
        config: &ReferralConfig,
        sessions: &ReferralSessions,
    ) -> Self {
        let session = match read_cookie(headers, &config.session_cookie_name) {
            Some(session_id) => sessions.get(session_id).await,
            None => None,
        };

        Self {
            cookie: read_cookie(headers, &config.cookie_name).map(str::to_string),
            session,
            query: query_value(query, &config.query_param),
        }
    }
}

/// Clean up an untrusted code. Returns `None` for values that are empty after trimming or that
/// could not be stored in a cookie.
pub fn sanitize_code(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_CODE_LENGTH)
        .collect();

    let cookie_safe = cleaned
        .chars()
        .all(|c| c.is_ascii_graphic() && !matches!(c, ';' | ',' | '"' | '\\'));

    (!cleaned.is_empty() && cookie_safe).then_some(cleaned)
}

/// Value of a query parameter, percent-decoded.
pub fn query_value(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

impl FromRequestParts<AppState> for ReferralContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Self::collect(
            &parts.headers,
            parts.uri.query(),
            &state.config.referral,
            &state.referral_sessions,
        )
        .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header};
    use std::time::Duration;

    fn ctx(cookie: Option<&str>, session: Option<&str>, query: Option<&str>) -> ReferralContext {
        ReferralContext {
            cookie: cookie.map(str::to_string),
            session: session.map(str::to_string),
            query: query.map(str::to_string),
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            ctx(Some("c"), Some("s"), Some("q")).candidate(),
            Some(("c".to_string(), ReferralSource::Cookie))
        );
        assert_eq!(
            ctx(None, Some("s"), Some("q")).candidate(),
            Some(("s".to_string(), ReferralSource::Session))
        );
        assert_eq!(ctx(None, None, Some("q")).candidate(), Some(("q".to_string(), ReferralSource::Query)));
        assert_eq!(ctx(None, None, None).candidate(), None);
    }

    #[test]
    fn test_empty_values_fall_through() {
        assert_eq!(
            ctx(Some(""), Some("   "), Some("q")).candidate(),
            Some(("q".to_string(), ReferralSource::Query))
        );
    }

    #[test]
    fn test_candidate_is_deterministic() {
        let context = ctx(None, Some("bob-1234abcd"), None);
        assert_eq!(context.candidate(), context.candidate());
    }

    #[test]
    fn test_sanitize_code() {
        assert_eq!(sanitize_code("  bob-1234abcd \n").as_deref(), Some("bob-1234abcd"));
        assert_eq!(sanitize_code("ab\u{0007}c").as_deref(), Some("abc"));
        assert_eq!(sanitize_code(&"x".repeat(100)).map(|c| c.len()), Some(64));
        assert_eq!(sanitize_code(""), None);
        assert_eq!(sanitize_code("a;b"), None);
        assert_eq!(sanitize_code("a b"), None);
    }

    #[test]
    fn test_query_value() {
        assert_eq!(query_value(Some("a=1&ref=bob-1234abcd"), "ref").as_deref(), Some("bob-1234abcd"));
        assert_eq!(query_value(Some("ref=a%2Db"), "ref").as_deref(), Some("a-b"));
        assert_eq!(query_value(Some("reference=x"), "ref"), None);
        assert_eq!(query_value(None, "ref"), None);
    }

    #[tokio::test]
    async fn test_collect_reads_all_channels() {
        let config = ReferralConfig::default();
        let sessions = ReferralSessions::new(Duration::from_secs(60));
        sessions.set("sid-1", "from-session").await;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("ra_referral=from-cookie; refgate_sid=sid-1"),
        );

        let context = ReferralContext::collect(&headers, Some("ref=from-query"), &config, &sessions).await;
        assert_eq!(context, ctx(Some("from-cookie"), Some("from-session"), Some("from-query")));
        assert_eq!(context.candidate().unwrap().1, ReferralSource::Cookie);
    }
}
