//! Referral placeholders available to page authors.
//!
//! Page bodies may contain `[referral_link]`, `[referral_status]` and `[referral_count]`. They are
//! expanded per viewer at render time; anonymous viewers get a prompt to log in.

use minijinja::HtmlEscape;
use url::Url;

use crate::api::models::referrals::ReferralInfo;
use crate::api::models::users::AccountStatus;
use crate::config::{Config, LinkStyle};

pub const REFERRAL_LINK: &str = "[referral_link]";
pub const REFERRAL_STATUS: &str = "[referral_status]";
pub const REFERRAL_COUNT: &str = "[referral_count]";

/// Shareable URL that carries `code` back to this site.
pub fn referral_link(config: &Config, code: &str, username: &str) -> String {
    match config.referral.link_style {
        LinkStyle::Path => path_link(&config.site_url, &config.referral.registration_path, username)
            .unwrap_or_else(|| query_link(&config.site_url, &config.referral.query_param, code)),
        LinkStyle::Query => query_link(&config.site_url, &config.referral.query_param, code),
    }
}

fn query_link(site_url: &Url, param: &str, code: &str) -> String {
    let mut url = site_url.clone();
    url.set_path("/");
    url.set_query(None);
    url.query_pairs_mut().append_pair(param, code);
    url.to_string()
}

fn path_link(site_url: &Url, registration_path: &str, username: &str) -> Option<String> {
    let mut url = site_url.join(registration_path).ok()?;
    url.path_segments_mut().ok()?.pop_if_empty().push(username);
    Some(url.to_string())
}

fn link_html(viewer: Option<&ReferralInfo>) -> String {
    let Some(viewer) = viewer else {
        return "Please log in to view your referral link.".to_string();
    };
    let Some(link) = viewer.referral_link.as_deref() else {
        return "Referral code not found.".to_string();
    };

    format!(
        r#"<div class="referral-link-wrapper"><p class="referral-link-label">Your Referral Link:</p><input type="text" class="referral-link-input" value="{}" readonly></div>"#,
        HtmlEscape(link)
    )
}

fn status_html(viewer: Option<&ReferralInfo>) -> String {
    let Some(viewer) = viewer else {
        return "Please log in to view your referral status.".to_string();
    };

    let mut html = format!(
        r#"<div class="referral-status"><p>Current Status: {}</p><p>Your Referrals: {} of {}</p>"#,
        viewer.status, viewer.referral_count, viewer.threshold
    );
    if viewer.status == AccountStatus::Pending {
        let remaining = viewer.remaining.unwrap_or_default();
        html.push_str(&format!("<p>Referrals needed for activation: {remaining}</p>"));
    }
    html.push_str("</div>");
    html
}

/// Replace every placeholder in `body` for the given viewer.
pub fn expand(body: &str, viewer: Option<&ReferralInfo>) -> String {
    let mut expanded = body.to_string();
    if expanded.contains(REFERRAL_LINK) {
        expanded = expanded.replace(REFERRAL_LINK, &link_html(viewer));
    }
    if expanded.contains(REFERRAL_STATUS) {
        expanded = expanded.replace(REFERRAL_STATUS, &status_html(viewer));
    }
    if expanded.contains(REFERRAL_COUNT) {
        let count = viewer.map(|v| v.referral_count.to_string()).unwrap_or_else(|| "0".to_string());
        expanded = expanded.replace(REFERRAL_COUNT, &count);
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;
    use uuid::Uuid;

    fn viewer(code: Option<&str>, status: AccountStatus, count: i64) -> ReferralInfo {
        ReferralInfo {
            user_id: Uuid::new_v4(),
            username: "rita".to_string(),
            referral_code: code.map(str::to_string),
            referral_link: code.map(|c| format!("https://club.example.com/?ref={c}")),
            referred_by: None,
            status,
            referral_count: count,
            threshold: 5,
            remaining: (status == AccountStatus::Pending).then(|| (5 - count).max(0)),
        }
    }

    #[test]
    fn test_query_link() {
        let mut config = create_test_config();
        config.site_url = Url::parse("https://club.example.com/blog/").unwrap();
        assert_eq!(
            referral_link(&config, "rita-1234abcd", "rita"),
            "https://club.example.com/?ref=rita-1234abcd"
        );
    }

    #[test]
    fn test_path_link() {
        let mut config = create_test_config();
        config.site_url = Url::parse("https://club.example.com").unwrap();
        config.referral.link_style = LinkStyle::Path;
        assert_eq!(
            referral_link(&config, "rita-1234abcd", "rita"),
            "https://club.example.com/sign-up/rita"
        );
        assert_eq!(
            referral_link(&config, "x", "rita smith"),
            "https://club.example.com/sign-up/rita%20smith"
        );
    }

    #[test]
    fn test_anonymous_expansion() {
        let body = "<p>[referral_link]</p>[referral_status] ([referral_count])";
        assert_eq!(
            expand(body, None),
            "<p>Please log in to view your referral link.</p>Please log in to view your referral status. (0)"
        );
    }

    #[test]
    fn test_pending_viewer_expansion() {
        let info = viewer(Some("rita-1234abcd"), AccountStatus::Pending, 2);
        let expanded = expand("[referral_link][referral_status][referral_count]", Some(&info));

        assert!(expanded.contains(r#"value="https://club.example.com/?ref=rita-1234abcd""#));
        assert!(expanded.contains("Current Status: Pending"));
        assert!(expanded.contains("Your Referrals: 2 of 5"));
        assert!(expanded.contains("Referrals needed for activation: 3"));
        assert!(expanded.ends_with("</div>2"));
    }

    #[test]
    fn test_active_viewer_has_no_remaining_line() {
        let info = viewer(Some("rita-1234abcd"), AccountStatus::Active, 7);
        let expanded = expand("[referral_status]", Some(&info));
        assert!(expanded.contains("Current Status: Active"));
        assert!(!expanded.contains("Referrals needed"));
    }

    #[test]
    fn test_missing_code() {
        let info = viewer(None, AccountStatus::Pending, 0);
        assert_eq!(expand("[referral_link]", Some(&info)), "Referral code not found.");
    }

    #[test]
    fn test_link_is_escaped() {
        let mut info = viewer(Some("x"), AccountStatus::Active, 0);
        info.referral_link = Some("https://a.example/?ref=\"><script>".to_string());
        let expanded = expand("[referral_link]", Some(&info));
        assert!(!expanded.contains("<script>"));
    }
}
