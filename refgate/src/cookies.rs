//! Cookie header parsing and `Set-Cookie` construction.

use axum::http::{HeaderMap, header};
use std::time::Duration;

/// First value of the named cookie across all `Cookie` headers.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Attributes for a `Set-Cookie` header.
#[derive(Debug, Clone)]
pub struct CookieSpec<'a> {
    pub name: &'a str,
    pub value: &'a str,
    pub max_age: Duration,
    pub domain: Option<&'a str>,
    pub secure: bool,
    pub same_site: &'a str,
}

impl CookieSpec<'_> {
    /// Render as a `Set-Cookie` value. Cookies are always HttpOnly and scoped to `/`.
    pub fn render(&self) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite={}",
            self.name,
            self.value,
            self.max_age.as_secs(),
            capitalize(self.same_site)
        );
        if let Some(domain) = self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// A `Set-Cookie` value that removes the named cookie.
pub fn expired_cookie(name: &str) -> String {
    format!("{name}=; Path=/; Max-Age=0; HttpOnly")
}

fn capitalize(value: &str) -> String {
    let lower = value.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
