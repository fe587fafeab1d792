//! Cookie header parsing and `Set-Cookie` construction.

use axum::http::header::{COOKIE, HeaderValue};
use axum::http::HeaderMap;
use tracing::warn;

/// Expiry date used when clearing a cookie.
const EPOCH_EXPIRES: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Find the value of cookie `name` across all `Cookie` headers.
///
/// Empty values are treated as absent.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

/// Build a `Set-Cookie` value that expires `name` immediately.
///
/// Returns `None` (and logs) if the name cannot form a valid header value.
pub fn clear_cookie(name: &str, secure: bool) -> Option<HeaderValue> {
    let raw = format!(
        "{name}=; Path=/; Max-Age=0; Expires={EPOCH_EXPIRES}; HttpOnly; SameSite=Lax{}",
        if secure { "; Secure" } else { "" }
    );
    to_header_value(name, raw)
}

/// Build an `HttpOnly` `Set-Cookie` value for `name`.
pub fn set_cookie(name: &str, value: &str, max_age_secs: u64, secure: bool) -> Option<HeaderValue> {
    let raw = format!(
        "{name}={value}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax{}",
        if secure { "; Secure" } else { "" }
    );
    to_header_value(name, raw)
}

fn to_header_value(name: &str, raw: String) -> Option<HeaderValue> {
    match HeaderValue::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(cookie = %name, error = %e, "Cannot build Set-Cookie header");
            None
        }
    }
}
