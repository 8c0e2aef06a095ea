//! `kh-auth` cookie encode/decode (§6: "Cookie: kh-auth, SameSite=Strict,
//! expires = token.expires - now"). `secure`/`HttpOnly` are toggled by the
//! deployment environment (local runs without TLS, so `Secure` would make
//! the cookie unusable).

use chrono::{DateTime, Utc};
use http::{header::COOKIE, HeaderMap, HeaderValue};

pub const COOKIE_NAME: &str = "kh-auth";

/// Build the `Set-Cookie` value for a freshly issued token.
pub fn build_set_cookie(token: &str, expires: DateTime<Utc>, now: DateTime<Utc>, secure: bool) -> HeaderValue {
    let max_age = (expires - now).num_seconds().max(0);
    let mut cookie = format!("{COOKIE_NAME}={token}; Path=/; Max-Age={max_age}; SameSite=Strict; HttpOnly");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).expect("cookie value is always valid ascii")
}

/// The cookie that clears `kh-auth` on logout.
pub fn build_clear_cookie(secure: bool) -> HeaderValue {
    let mut cookie = format!("{COOKIE_NAME}=; Path=/; Max-Age=0; SameSite=Strict; HttpOnly");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).expect("cookie value is always valid ascii")
}

/// Extract the raw `kh-auth` cookie value from a request's `Cookie` header.
pub fn read_auth_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix(COOKIE_NAME)?.strip_prefix('=')
    }).map(str::to_owned)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_cookie_carries_max_age_and_flags() {
        let now = Utc::now();
        let expires = now + chrono::Duration::seconds(60);
        let value = build_set_cookie("tok", expires, now, true).to_str().unwrap().to_owned();
        assert!(value.contains("kh-auth=tok"));
        assert!(value.contains("Max-Age=60"));
        assert!(value.contains("Secure"));
        assert!(value.contains("SameSite=Strict"));
    }

    #[test]
    fn local_environment_omits_secure_flag() {
        let now = Utc::now();
        let value = build_set_cookie("tok", now, now, false).to_str().unwrap().to_owned();
        assert!(!value.contains("Secure"));
        assert!(value.contains("HttpOnly"));
    }

    #[test]
    fn reads_cookie_from_header_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("foo=bar; kh-auth=abc123; baz=qux"));
        assert_eq!(read_auth_cookie(&headers), Some("abc123".to_owned()));
    }

    #[test]
    fn missing_cookie_header_is_none() {
        let headers = HeaderMap::new();
        assert_eq!(read_auth_cookie(&headers), None);
    }
}
