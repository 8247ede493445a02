//! Request pipeline middleware
//!
//! Order on the request path: authentication binding, CSRF enforcement, rate
//! limiting, security headers, then the route handler. Responses pass back
//! through in reverse.

pub mod auth;
pub mod csrf;
pub mod rate_limit;
pub mod security_headers;

pub use auth::{auth_binding, CurrentUser, MaybeUser};
pub use csrf::{csrf_guard, verify_csrf_field, CsrfExpectation};
pub use rate_limit::{rate_limit_guard, Bucket, RateLimiter};
pub use security_headers::apply_security_headers;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, Request};
use std::net::SocketAddr;

/// Read a cookie value from the request headers
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Best-effort client IP: X-Forwarded-For from the reverse proxy, falling
/// back to the socket peer address
pub(crate) fn client_ip(request: &Request<Body>) -> Option<String> {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        return Some(forwarded);
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
}

/// Build the session cookie: HttpOnly, Lax, browser-session scoped
///
/// Server-side expiry is authoritative, so no Max-Age is set.
pub(crate) fn session_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        auth::SESSION_COOKIE,
        token
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Expire the session cookie immediately
pub(crate) fn clear_session_cookie(secure: bool) -> String {
    let mut cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        auth::SESSION_COOKIE
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build the CSRF cookie: Strict, readable by the template layer
pub(crate) fn csrf_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!("{}={}; Path=/; SameSite=Strict", csrf::CSRF_COOKIE, token);
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_cookie_value_parses_multiple_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("csrf_token=abc; session_token=xyz; theme=dark"),
        );
        assert_eq!(
            cookie_value(&headers, "session_token").as_deref(),
            Some("xyz")
        );
        assert_eq!(cookie_value(&headers, "csrf_token").as_deref(), Some("abc"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("tok", false);
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("Secure"));
        assert!(!cookie.contains("Max-Age"));

        let secure = session_cookie("tok", true);
        assert!(secure.contains("Secure"));
    }

    #[test]
    fn test_csrf_cookie_is_readable_and_strict() {
        let cookie = csrf_cookie("tok", true);
        assert!(cookie.contains("SameSite=Strict"));
        assert!(!cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request).as_deref(), Some("203.0.113.7"));
    }
}
