//! Header-level cookie plumbing shared by the OAuth1 and OAuth2 stages.

use axum::extract::Request;
use axum::response::Response;
use cookie::Cookie;
use http::HeaderValue;
use http::header::{COOKIE, SET_COOKIE};

/// Reads the first non-empty cookie named `name` from the request.
pub(crate) fn read(req: &Request, name: &str) -> Option<String> {
    for header in req.headers().get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for parsed in Cookie::split_parse(raw.to_owned()) {
            match parsed {
                Ok(cookie) if cookie.name() == name && !cookie.value().is_empty() => {
                    return Some(cookie.value().to_string());
                }
                _ => continue,
            }
        }
    }
    None
}

/// Appends a `Set-Cookie` header for `cookie` to the response.
pub(crate) fn append(response: &mut Response, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(_) => {
            tracing::warn!(name = cookie.name(), "dropping unencodable cookie value");
        }
    }
}
