//! RFC 5849 request signing: HMAC-SHA1 over the OAuth1 signature base
//! string, carried in an `Authorization: OAuth` header.

use base64::prelude::*;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::Rng;
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::OAuth1Config;

type HmacSha1 = Hmac<Sha1>;

/// OAuth1 parameter encoding escapes everything outside the RFC 3986
/// unreserved set.
const PARAMETER_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub(crate) fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, PARAMETER_ENCODE).to_string()
}

fn nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
        .collect()
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// The signature base string: uppercase method, encoded URL, and the
/// encoded, sorted parameter string, each segment itself percent-encoded.
fn signature_base_string(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(key, value)| (percent_encode(key), percent_encode(value)))
        .collect();
    encoded.sort();
    let parameter_string = encoded
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&parameter_string)
    )
}

/// Signs `base` with the consumer secret and (possibly empty) token secret.
fn sign(base: &str, consumer_secret: &str, token_secret: &str) -> String {
    let key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    );
    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(base.as_bytes());
    BASE64_STANDARD.encode(mac.finalize().into_bytes())
}

/// Builds a signed `Authorization: OAuth` header value for one request.
///
/// `token` is the token/secret pair to sign with (`None` before a request
/// token exists); `extra` carries call-specific protocol parameters such as
/// `oauth_callback` or `oauth_verifier`. All parameters participate in the
/// signature.
pub(crate) fn authorization_header(
    config: &OAuth1Config,
    method: &str,
    url: &str,
    token: Option<(&str, &str)>,
    extra: &[(&str, &str)],
) -> String {
    let mut params: Vec<(String, String)> = vec![
        ("oauth_consumer_key".to_string(), config.consumer_key.clone()),
        ("oauth_nonce".to_string(), nonce()),
        ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
        ("oauth_timestamp".to_string(), timestamp().to_string()),
        ("oauth_version".to_string(), "1.0".to_string()),
    ];
    for (key, value) in extra {
        params.push((key.to_string(), value.to_string()));
    }
    let token_secret = match token {
        Some((token, secret)) => {
            params.push(("oauth_token".to_string(), token.to_string()));
            secret
        }
        None => "",
    };

    let base = signature_base_string(method, url, &params);
    let signature = sign(&base, &config.consumer_secret, token_secret);
    params.push(("oauth_signature".to_string(), signature));
    params.sort();

    let fields = params
        .iter()
        .map(|(key, value)| format!("{}=\"{}\"", percent_encode(key), percent_encode(value)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("OAuth {fields}")
}
