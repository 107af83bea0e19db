//! Configuration types passed explicitly into stage constructors.
//!
//! No stage reads global state: cookie parameters, provider endpoints, and
//! form field names all arrive through these structs.

use cookie::Cookie;
use url::Url;

/// Configuration for the short-lived cookies the flows issue: the OAuth2
/// CSRF state cookie and the OAuth1 request-token cache cookie.
#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub name: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    /// Lifetime in seconds. State and request-token cookies only need to
    /// survive the round trip to the provider.
    pub max_age: i64,
    pub http_only: bool,
    pub secure: bool,
}

impl CookieConfig {
    /// Production settings: HTTPS-only, HTTP-only, 60 second lifetime.
    pub fn standard(name: impl Into<String>) -> Self {
        CookieConfig {
            name: name.into(),
            path: Some("/".to_string()),
            domain: None,
            max_age: 60,
            http_only: true,
            secure: true,
        }
    }

    /// Like [`CookieConfig::standard`] but without the `Secure` flag, for
    /// plain-HTTP development servers. Not for production use.
    pub fn debug(name: impl Into<String>) -> Self {
        CookieConfig {
            secure: false,
            ..CookieConfig::standard(name)
        }
    }

    /// Bakes `value` into a cookie carrying this configuration's flags.
    pub(crate) fn bake(&self, value: String) -> Cookie<'static> {
        let mut builder = Cookie::build((self.name.clone(), value))
            .max_age(time::Duration::seconds(self.max_age))
            .http_only(self.http_only)
            .secure(self.secure);
        if let Some(path) = &self.path {
            builder = builder.path(path.clone());
        }
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }
}

/// OAuth2 provider configuration: client credentials plus the authorize and
/// token endpoints. Provider modules export their well-known endpoint URLs.
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    /// Redirect URI registered with the provider, echoed in the code exchange.
    pub redirect_url: String,
    /// Scopes joined with spaces into the `scope` parameter; empty means the
    /// parameter is omitted.
    pub scopes: Vec<String>,
}

impl OAuth2Config {
    /// Builds the provider authorization URL carrying `state`.
    ///
    /// Panics if `auth_url` is not a valid URL; endpoint configuration is a
    /// programming error, not a runtime condition.
    pub(crate) fn authorization_url(&self, state: &str) -> Url {
        let mut url = Url::parse(&self.auth_url).expect("valid OAuth2 authorization endpoint URL");
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_url);
            if !self.scopes.is_empty() {
                query.append_pair("scope", &self.scopes.join(" "));
            }
            query.append_pair("state", state);
        }
        url
    }
}

/// OAuth1 provider configuration: consumer credentials plus the three
/// endpoints of the request-token / authorize / access-token sequence.
#[derive(Debug, Clone)]
pub struct OAuth1Config {
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Callback URL sent as `oauth_callback` with the request-token request.
    pub callback_url: String,
    pub request_token_url: String,
    pub authorize_url: String,
    pub access_token_url: String,
}

/// Form field names accepted by the standalone POST token stage.
///
/// A configuration surface rather than hardcoded business logic: callers
/// integrating providers with non-standard field names override these.
#[derive(Debug, Clone)]
pub struct TokenFields {
    pub access_token: String,
    pub access_token_secret: String,
}

impl Default for TokenFields {
    fn default() -> Self {
        TokenFields {
            access_token: "oauth_token".to_string(),
            access_token_secret: "oauth_token_secret".to_string(),
        }
    }
}
