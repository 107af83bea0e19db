//! Twitter OAuth1 login adapter.
//!
//! Twitter still speaks OAuth1 for "sign in with Twitter": the login and
//! callback stages come from [`crate::oauth1`], and the user-fetch stage
//! verifies credentials with a signed call to the verify-credentials
//! endpoint. The token handler accepts POSTed token/secret pairs from
//! clients that already completed authorization elsewhere (such as mobile
//! SDK logins) and verifies them the same way.

use std::sync::Arc;

use axum::extract::Request;
use axum::response::Response;
use http::StatusCode;
use http::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};

use crate::config::{CookieConfig, OAuth1Config, TokenFields};
use crate::context::{ScopedContext, http_client_from_context, with_error};
use crate::errors::Error;
use crate::handler::{LoginHandler, failure_or_default};
use crate::oauth1::{self, AccessToken, access_token_from_context, signature};

/// Twitter's OAuth1 request-token endpoint.
pub const REQUEST_TOKEN_URL: &str = "https://api.twitter.com/oauth/request_token";
/// The authenticate endpoint used for "sign in with Twitter". Unlike the
/// plain authorize endpoint it skips re-approval for returning users.
pub const AUTHENTICATE_URL: &str = "https://api.twitter.com/oauth/authenticate";
/// Twitter's OAuth1 access-token endpoint.
pub const ACCESS_TOKEN_URL: &str = "https://api.twitter.com/oauth/access_token";
/// The verify-credentials endpoint returning the authenticated user.
pub const VERIFY_URL: &str = "https://api.twitter.com/1.1/account/verify_credentials.json";

/// The authenticated Twitter user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub id_str: String,
    #[serde(default)]
    pub screen_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Returns a new context carrying the Twitter user.
pub fn with_user(ctx: &ScopedContext, user: User) -> ScopedContext {
    ctx.with_value(user)
}

/// The Twitter user set by the user-fetch stage.
pub fn user_from_context(ctx: &ScopedContext) -> Option<User> {
    ctx.value_of::<User>().cloned()
}

/// Convenience constructor wiring Twitter's well-known endpoints.
pub fn config(
    consumer_key: impl Into<String>,
    consumer_secret: impl Into<String>,
    callback_url: impl Into<String>,
) -> OAuth1Config {
    OAuth1Config {
        consumer_key: consumer_key.into(),
        consumer_secret: consumer_secret.into(),
        callback_url: callback_url.into(),
        request_token_url: REQUEST_TOKEN_URL.to_string(),
        authorize_url: AUTHENTICATE_URL.to_string(),
        access_token_url: ACCESS_TOKEN_URL.to_string(),
    }
}

/// Login stage; see [`oauth1::login_handler`].
pub fn login_handler(
    config: OAuth1Config,
    cookie_config: CookieConfig,
    failure: Option<Arc<dyn LoginHandler>>,
) -> Arc<dyn LoginHandler> {
    oauth1::login_handler(config, cookie_config, failure)
}

/// Callback stage that exchanges the verifier, verifies credentials, and
/// adds both the [`AccessToken`] pair and the [`User`] to the success
/// handler's context.
pub fn callback_handler(
    config: OAuth1Config,
    cookie_config: CookieConfig,
    success: Arc<dyn LoginHandler>,
    failure: Option<Arc<dyn LoginHandler>>,
) -> Arc<dyn LoginHandler> {
    let failure = failure_or_default(failure);
    let success = user_fetch_handler(config.clone(), VERIFY_URL, success, failure.clone());
    oauth1::callback_handler(config, cookie_config, success, Some(failure))
}

/// Token stage for POSTed token/secret pairs: stores the pair, then
/// verifies it against Twitter before delegating to success.
pub fn token_handler(
    config: OAuth1Config,
    success: Arc<dyn LoginHandler>,
    failure: Option<Arc<dyn LoginHandler>>,
) -> Arc<dyn LoginHandler> {
    let failure = failure_or_default(failure);
    let success = user_fetch_handler(config, VERIFY_URL, success, failure.clone());
    oauth1::token_handler(TokenFields::default(), success, Some(failure))
}

/// Stage that reads the access-token pair from the context and fetches the
/// authenticated Twitter user from `verify_url` with a signed request.
pub fn user_fetch_handler(
    config: OAuth1Config,
    verify_url: &str,
    success: Arc<dyn LoginHandler>,
    failure: Arc<dyn LoginHandler>,
) -> Arc<dyn LoginHandler> {
    Arc::new(UserFetchStage {
        config,
        verify_url: verify_url.to_string(),
        success,
        failure,
    })
}

struct UserFetchStage {
    config: OAuth1Config,
    verify_url: String,
    success: Arc<dyn LoginHandler>,
    failure: Arc<dyn LoginHandler>,
}

#[async_trait::async_trait]
impl LoginHandler for UserFetchStage {
    async fn handle(&self, ctx: ScopedContext, req: Request) -> Response {
        let access_token = match access_token_from_context(&ctx) {
            Ok(pair) => pair,
            Err(err) => {
                let ctx = with_error(&ctx, err);
                return self.failure.handle(ctx, req).await;
            }
        };

        let http = http_client_from_context(&ctx);
        let outcome = fetch_user(&http, &self.config, &self.verify_url, &access_token).await;
        let (user, status, err) = match outcome {
            Ok((user, status)) => (user, Some(status), None),
            Err(err) => (None, None, Some(err)),
        };

        match (validate_response(user.as_ref(), status, err.as_ref()), user) {
            (Ok(()), Some(user)) => {
                let ctx = with_user(&ctx, user);
                self.success.handle(ctx, req).await
            }
            (outcome, _) => {
                let err = outcome.err().unwrap_or(Error::UnableToGetTwitterUser);
                tracing::warn!(error = %err, "twitter user fetch rejected");
                let ctx = with_error(&ctx, err);
                self.failure.handle(ctx, req).await
            }
        }
    }
}

async fn fetch_user(
    http: &reqwest::Client,
    config: &OAuth1Config,
    url: &str,
    access_token: &AccessToken,
) -> anyhow::Result<(Option<User>, StatusCode)> {
    let header = signature::authorization_header(
        config,
        "GET",
        url,
        Some((&access_token.token, &access_token.secret)),
        &[],
    );
    let response = http.get(url).header(AUTHORIZATION, header).send().await?;
    let status = response.status();
    if status != StatusCode::OK {
        return Ok((None, status));
    }
    let user = response.json::<User>().await?;
    Ok((Some(user), status))
}

fn validate_response(
    user: Option<&User>,
    status: Option<StatusCode>,
    err: Option<&anyhow::Error>,
) -> Result<(), Error> {
    if err.is_some() || status != Some(StatusCode::OK) {
        return Err(Error::UnableToGetTwitterUser);
    }
    match user {
        Some(user) if user.id != 0 && !user.id_str.is_empty() => Ok(()),
        _ => Err(Error::UnableToGetTwitterUser),
    }
}
