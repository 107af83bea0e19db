//! Facebook OAuth2 login adapter.

use std::sync::Arc;

use axum::extract::Request;
use axum::response::Response;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::{CookieConfig, OAuth2Config};
use crate::context::{ScopedContext, http_client_from_context, with_error};
use crate::errors::Error;
use crate::handler::{LoginHandler, failure_or_default};
use crate::oauth2::{self, Token, token_from_context};

/// Facebook's OAuth2 authorization endpoint.
pub const AUTHORIZATION_URL: &str = "https://www.facebook.com/v19.0/dialog/oauth";
/// Facebook's OAuth2 token endpoint.
pub const TOKEN_URL: &str = "https://graph.facebook.com/v19.0/oauth/access_token";
/// Graph API endpoint for the authenticated user.
pub const USER_URL: &str = "https://graph.facebook.com/v19.0/me";

/// The authenticated Facebook user. Facebook identifiers are strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Returns a new context carrying the Facebook user.
pub fn with_user(ctx: &ScopedContext, user: User) -> ScopedContext {
    ctx.with_value(user)
}

/// The Facebook user set by the user-fetch stage.
pub fn user_from_context(ctx: &ScopedContext) -> Option<User> {
    ctx.value_of::<User>().cloned()
}

/// CSRF state stage; see [`oauth2::state_handler`].
pub fn state_handler(config: CookieConfig, success: Arc<dyn LoginHandler>) -> Arc<dyn LoginHandler> {
    oauth2::state_handler(config, success)
}

/// Login stage redirecting to Facebook's authorization endpoint.
pub fn login_handler(
    config: OAuth2Config,
    failure: Option<Arc<dyn LoginHandler>>,
) -> Arc<dyn LoginHandler> {
    oauth2::login_handler(config, failure)
}

/// Callback stage that exchanges the code, fetches the Facebook user, and
/// adds both the [`Token`] and the [`User`] to the success handler's context.
pub fn callback_handler(
    config: OAuth2Config,
    success: Arc<dyn LoginHandler>,
    failure: Option<Arc<dyn LoginHandler>>,
) -> Arc<dyn LoginHandler> {
    let failure = failure_or_default(failure);
    let success = user_fetch_handler(USER_URL, success, failure.clone());
    oauth2::callback_handler(config, success, Some(failure))
}

/// Stage that fetches the authenticated Facebook user from `user_url`.
pub fn user_fetch_handler(
    user_url: &str,
    success: Arc<dyn LoginHandler>,
    failure: Arc<dyn LoginHandler>,
) -> Arc<dyn LoginHandler> {
    Arc::new(UserFetchStage {
        user_url: user_url.to_string(),
        success,
        failure,
    })
}

struct UserFetchStage {
    user_url: String,
    success: Arc<dyn LoginHandler>,
    failure: Arc<dyn LoginHandler>,
}

#[async_trait::async_trait]
impl LoginHandler for UserFetchStage {
    async fn handle(&self, ctx: ScopedContext, req: Request) -> Response {
        let token = match token_from_context(&ctx) {
            Ok(token) => token,
            Err(err) => {
                let ctx = with_error(&ctx, err);
                return self.failure.handle(ctx, req).await;
            }
        };

        let http = http_client_from_context(&ctx);
        let (user, status, err) = match fetch_user(&http, &self.user_url, &token).await {
            Ok((user, status)) => (user, Some(status), None),
            Err(err) => (None, None, Some(err)),
        };

        match (validate_response(user.as_ref(), status, err.as_ref()), user) {
            (Ok(()), Some(user)) => {
                let ctx = with_user(&ctx, user);
                self.success.handle(ctx, req).await
            }
            (outcome, _) => {
                let err = outcome.err().unwrap_or(Error::UnableToGetFacebookUser);
                tracing::warn!(error = %err, "facebook user fetch rejected");
                let ctx = with_error(&ctx, err);
                self.failure.handle(ctx, req).await
            }
        }
    }
}

async fn fetch_user(
    http: &reqwest::Client,
    url: &str,
    token: &Token,
) -> anyhow::Result<(Option<User>, StatusCode)> {
    let response = http
        .get(url)
        .query(&[("fields", "id,name,email")])
        .bearer_auth(&token.access_token)
        .send()
        .await?;
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
        return Err(Error::UnableToGetFacebookUser);
    }
    match user {
        Some(user) if !user.id.is_empty() => Ok(()),
        _ => Err(Error::UnableToGetFacebookUser),
    }
}
