//! Bitbucket OAuth2 login adapter.

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

/// Bitbucket's OAuth2 authorization endpoint.
pub const AUTHORIZATION_URL: &str = "https://bitbucket.org/site/oauth2/authorize";
/// Bitbucket's OAuth2 token endpoint.
pub const TOKEN_URL: &str = "https://bitbucket.org/site/oauth2/access_token";
/// The authenticated-user endpoint on the Bitbucket API.
pub const USER_URL: &str = "https://api.bitbucket.org/2.0/user";

/// The authenticated Bitbucket user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}

/// Returns a new context carrying the Bitbucket user.
pub fn with_user(ctx: &ScopedContext, user: User) -> ScopedContext {
    ctx.with_value(user)
}

/// The Bitbucket user set by the user-fetch stage.
pub fn user_from_context(ctx: &ScopedContext) -> Option<User> {
    ctx.value_of::<User>().cloned()
}

/// CSRF state stage; see [`oauth2::state_handler`].
pub fn state_handler(config: CookieConfig, success: Arc<dyn LoginHandler>) -> Arc<dyn LoginHandler> {
    oauth2::state_handler(config, success)
}

/// Login stage redirecting to Bitbucket's authorization endpoint.
pub fn login_handler(
    config: OAuth2Config,
    failure: Option<Arc<dyn LoginHandler>>,
) -> Arc<dyn LoginHandler> {
    oauth2::login_handler(config, failure)
}

/// Callback stage that exchanges the code, fetches the Bitbucket user, and
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

/// Stage that fetches the authenticated Bitbucket user from `user_url`.
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
                let err = outcome.err().unwrap_or(Error::UnableToGetBitbucketUser);
                tracing::warn!(error = %err, "bitbucket user fetch rejected");
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
        return Err(Error::UnableToGetBitbucketUser);
    }
    match user {
        Some(user) if !user.username.is_empty() => Ok(()),
        _ => Err(Error::UnableToGetBitbucketUser),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::testutils;
    use axum::Router;
    use axum::body::Body;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use std::sync::Mutex;

    fn request() -> Request {
        http::Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    fn any_token() -> Token {
        Token {
            access_token: "any-token".to_string(),
            token_type: "bearer".to_string(),
            refresh_token: None,
            expiry: None,
        }
    }

    #[test]
    fn validate_response_accepts_only_complete_triples() {
        let user = User {
            username: "atlassian_tutorial".to_string(),
            display_name: Some("Atlassian Tutorial".to_string()),
            uuid: None,
        };

        assert_eq!(
            validate_response(Some(&user), Some(StatusCode::OK), None),
            Ok(())
        );
        assert_eq!(
            validate_response(
                Some(&user),
                Some(StatusCode::OK),
                Some(&anyhow::anyhow!("server error"))
            ),
            Err(Error::UnableToGetBitbucketUser)
        );
        assert_eq!(
            validate_response(Some(&user), Some(StatusCode::INTERNAL_SERVER_ERROR), None),
            Err(Error::UnableToGetBitbucketUser)
        );
        assert_eq!(
            validate_response(None, Some(StatusCode::OK), None),
            Err(Error::UnableToGetBitbucketUser)
        );
        assert_eq!(
            validate_response(Some(&User::default()), Some(StatusCode::OK), None),
            Err(Error::UnableToGetBitbucketUser)
        );
    }

    #[tokio::test]
    async fn user_fetch_adds_user_to_success_context() {
        let router = Router::new().route(
            "/2.0/user",
            get(|| async {
                axum::Json(serde_json::json!({
                    "username": "atlassian_tutorial",
                    "display_name": "Atlassian Tutorial"
                }))
            }),
        );
        let base = testutils::serve(router).await;

        let seen: Arc<Mutex<Option<User>>> = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        let success = handler_fn(move |ctx: ScopedContext, _req| {
            let captured = captured.clone();
            async move {
                *captured.lock().unwrap() = user_from_context(&ctx);
                "ok".into_response()
            }
        });

        let handler = user_fetch_handler(
            &format!("{base}/2.0/user"),
            success,
            testutils::assert_failure_not_called(),
        );
        let ctx = oauth2::with_token(&ScopedContext::new(), any_token());
        handler.handle(ctx, request()).await;

        let user = seen.lock().unwrap().clone().unwrap();
        assert_eq!(user.username, "atlassian_tutorial");
    }

    #[tokio::test]
    async fn user_fetch_maps_provider_failure_to_sentinel() {
        let base = testutils::error_server(StatusCode::INTERNAL_SERVER_ERROR).await;

        let (failure, captured) = testutils::capture_error();
        let handler = user_fetch_handler(
            &format!("{base}/2.0/user"),
            testutils::assert_success_not_called(),
            failure,
        );
        let ctx = oauth2::with_token(&ScopedContext::new(), any_token());
        handler.handle(ctx, request()).await;

        assert_eq!(captured.take(), Some(Error::UnableToGetBitbucketUser));
    }

    #[tokio::test]
    async fn user_fetch_without_token_short_circuits() {
        let (failure, captured) = testutils::capture_error();
        let handler = user_fetch_handler(
            "http://127.0.0.1:9/2.0/user",
            testutils::assert_success_not_called(),
            failure,
        );

        handler.handle(ScopedContext::new(), request()).await;

        assert_eq!(captured.take(), Some(Error::MissingToken));
    }
}
