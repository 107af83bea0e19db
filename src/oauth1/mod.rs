//! Provider-agnostic OAuth1 three-legged flow stages.
//!
//! The login stage obtains a request token, caches the token/secret pair in
//! a short-lived cookie (OAuth1 callbacks do not echo the secret back), and
//! redirects to the provider's authorize endpoint. The callback stage
//! recovers the cached pair, checks it against the callback parameters, and
//! exchanges the verifier for an [`AccessToken`]. A standalone POST token
//! stage accepts already-issued credentials without a browser redirect.

pub(crate) mod signature;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use http::header::{AUTHORIZATION, LOCATION};
use http::{Method, StatusCode};
use url::Url;

use crate::config::{CookieConfig, OAuth1Config, TokenFields};
use crate::context::{ScopedContext, http_client_from_context, with_error};
use crate::cookies;
use crate::errors::Error;
use crate::handler::{LoginHandler, failure_or_default};

/// Short-lived request token issued before user authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestToken {
    pub token: String,
    pub secret: String,
}

/// Access token/secret pair usable against the provider's API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub secret: String,
}

/// Returns a new context carrying the OAuth1 request token pair.
pub fn with_request_token(ctx: &ScopedContext, token: RequestToken) -> ScopedContext {
    ctx.with_value(token)
}

/// The request token recovered by the callback stage.
pub fn request_token_from_context(ctx: &ScopedContext) -> Result<RequestToken, Error> {
    ctx.value_of::<RequestToken>()
        .cloned()
        .ok_or(Error::MissingRequestToken)
}

/// Returns a new context carrying the OAuth1 access token pair.
pub fn with_access_token(ctx: &ScopedContext, token: AccessToken) -> ScopedContext {
    ctx.with_value(token)
}

/// The access token pair set by the callback or token stage.
pub fn access_token_from_context(ctx: &ScopedContext) -> Result<AccessToken, Error> {
    ctx.value_of::<AccessToken>()
        .cloned()
        .ok_or(Error::MissingToken)
}

/// Handles login requests by obtaining a request token, caching the pair in
/// the configured cookie, and redirecting to the provider's authorize
/// endpoint. Request-token failures run the failure handler with
/// [`Error::UnableToGetRequestToken`].
pub fn login_handler(
    config: OAuth1Config,
    cookie_config: CookieConfig,
    failure: Option<Arc<dyn LoginHandler>>,
) -> Arc<dyn LoginHandler> {
    Arc::new(LoginStage {
        config,
        cookie_config,
        failure: failure_or_default(failure),
    })
}

struct LoginStage {
    config: OAuth1Config,
    cookie_config: CookieConfig,
    failure: Arc<dyn LoginHandler>,
}

#[async_trait::async_trait]
impl LoginHandler for LoginStage {
    async fn handle(&self, ctx: ScopedContext, req: Request) -> Response {
        let http = http_client_from_context(&ctx);
        match fetch_request_token(&http, &self.config).await {
            Ok(request_token) => {
                let mut url = Url::parse(&self.config.authorize_url)
                    .expect("valid OAuth1 authorize endpoint URL");
                url.query_pairs_mut()
                    .append_pair("oauth_token", &request_token.token);

                let mut response =
                    (StatusCode::FOUND, [(LOCATION, url.to_string())]).into_response();
                cookies::append(
                    &mut response,
                    &self.cookie_config.bake(encode_pair(&request_token)),
                );
                response
            }
            Err(err) => {
                tracing::warn!(error = %err, "request token fetch failed");
                let ctx = with_error(&ctx, Error::UnableToGetRequestToken);
                self.failure.handle(ctx, req).await
            }
        }
    }
}

/// Handles the provider's callback request: recovers the cached request
/// token, verifies it against the callback's `oauth_token`, exchanges the
/// verifier for an access token, and adds the [`AccessToken`] pair to the
/// context of the success handler.
pub fn callback_handler(
    config: OAuth1Config,
    cookie_config: CookieConfig,
    success: Arc<dyn LoginHandler>,
    failure: Option<Arc<dyn LoginHandler>>,
) -> Arc<dyn LoginHandler> {
    Arc::new(CallbackStage {
        config,
        cookie_config,
        success,
        failure: failure_or_default(failure),
    })
}

struct CallbackStage {
    config: OAuth1Config,
    cookie_config: CookieConfig,
    success: Arc<dyn LoginHandler>,
    failure: Arc<dyn LoginHandler>,
}

impl CallbackStage {
    async fn fail(&self, ctx: ScopedContext, req: Request, err: Error) -> Response {
        tracing::debug!(error = %err, "oauth1 callback failed");
        let ctx = with_error(&ctx, err);
        self.failure.handle(ctx, req).await
    }
}

#[async_trait::async_trait]
impl LoginHandler for CallbackStage {
    async fn handle(&self, ctx: ScopedContext, req: Request) -> Response {
        let cached = cookies::read(&req, &self.cookie_config.name)
            .as_deref()
            .and_then(decode_pair);
        let request_token = match cached {
            Some(token) => token,
            None => return self.fail(ctx, req, Error::MissingRequestToken).await,
        };

        let (token_param, verifier) = match callback_params(req.uri().query().unwrap_or("")) {
            Some(params) => params,
            None => return self.fail(ctx, req, Error::UnableToGetAccessToken).await,
        };
        if token_param != request_token.token {
            return self.fail(ctx, req, Error::UnableToGetAccessToken).await;
        }

        let http = http_client_from_context(&ctx);
        match fetch_access_token(&http, &self.config, &request_token, &verifier).await {
            Ok(access_token) => {
                let ctx = with_request_token(&ctx, request_token);
                let ctx = with_access_token(&ctx, access_token);
                self.success.handle(ctx, req).await
            }
            Err(err) => {
                tracing::warn!(error = %err, "access token exchange failed");
                self.fail(ctx, req, Error::UnableToGetAccessToken).await
            }
        }
    }
}

/// Handles direct POSTs of an already-issued token/secret pair, for "sign in
/// with" flows that skip the browser redirect. No provider round trip is
/// made; composing a provider's user-fetch stage as `success` is what
/// verifies the credentials.
pub fn token_handler(
    fields: TokenFields,
    success: Arc<dyn LoginHandler>,
    failure: Option<Arc<dyn LoginHandler>>,
) -> Arc<dyn LoginHandler> {
    Arc::new(TokenStage {
        fields,
        success,
        failure: failure_or_default(failure),
    })
}

struct TokenStage {
    fields: TokenFields,
    success: Arc<dyn LoginHandler>,
    failure: Arc<dyn LoginHandler>,
}

impl TokenStage {
    async fn fail(&self, ctx: ScopedContext, req: Request, err: Error) -> Response {
        tracing::debug!(error = %err, "token post rejected");
        let ctx = with_error(&ctx, err);
        self.failure.handle(ctx, req).await
    }
}

#[async_trait::async_trait]
impl LoginHandler for TokenStage {
    async fn handle(&self, ctx: ScopedContext, req: Request) -> Response {
        if req.method() != Method::POST {
            return self.fail(ctx, req, Error::MethodNotAllowed).await;
        }

        let (parts, body) = req.into_parts();
        let bytes = axum::body::to_bytes(body, 64 * 1024)
            .await
            .unwrap_or_default();
        let form: Vec<(String, String)> = url::form_urlencoded::parse(&bytes)
            .into_owned()
            .collect();
        let req = Request::from_parts(parts, Body::empty());

        let token = match form_field(&form, &self.fields.access_token) {
            Some(token) => token,
            None => return self.fail(ctx, req, Error::MissingToken).await,
        };
        let secret = match form_field(&form, &self.fields.access_token_secret) {
            Some(secret) => secret,
            None => return self.fail(ctx, req, Error::MissingTokenSecret).await,
        };

        let ctx = with_access_token(&ctx, AccessToken { token, secret });
        self.success.handle(ctx, req).await
    }
}

fn form_field(form: &[(String, String)], name: &str) -> Option<String> {
    form.iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
        .filter(|value| !value.is_empty())
}

fn callback_params(query: &str) -> Option<(String, String)> {
    let mut token = None;
    let mut verifier = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "oauth_token" => token = Some(value.into_owned()),
            "oauth_verifier" => verifier = Some(value.into_owned()),
            _ => {}
        }
    }
    match (token, verifier) {
        (Some(token), Some(verifier)) if !token.is_empty() && !verifier.is_empty() => {
            Some((token, verifier))
        }
        _ => None,
    }
}

/// Encodes a request token pair into a cookie value.
fn encode_pair(token: &RequestToken) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("token", &token.token)
        .append_pair("secret", &token.secret)
        .finish()
}

fn decode_pair(value: &str) -> Option<RequestToken> {
    let mut token = None;
    let mut secret = None;
    for (key, field) in url::form_urlencoded::parse(value.as_bytes()) {
        match key.as_ref() {
            "token" => token = Some(field.into_owned()),
            "secret" => secret = Some(field.into_owned()),
            _ => {}
        }
    }
    match (token, secret) {
        (Some(token), Some(secret)) if !token.is_empty() => Some(RequestToken { token, secret }),
        _ => None,
    }
}

async fn fetch_request_token(
    http: &reqwest::Client,
    config: &OAuth1Config,
) -> anyhow::Result<RequestToken> {
    let header = signature::authorization_header(
        config,
        "POST",
        &config.request_token_url,
        None,
        &[("oauth_callback", &config.callback_url)],
    );
    let response = http
        .post(&config.request_token_url)
        .header(AUTHORIZATION, header)
        .send()
        .await?;
    if !response.status().is_success() {
        anyhow::bail!("request token endpoint returned {}", response.status());
    }

    let body = response.text().await?;
    let fields: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    if form_field(&fields, "oauth_callback_confirmed").as_deref() != Some("true") {
        anyhow::bail!("provider did not confirm the callback");
    }
    match (
        form_field(&fields, "oauth_token"),
        form_field(&fields, "oauth_token_secret"),
    ) {
        (Some(token), Some(secret)) => Ok(RequestToken { token, secret }),
        _ => anyhow::bail!("request token response missing token fields"),
    }
}

async fn fetch_access_token(
    http: &reqwest::Client,
    config: &OAuth1Config,
    request_token: &RequestToken,
    verifier: &str,
) -> anyhow::Result<AccessToken> {
    let header = signature::authorization_header(
        config,
        "POST",
        &config.access_token_url,
        Some((&request_token.token, &request_token.secret)),
        &[("oauth_verifier", verifier)],
    );
    let response = http
        .post(&config.access_token_url)
        .header(AUTHORIZATION, header)
        .send()
        .await?;
    if !response.status().is_success() {
        anyhow::bail!("access token endpoint returned {}", response.status());
    }

    let body = response.text().await?;
    let fields: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    match (
        form_field(&fields, "oauth_token"),
        form_field(&fields, "oauth_token_secret"),
    ) {
        (Some(token), Some(secret)) => Ok(AccessToken { token, secret }),
        _ => anyhow::bail!("access token response missing token fields"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::testutils;
    use axum::Router;
    use axum::routing::post;
    use cookie::Cookie;
    use http::HeaderMap;
    use http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
    use std::sync::Mutex;

    fn config(base: &str) -> OAuth1Config {
        OAuth1Config {
            consumer_key: "consumer-key".to_string(),
            consumer_secret: "consumer-secret".to_string(),
            callback_url: "https://app.example/callback".to_string(),
            request_token_url: format!("{base}/request_token"),
            authorize_url: format!("{base}/authorize"),
            access_token_url: format!("{base}/access_token"),
        }
    }

    fn get(uri: &str) -> Request {
        http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_form(body: &str) -> Request {
        http::Request::builder()
            .method(Method::POST)
            .uri("/token")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn capture_access_token() -> (Arc<dyn LoginHandler>, Arc<Mutex<Option<AccessToken>>>) {
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        let handler = handler_fn(move |ctx: ScopedContext, _req| {
            let captured = captured.clone();
            async move {
                *captured.lock().unwrap() = access_token_from_context(&ctx).ok();
                "ok".into_response()
            }
        });
        (handler, seen)
    }

    #[test]
    fn request_token_pair_round_trips_through_cookie_value() {
        let token = RequestToken {
            token: "request-token".to_string(),
            secret: "secret&with=reserved".to_string(),
        };
        assert_eq!(decode_pair(&encode_pair(&token)), Some(token));
    }

    #[tokio::test]
    async fn token_handler_stores_posted_pair() {
        let (success, seen) = capture_access_token();
        let handler = token_handler(
            TokenFields::default(),
            success,
            Some(testutils::assert_failure_not_called()),
        );

        handler
            .handle(
                ScopedContext::new(),
                post_form("oauth_token=some-token&oauth_token_secret=some-secret"),
            )
            .await;

        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(AccessToken {
                token: "some-token".to_string(),
                secret: "some-secret".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn token_handler_rejects_non_post_with_405() {
        let handler = token_handler(
            TokenFields::default(),
            testutils::assert_success_not_called(),
            None,
        );

        let response = handler.handle(ScopedContext::new(), get("/token")).await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"Method not allowed\n");
    }

    #[tokio::test]
    async fn token_handler_rejects_missing_token_field() {
        let handler = token_handler(
            TokenFields::default(),
            testutils::assert_success_not_called(),
            None,
        );

        let response = handler
            .handle(
                ScopedContext::new(),
                post_form("wrong_field=some-token&oauth_token_secret=some-secret"),
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"Unable to get request Token\n");
    }

    #[tokio::test]
    async fn token_handler_rejects_missing_secret_field() {
        let (failure, captured) = testutils::capture_error();
        let handler = token_handler(
            TokenFields::default(),
            testutils::assert_success_not_called(),
            Some(failure),
        );

        handler
            .handle(ScopedContext::new(), post_form("oauth_token=some-token"))
            .await;

        assert_eq!(captured.take(), Some(Error::MissingTokenSecret));
    }

    #[tokio::test]
    async fn token_handler_treats_blank_fields_as_missing() {
        let (failure, captured) = testutils::capture_error();
        let handler = token_handler(
            TokenFields::default(),
            testutils::assert_success_not_called(),
            Some(failure),
        );

        handler
            .handle(
                ScopedContext::new(),
                post_form("oauth_token=&oauth_token_secret=s"),
            )
            .await;

        assert_eq!(captured.take(), Some(Error::MissingToken));
    }

    fn request_token_endpoint() -> Router {
        Router::new().route(
            "/request_token",
            post(|| async {
                "oauth_token=cached-token&oauth_token_secret=cached-secret&oauth_callback_confirmed=true"
            }),
        )
    }

    #[tokio::test]
    async fn login_handler_redirects_and_caches_request_token() {
        let base = testutils::serve(request_token_endpoint()).await;
        let handler = login_handler(
            config(&base),
            CookieConfig::debug("request-token"),
            Some(testutils::assert_failure_not_called()),
        );

        let response = handler.handle(ScopedContext::new(), get("/login")).await;

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers().get(LOCATION).unwrap().to_str().unwrap();
        assert_eq!(location, format!("{base}/authorize?oauth_token=cached-token"));

        let header = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        let cookie = Cookie::parse(header.to_owned()).unwrap();
        assert_eq!(cookie.name(), "request-token");
        assert_eq!(
            decode_pair(cookie.value()),
            Some(RequestToken {
                token: "cached-token".to_string(),
                secret: "cached-secret".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn login_handler_maps_request_token_failure() {
        let base = testutils::error_server(StatusCode::INTERNAL_SERVER_ERROR).await;
        let (failure, captured) = testutils::capture_error();
        let handler = login_handler(
            config(&base),
            CookieConfig::debug("request-token"),
            Some(failure),
        );

        handler.handle(ScopedContext::new(), get("/login")).await;

        assert_eq!(captured.take(), Some(Error::UnableToGetRequestToken));
    }

    #[tokio::test]
    async fn login_handler_rejects_unconfirmed_callback() {
        let router = Router::new().route(
            "/request_token",
            post(|| async { "oauth_token=t&oauth_token_secret=s&oauth_callback_confirmed=false" }),
        );
        let base = testutils::serve(router).await;
        let (failure, captured) = testutils::capture_error();
        let handler = login_handler(
            config(&base),
            CookieConfig::debug("request-token"),
            Some(failure),
        );

        handler.handle(ScopedContext::new(), get("/login")).await;

        assert_eq!(captured.take(), Some(Error::UnableToGetRequestToken));
    }

    fn callback_request(cookie_pair: &str, query: &str) -> Request {
        http::Request::builder()
            .uri(format!("/callback?{query}"))
            .header(COOKIE, format!("request-token={cookie_pair}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn callback_handler_exchanges_verifier_for_access_token() {
        let seen_auth: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let recorded = seen_auth.clone();
        let router = Router::new().route(
            "/access_token",
            post(move |headers: HeaderMap| {
                let recorded = recorded.clone();
                async move {
                    *recorded.lock().unwrap() = headers
                        .get(AUTHORIZATION)
                        .and_then(|value| value.to_str().ok())
                        .map(ToString::to_string);
                    "oauth_token=access-token&oauth_token_secret=access-secret"
                }
            }),
        );
        let base = testutils::serve(router).await;

        let (success, seen) = capture_access_token();
        let handler = callback_handler(
            config(&base),
            CookieConfig::debug("request-token"),
            success,
            Some(testutils::assert_failure_not_called()),
        );

        handler
            .handle(
                ScopedContext::new(),
                callback_request(
                    "token=cached-token&secret=cached-secret",
                    "oauth_token=cached-token&oauth_verifier=verifier-value",
                ),
            )
            .await;

        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(AccessToken {
                token: "access-token".to_string(),
                secret: "access-secret".to_string(),
            })
        );
        let authorization = seen_auth.lock().unwrap().clone().unwrap();
        assert!(authorization.contains("oauth_verifier=\"verifier-value\""));
        assert!(authorization.contains("oauth_token=\"cached-token\""));
    }

    #[tokio::test]
    async fn callback_handler_requires_cached_request_token() {
        let (failure, captured) = testutils::capture_error();
        let handler = callback_handler(
            config("http://127.0.0.1:9"),
            CookieConfig::debug("request-token"),
            testutils::assert_success_not_called(),
            Some(failure),
        );

        handler
            .handle(
                ScopedContext::new(),
                get("/callback?oauth_token=t&oauth_verifier=v"),
            )
            .await;

        assert_eq!(captured.take(), Some(Error::MissingRequestToken));
    }

    #[tokio::test]
    async fn callback_handler_rejects_token_mismatch() {
        let (failure, captured) = testutils::capture_error();
        let handler = callback_handler(
            config("http://127.0.0.1:9"),
            CookieConfig::debug("request-token"),
            testutils::assert_success_not_called(),
            Some(failure),
        );

        handler
            .handle(
                ScopedContext::new(),
                callback_request(
                    "token=cached-token&secret=cached-secret",
                    "oauth_token=other-token&oauth_verifier=v",
                ),
            )
            .await;

        assert_eq!(captured.take(), Some(Error::UnableToGetAccessToken));
    }

    #[tokio::test]
    async fn callback_handler_requires_verifier() {
        let (failure, captured) = testutils::capture_error();
        let handler = callback_handler(
            config("http://127.0.0.1:9"),
            CookieConfig::debug("request-token"),
            testutils::assert_success_not_called(),
            Some(failure),
        );

        handler
            .handle(
                ScopedContext::new(),
                callback_request(
                    "token=cached-token&secret=cached-secret",
                    "oauth_token=cached-token",
                ),
            )
            .await;

        assert_eq!(captured.take(), Some(Error::UnableToGetAccessToken));
    }
}
