//! Provider-agnostic OAuth2 authorization-code flow stages.
//!
//! Three composable stages implement the three-legged flow: the state stage
//! issues and recovers the CSRF state cookie, the login stage redirects to
//! the provider's authorize endpoint, and the callback stage verifies the
//! returned state and exchanges the authorization code for a [`Token`].
//! Provider adapters wrap the callback stage's success continuation with
//! their user-fetch stage.

use std::sync::Arc;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use base64::prelude::*;
use chrono::{DateTime, Utc};
use http::StatusCode;
use http::header::{ACCEPT, LOCATION};
use rand::Rng;
use serde::Deserialize;

use crate::config::{CookieConfig, OAuth2Config};
use crate::context::{ScopedContext, http_client_from_context, with_error};
use crate::cookies;
use crate::errors::Error;
use crate::handler::{LoginHandler, failure_or_default};

/// OAuth2 access token obtained from the provider's token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    /// Absolute expiry computed from the token response's `expires_in`.
    pub expiry: Option<DateTime<Utc>>,
}

struct StateValue(String);

/// Returns a new context carrying the CSRF state value.
pub fn with_state(ctx: &ScopedContext, state: impl Into<String>) -> ScopedContext {
    ctx.with_value(StateValue(state.into()))
}

/// The CSRF state value set by the state stage.
pub fn state_from_context(ctx: &ScopedContext) -> Result<String, Error> {
    ctx.value_of::<StateValue>()
        .map(|value| value.0.clone())
        .ok_or(Error::MissingState)
}

/// Returns a new context carrying the OAuth2 access token.
pub fn with_token(ctx: &ScopedContext, token: Token) -> ScopedContext {
    ctx.with_value(token)
}

/// The OAuth2 access token set by the callback stage.
pub fn token_from_context(ctx: &ScopedContext) -> Result<Token, Error> {
    ctx.value_of::<Token>().cloned().ok_or(Error::MissingToken)
}

/// Generates a non-guessable CSRF state token: 32 random bytes, URL-safe
/// base64 without padding.
fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Checks for a state cookie. If found, its value is read and added to the
/// context. Otherwise a non-guessable value is added to the context and to a
/// short-lived state cookie issued to the requester.
///
/// Implements RFC 6749 10.12 CSRF protection. Callers issuing state some
/// other way can substitute any handler that seeds the context with
/// [`with_state`], which the login and callback stages require.
pub fn state_handler(config: CookieConfig, success: Arc<dyn LoginHandler>) -> Arc<dyn LoginHandler> {
    Arc::new(StateStage { config, success })
}

struct StateStage {
    config: CookieConfig,
    success: Arc<dyn LoginHandler>,
}

#[async_trait::async_trait]
impl LoginHandler for StateStage {
    async fn handle(&self, ctx: ScopedContext, req: Request) -> Response {
        if let Some(state) = cookies::read(&req, &self.config.name) {
            let ctx = with_state(&ctx, state);
            return self.success.handle(ctx, req).await;
        }

        let state = generate_state();
        tracing::debug!(cookie = %self.config.name, "issuing new state cookie");
        let ctx = with_state(&ctx, state.clone());
        let mut response = self.success.handle(ctx, req).await;
        cookies::append(&mut response, &self.config.bake(state));
        response
    }
}

/// Redirects login requests to the provider's authorization endpoint with
/// the context's state value embedded. The state must have been set by a
/// preceding [`state_handler`]; otherwise the failure handler runs with
/// [`Error::MissingState`].
pub fn login_handler(
    config: OAuth2Config,
    failure: Option<Arc<dyn LoginHandler>>,
) -> Arc<dyn LoginHandler> {
    Arc::new(LoginStage {
        config,
        failure: failure_or_default(failure),
    })
}

struct LoginStage {
    config: OAuth2Config,
    failure: Arc<dyn LoginHandler>,
}

#[async_trait::async_trait]
impl LoginHandler for LoginStage {
    async fn handle(&self, ctx: ScopedContext, req: Request) -> Response {
        match state_from_context(&ctx) {
            Ok(state) => {
                let url = self.config.authorization_url(&state);
                (StatusCode::FOUND, [(LOCATION, url.to_string())]).into_response()
            }
            Err(err) => {
                tracing::debug!(error = %err, "oauth2 login rejected");
                let ctx = with_error(&ctx, err);
                self.failure.handle(ctx, req).await
            }
        }
    }
}

/// Handles the provider's redirection URI request: verifies the CSRF state,
/// surfaces provider-reported errors, exchanges the authorization code for
/// an access token, and adds the [`Token`] to the context of the success
/// handler. Provider adapters wrap `success` with their user-fetch stage.
pub fn callback_handler(
    config: OAuth2Config,
    success: Arc<dyn LoginHandler>,
    failure: Option<Arc<dyn LoginHandler>>,
) -> Arc<dyn LoginHandler> {
    Arc::new(CallbackStage {
        config,
        success,
        failure: failure_or_default(failure),
    })
}

struct CallbackStage {
    config: OAuth2Config,
    success: Arc<dyn LoginHandler>,
    failure: Arc<dyn LoginHandler>,
}

impl CallbackStage {
    async fn fail(&self, ctx: ScopedContext, req: Request, err: Error) -> Response {
        tracing::debug!(error = %err, "oauth2 callback failed");
        let ctx = with_error(&ctx, err);
        self.failure.handle(ctx, req).await
    }
}

#[async_trait::async_trait]
impl LoginHandler for CallbackStage {
    async fn handle(&self, ctx: ScopedContext, req: Request) -> Response {
        let params = CallbackParams::from_query(req.uri().query().unwrap_or(""));

        let owner_state = match state_from_context(&ctx) {
            Ok(state) => state,
            Err(err) => return self.fail(ctx, req, err).await,
        };
        if params.state.as_deref() != Some(owner_state.as_str()) {
            return self.fail(ctx, req, Error::InvalidState).await;
        }

        // The provider may redirect back with an error instead of a code.
        if let Some(code) = params.error {
            let message = params.error_description.unwrap_or(code);
            return self.fail(ctx, req, Error::ProviderError(message)).await;
        }

        let auth_code = match params.code {
            Some(code) if !code.is_empty() => code,
            _ => return self.fail(ctx, req, Error::UnableToGetAccessToken).await,
        };

        let http = http_client_from_context(&ctx);
        match exchange_code(&http, &self.config, &auth_code).await {
            Ok(token) => {
                let ctx = with_token(&ctx, token);
                self.success.handle(ctx, req).await
            }
            Err(err) => self.fail(ctx, req, err).await,
        }
    }
}

#[derive(Debug, Default)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    fn from_query(query: &str) -> Self {
        let mut params = CallbackParams::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                "error_description" => params.error_description = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

#[derive(Deserialize)]
struct TokenPayload {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Exchanges an authorization code at the provider's token endpoint.
async fn exchange_code(
    http: &reqwest::Client,
    config: &OAuth2Config,
    code: &str,
) -> Result<Token, Error> {
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("redirect_uri", config.redirect_url.as_str()),
    ];

    let response = http
        .post(&config.token_url)
        .header(ACCEPT, "application/json")
        .form(&params)
        .send()
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, "token endpoint unreachable");
            Error::UnableToGetAccessToken
        })?;

    if !response.status().is_success() {
        tracing::warn!(status = %response.status(), "token endpoint rejected code exchange");
        return Err(Error::UnableToGetAccessToken);
    }

    let payload: TokenPayload = response.json().await.map_err(|err| {
        tracing::warn!(error = %err, "undecodable token endpoint response");
        Error::UnableToGetAccessToken
    })?;
    if payload.access_token.is_empty() {
        return Err(Error::UnableToGetAccessToken);
    }

    Ok(Token {
        access_token: payload.access_token,
        token_type: payload.token_type,
        refresh_token: payload.refresh_token,
        expiry: payload
            .expires_in
            .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds)),
    })
}
