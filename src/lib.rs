//! Composable social-login handler chains for axum.
//!
//! Implements the OAuth1 and OAuth2 three-legged authorization flows as
//! small request handler stages — CSRF state, login redirect, callback token
//! exchange, provider user fetch — that compose through success/failure
//! continuations and pass values down a request-scoped context. Provider
//! adapters for GitHub, Facebook, Bitbucket (OAuth2), and Twitter (OAuth1)
//! wire the generic stages to each vendor's endpoints.

pub mod bitbucket;
pub mod config;
pub mod context;
mod cookies;
pub mod errors;
pub mod facebook;
pub mod github;
pub mod handler;
pub mod oauth1;
pub mod oauth2;
pub mod testutils;
pub mod twitter;

pub use config::{CookieConfig, OAuth1Config, OAuth2Config, TokenFields};
pub use context::{ScopedContext, error_from_context, with_error, with_http_client};
pub use errors::Error;
pub use handler::{DefaultFailureHandler, LoginHandler, handler_fn, into_route};
