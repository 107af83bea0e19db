//! The handler composition protocol every stage is built on.
//!
//! A [`LoginHandler`] receives the request-scoped context and the request and
//! produces the response. Stage constructors take success and failure
//! continuations of the same shape and return a single handler; each stage
//! guarantees that exactly one of the two continuations runs, exactly once,
//! per request.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use http::StatusCode;

use crate::context::{ScopedContext, error_from_context};
use crate::errors::Error;

/// A single stage in a login handler chain.
#[async_trait]
pub trait LoginHandler: Send + Sync {
    async fn handle(&self, ctx: ScopedContext, req: Request) -> Response;
}

/// Adapter turning an async closure into a [`LoginHandler`].
///
/// Success and failure continuations in call sites and tests are usually
/// closures lifted with [`handler_fn`] rather than named types.
pub struct HandlerFn<F>(F);

#[async_trait]
impl<F, Fut> LoginHandler for HandlerFn<F>
where
    F: Fn(ScopedContext, Request) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Response> + Send,
{
    async fn handle(&self, ctx: ScopedContext, req: Request) -> Response {
        (self.0)(ctx, req).await
    }
}

/// Lifts `f` into a [`LoginHandler`] continuation.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn LoginHandler>
where
    F: Fn(ScopedContext, Request) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Response> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Failure handler used when a stage constructor receives `None`.
///
/// Writes the last error's message as a plain-text body followed by a
/// newline. `MethodNotAllowed` renders as 405, every other kind as 400.
pub struct DefaultFailureHandler;

#[async_trait]
impl LoginHandler for DefaultFailureHandler {
    async fn handle(&self, ctx: ScopedContext, _req: Request) -> Response {
        let err = error_from_context(&ctx);
        let status = match err {
            Some(Error::MethodNotAllowed) => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::BAD_REQUEST,
        };
        let message = err.map(ToString::to_string).unwrap_or_default();
        (status, format!("{message}\n")).into_response()
    }
}

/// Resolves an optional failure continuation to the default handler.
pub(crate) fn failure_or_default(failure: Option<Arc<dyn LoginHandler>>) -> Arc<dyn LoginHandler> {
    failure.unwrap_or_else(|| Arc::new(DefaultFailureHandler))
}

/// Bridges a composed stage into an axum [`MethodRouter`].
///
/// A fresh [`ScopedContext`] is created per request, so nothing leaks between
/// requests; cookies are the only state that crosses request boundaries.
pub fn into_route(handler: Arc<dyn LoginHandler>) -> MethodRouter {
    axum::routing::any(move |req: Request| {
        let handler = handler.clone();
        async move { handler.handle(ScopedContext::new(), req).await }
    })
}
