//! Utilities for writing tests against handler chains.
//!
//! Mirrors the shape tests take throughout the crate: a stage under test is
//! given continuations that must or must not run, and mock provider
//! endpoints are plain axum routers served on an ephemeral local port.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::response::IntoResponse;
use http::StatusCode;

use crate::context::{ScopedContext, error_from_context};
use crate::errors::Error;
use crate::handler::{LoginHandler, handler_fn};

/// A success handler that panics if called.
pub fn assert_success_not_called() -> Arc<dyn LoginHandler> {
    handler_fn(|_ctx, _req| async { panic!("unexpected call to success handler") })
}

/// A failure handler that panics if called, naming the context error.
pub fn assert_failure_not_called() -> Arc<dyn LoginHandler> {
    handler_fn(|ctx: ScopedContext, _req| async move {
        panic!(
            "unexpected call to failure handler: {:?}",
            error_from_context(&ctx)
        )
    })
}

/// Invocation count observed by a [`counting_handler`].
#[derive(Clone)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// A handler that counts its invocations and responds with `body`.
pub fn counting_handler(body: &'static str) -> (Arc<dyn LoginHandler>, Calls) {
    let calls = Calls(Arc::new(AtomicUsize::new(0)));
    let counter = calls.clone();
    let handler = handler_fn(move |_ctx, _req| {
        counter.0.fetch_add(1, Ordering::SeqCst);
        async move { body.into_response() }
    });
    (handler, calls)
}

/// Error observed by a [`capture_error`] failure handler.
#[derive(Clone)]
pub struct CapturedError(Arc<Mutex<Option<Error>>>);

impl CapturedError {
    pub fn take(&self) -> Option<Error> {
        self.0.lock().unwrap().take()
    }
}

/// A failure handler that records the context error and responds 400.
pub fn capture_error() -> (Arc<dyn LoginHandler>, CapturedError) {
    let captured = CapturedError(Arc::new(Mutex::new(None)));
    let slot = captured.clone();
    let handler = handler_fn(move |ctx: ScopedContext, _req| {
        let slot = slot.clone();
        async move {
            *slot.0.lock().unwrap() = error_from_context(&ctx).cloned();
            StatusCode::BAD_REQUEST.into_response()
        }
    });
    (handler, captured)
}

/// Serves `router` on an ephemeral local port, returning its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral test port");
    let addr = listener.local_addr().expect("test listener address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve test router");
    });
    format!("http://{addr}")
}

/// Serves a mock provider whose every route answers with `status`.
pub async fn error_server(status: StatusCode) -> String {
    serve(Router::new().fallback(move || async move { (status, "provider error") })).await
}
