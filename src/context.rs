//! Request-scoped context passed between handler stages.
//!
//! The context is an append-only chain of immutable frames. Adding a value
//! produces a new context whose head frame points at the previous chain, so
//! earlier stages never observe values added by later ones and cloning is a
//! single `Arc` bump. Lookup walks the chain newest to oldest, which lets a
//! rebinding shadow an older value without mutating it.
//!
//! Values are keyed by their Rust type, so each concern namespaces its own
//! entries with a private wrapper type: the OAuth2 state lives in
//! [`crate::oauth2`], token pairs in [`crate::oauth1`], provider users in
//! their provider modules, and the last error here.

use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::errors::Error;

/// Immutable key/value carrier owned by a single in-flight request.
///
/// Created by [`crate::handler::into_route`] (or directly in tests) at the
/// start of a request chain and dropped when the chain's response is built.
/// Never retained across requests.
#[derive(Clone, Default)]
pub struct ScopedContext {
    head: Option<Arc<Frame>>,
}

struct Frame {
    parent: Option<Arc<Frame>>,
    key: TypeId,
    value: Arc<dyn Any + Send + Sync>,
}

impl ScopedContext {
    /// An empty context with no bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new context extended with `value`, keyed by its type.
    pub(crate) fn with_value<T: Send + Sync + 'static>(&self, value: T) -> Self {
        ScopedContext {
            head: Some(Arc::new(Frame {
                parent: self.head.clone(),
                key: TypeId::of::<T>(),
                value: Arc::new(value),
            })),
        }
    }

    /// Looks up the newest binding of type `T`, walking the chain from the
    /// most recent frame backwards.
    pub(crate) fn value_of<T: Send + Sync + 'static>(&self) -> Option<&T> {
        let mut frame = self.head.as_deref();
        while let Some(current) = frame {
            if current.key == TypeId::of::<T>() {
                return current.value.downcast_ref::<T>();
            }
            frame = current.parent.as_deref();
        }
        None
    }
}

struct LastError(Error);

/// Returns a new context carrying `err` as the last error.
pub fn with_error(ctx: &ScopedContext, err: Error) -> ScopedContext {
    ctx.with_value(LastError(err))
}

/// The most recently attached error, if any stage has failed.
pub fn error_from_context(ctx: &ScopedContext) -> Option<&Error> {
    ctx.value_of::<LastError>().map(|last| &last.0)
}

struct HttpClient(reqwest::Client);

/// Returns a new context carrying `client` for outbound provider calls.
///
/// Stages that talk to a provider (token exchange, user fetch) use this
/// client when present, so callers control timeouts and TLS configuration.
pub fn with_http_client(ctx: &ScopedContext, client: reqwest::Client) -> ScopedContext {
    ctx.with_value(HttpClient(client))
}

/// The injected HTTP client, or a default client when none was injected.
pub(crate) fn http_client_from_context(ctx: &ScopedContext) -> reqwest::Client {
    ctx.value_of::<HttpClient>()
        .map(|wrapped| wrapped.0.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_has_no_bindings() {
        let ctx = ScopedContext::new();
        assert!(ctx.value_of::<String>().is_none());
        assert!(error_from_context(&ctx).is_none());
    }

    #[test]
    fn lookup_returns_newest_binding() {
        let ctx = ScopedContext::new();
        let ctx = ctx.with_value("older".to_string());
        let shadowed = ctx.with_value("newer".to_string());

        assert_eq!(shadowed.value_of::<String>().unwrap(), "newer");
        // The original chain is untouched by the rebinding.
        assert_eq!(ctx.value_of::<String>().unwrap(), "older");
    }

    #[test]
    fn bindings_of_distinct_types_coexist() {
        let ctx = ScopedContext::new()
            .with_value(42u32)
            .with_value("state".to_string());

        assert_eq!(*ctx.value_of::<u32>().unwrap(), 42);
        assert_eq!(ctx.value_of::<String>().unwrap(), "state");
    }

    #[test]
    fn error_round_trips() {
        let ctx = with_error(&ScopedContext::new(), Error::MissingState);
        assert_eq!(error_from_context(&ctx), Some(&Error::MissingState));
    }

    #[test]
    fn latest_error_wins() {
        let ctx = with_error(&ScopedContext::new(), Error::MissingState);
        let ctx = with_error(&ctx, Error::InvalidState);
        assert_eq!(error_from_context(&ctx), Some(&Error::InvalidState));
    }
}
