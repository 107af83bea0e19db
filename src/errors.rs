//! Login flow error kinds shared by every handler stage.
//!
//! The variant, not the message, is the contract: failure handlers and tests
//! compare errors with `==` to decide what went wrong. Exactly one error is
//! attached to the scoped context per failed request.

use thiserror::Error;

/// Errors produced by the OAuth1/OAuth2 handler stages and provider adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The scoped context holds no CSRF state value (state stage not run).
    #[error("oauth2: context missing state value")]
    MissingState,

    /// The callback state parameter does not match the state cookie value.
    #[error("oauth2: invalid OAuth2 state parameter")]
    InvalidState,

    /// The OAuth1 request token cached at login time could not be recovered.
    #[error("oauth1: missing request token")]
    MissingRequestToken,

    /// No access token is available, either in the scoped context or in the
    /// posted token field.
    #[error("Unable to get request Token")]
    MissingToken,

    /// The posted token secret field is missing or blank.
    #[error("Unable to get request Token Secret")]
    MissingTokenSecret,

    /// The provider's request-token endpoint could not issue a token.
    #[error("oauth1: unable to get request token")]
    UnableToGetRequestToken,

    /// The provider's token endpoint rejected the exchange or was unreachable.
    #[error("unable to get access token")]
    UnableToGetAccessToken,

    /// The provider redirected back with an error instead of a code. Carries
    /// the provider's own message verbatim.
    #[error("{0}")]
    ProviderError(String),

    /// The POST-only token endpoint was called with another method.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// The GitHub user endpoint failed or returned an invalid user payload.
    #[error("github: unable to get GitHub user")]
    UnableToGetGithubUser,

    /// The Facebook user endpoint failed or returned an invalid user payload.
    #[error("facebook: unable to get Facebook user")]
    UnableToGetFacebookUser,

    /// The Bitbucket user endpoint failed or returned an invalid user payload.
    #[error("bitbucket: unable to get Bitbucket user")]
    UnableToGetBitbucketUser,

    /// The Twitter user endpoint failed or returned an invalid user payload.
    #[error("twitter: unable to get Twitter user")]
    UnableToGetTwitterUser,
}
