//! Token acquisition strategies for clients whose credentials expire.

use crate::{client::Client, error::Error};
use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    future::Future,
    pin::Pin,
};

/// Future returned by [`TokenStrategy::acquire`].
pub type AcquireTokenFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, Error>> + Send + 'a>>;

/// Scheme of an authorization token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum TokenType {
    /// An OAuth2 bearer token.
    Bearer,
    /// A bot token.
    Bot,
}

impl TokenType {
    /// Prefix the authorization header value starts with.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Bearer => "Bearer",
            Self::Bot => "Bot",
        }
    }
}

impl Display for TokenType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.prefix())
    }
}

/// Source of authorization tokens that can expire and be renewed.
///
/// When a client is configured with a strategy instead of a fixed token, it
/// asks the strategy for the authorization value of every request, and on an
/// unauthorized response it invalidates the used token and retries once with
/// a fresh one.
///
/// Implementations are expected to cache the token until it expires, and to
/// cache a failed acquisition as well: while the underlying token endpoint
/// is broken, later calls should surface a fresh copy of the stored failure
/// instead of hammering the endpoint, without accumulating source chains.
pub trait TokenStrategy: Debug + Send + Sync {
    /// Type of token the strategy produces.
    fn token_type(&self) -> TokenType;

    /// Acquire a scheme-prefixed authorization value, such as `Bearer abc`.
    ///
    /// `client` may be used to perform the token request itself.
    fn acquire<'a>(&'a self, client: &'a Client) -> AcquireTokenFuture<'a>;

    /// Forget `token` if it is the currently cached one.
    ///
    /// Invalidating a token that is not the cached one is a no-op, so the
    /// call is idempotent and safe under concurrent re-authentication.
    fn invalidate(&self, token: &str);
}
