//! Low-level HTTP dispatch, injectable for testing and proxying.

use hyper::{Body, Request, Response};
use std::{error::Error as StdError, fmt::Debug, future::Future, pin::Pin};

/// A generic boxed error.
pub type GenericError = Box<dyn StdError + Send + Sync>;

/// Future returned by [`Transport::send`].
pub type SendFuture =
    Pin<Box<dyn Future<Output = Result<Response<Body>, GenericError>> + Send + 'static>>;

/// Performs the actual I/O for the client's requests.
///
/// The client drives everything up to and including rate limit coordination
/// itself and delegates only the exchange of one request for one response to
/// the transport. [`HyperTransport`] is the default implementation; tests
/// substitute scripted ones.
///
/// An error returned by [`send`] is treated as a connection failure and
/// retried with backoff, so transports should only fail for transient,
/// connection-level reasons.
///
/// [`send`]: Self::send
pub trait Transport: Debug + Send + Sync {
    /// Send a request and wait for its response.
    fn send(&self, request: Request<Body>) -> SendFuture;
}

/// [`Transport`] backed by a shared [`hyper`] client.
#[derive(Debug)]
pub struct HyperTransport {
    http: hyper::Client<crate::client::connector::Connector>,
}

impl HyperTransport {
    /// Create a new transport with its own connection pool.
    pub fn new() -> Self {
        Self {
            http: hyper::client::Builder::default().build(crate::client::connector::create()),
        }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: Request<Body>) -> SendFuture {
        let fut = self.http.request(request);

        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}
