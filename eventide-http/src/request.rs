//! Everything needed to issue one call: route, body, reason, authorization.

use crate::transport::GenericError;
use eventide_http_ratelimiting::CompiledRoute;
use std::fmt::Debug;

/// Deferred construction of a non-JSON request body.
///
/// The builder is invoked inside the rate limit acquisition scope,
/// immediately before the request is sent, so single-use inputs such as
/// attachment streams are not consumed by an attempt that then waits out a
/// rate limit. It may be invoked again for each retry.
pub trait BodyBuilder: Debug + Send {
    /// Assemble the body, returning its content type and raw bytes.
    ///
    /// # Errors
    ///
    /// Implementations fail when their underlying inputs cannot be read.
    fn build(&mut self) -> Result<(String, Vec<u8>), GenericError>;
}

/// Where the authorization for a request comes from.
#[derive(Debug)]
pub(crate) enum RequestAuth {
    /// Use the client's configured token or token strategy.
    Inherit,
    /// Send no authorization.
    Skip,
    /// Use this value verbatim.
    Token(String),
}

/// A request ready to be handed to [`Client::request`].
///
/// [`Client::request`]: crate::client::Client::request
#[derive(Debug)]
pub struct Request {
    pub(crate) auth: RequestAuth,
    pub(crate) form: Option<Box<dyn BodyBuilder>>,
    pub(crate) json: Option<Vec<u8>>,
    pub(crate) reason: Option<String>,
    pub(crate) route: CompiledRoute,
}

impl Request {
    /// Start building a request for the given route.
    pub fn builder(route: CompiledRoute) -> RequestBuilder {
        RequestBuilder(Self {
            auth: RequestAuth::Inherit,
            form: None,
            json: None,
            reason: None,
            route,
        })
    }

    /// The route the request is for.
    pub const fn route(&self) -> &CompiledRoute {
        &self.route
    }
}

/// Builder for a [`Request`].
#[derive(Debug)]
pub struct RequestBuilder(Request);

impl RequestBuilder {
    /// Use this value verbatim as the authorization header, instead of the
    /// client's configured token or strategy.
    pub fn auth(mut self, token: impl Into<String>) -> Self {
        self.0.auth = RequestAuth::Token(token.into());

        self
    }

    /// Attach a deferred body, such as a multipart form with attachments.
    pub fn body(mut self, builder: Box<dyn BodyBuilder>) -> Self {
        self.0.form = Some(builder);

        self
    }

    /// Attach pre-serialized JSON as the request body.
    pub fn json(mut self, body: Vec<u8>) -> Self {
        self.0.json = Some(body);

        self
    }

    /// Attach an audit log reason to the request.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.0.reason = Some(reason.into());

        self
    }

    /// Send the request without any authorization.
    pub fn unauthenticated(mut self) -> Self {
        self.0.auth = RequestAuth::Skip;

        self
    }

    /// Finish building the request.
    #[allow(clippy::missing_const_for_fn)]
    pub fn build(self) -> Request {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::{Request, RequestBuilder};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Request: Debug, Send);
    assert_impl_all!(RequestBuilder: Debug, Send);
}
