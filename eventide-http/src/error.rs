use eventide_http_ratelimiting::{RatelimitError, RatelimitErrorType};
use hyper::{header::HeaderMap, StatusCode};
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    result::Result as StdResult,
    time::Duration,
};

pub type Result<T, E = Error> = StdResult<T, E>;

/// Failure while performing a request.
#[derive(Debug)]
pub struct Error {
    pub(crate) source: Option<Box<dyn StdError + Send + Sync>>,
    pub(crate) kind: ErrorType,
}

impl Error {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ErrorType, Option<Box<dyn StdError + Send + Sync>>) {
        (self.kind, self.source)
    }

    /// Create an error for a failed token acquisition.
    ///
    /// Meant for [`TokenStrategy`] implementations whose token request did
    /// not go through the client's own request machinery.
    ///
    /// [`TokenStrategy`]: crate::strategy::TokenStrategy
    pub fn token_acquisition(source: Box<dyn StdError + Send + Sync>) -> Self {
        Self {
            kind: ErrorType::TokenAcquisition,
            source: Some(source),
        }
    }

    /// Surface a rate limiter failure under the matching request error type.
    pub(crate) fn from_ratelimit(source: RatelimitError) -> Self {
        let kind = match source.kind() {
            RatelimitErrorType::Cancelled => ErrorType::RequestCanceled,
            RatelimitErrorType::RateLimitTooLong {
                global,
                retry_after,
                ..
            } => ErrorType::RatelimitTooLong {
                global: *global,
                retry_after: *retry_after,
            },
            _ => ErrorType::Ratelimiting,
        };

        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::BuildingRequest => f.write_str("failed to build the request"),
            ErrorType::ChunkingResponse => f.write_str("chunking the response failed"),
            ErrorType::CreatingHeader { name, .. } => {
                write!(f, "parsing the value for header {} failed", name)
            }
            ErrorType::Parsing { body, .. } => {
                write!(f, "response body couldn't be deserialized: {:?}", body)
            }
            ErrorType::Protocol { url, violation } => {
                write!(f, "response from {} violated expectations: {}", url, violation)
            }
            ErrorType::RatelimitTooLong {
                global,
                retry_after,
            } => {
                f.write_str("refusing to wait out a ")?;

                if *global {
                    f.write_str("global ")?;
                }

                write!(f, "rate limit of {}s", retry_after.as_secs_f64())
            }
            ErrorType::Ratelimiting => f.write_str("rate limiting failure"),
            ErrorType::RequestCanceled => {
                f.write_str("request was canceled either before or while being sent")
            }
            ErrorType::RequestError => f.write_str("sending the request failed"),
            ErrorType::RequestTimedOut => f.write_str("request timed out"),
            ErrorType::Response { status, url, .. } => {
                write!(f, "response from {} has status code {}", url, status)
            }
            ErrorType::TokenAcquisition => f.write_str("acquiring a token failed"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Type of [`Error`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// Assembling the HTTP request failed.
    BuildingRequest,
    /// Reading the response body failed.
    ChunkingResponse,
    /// A header value could not be constructed.
    CreatingHeader {
        /// Name of the header.
        name: String,
    },
    /// The response body could not be deserialized.
    Parsing {
        /// Raw body of the response.
        body: Vec<u8>,
    },
    /// The response violated protocol expectations.
    Protocol {
        /// URL of the request.
        url: String,
        /// The expectation that was violated.
        violation: ProtocolViolation,
    },
    /// A rate limit is longer than the configured maximum wait.
    ///
    /// The source error carries the route, ceiling, and bucket details.
    RatelimitTooLong {
        /// Whether the cause is the global rate limit.
        global: bool,
        /// How long the API asked to wait.
        retry_after: Duration,
    },
    /// Interacting with the rate limiter failed.
    Ratelimiting,
    /// The request was canceled while queued on a rate limiter.
    RequestCanceled,
    /// Sending the request failed after exhausting retries.
    RequestError,
    /// The request timed out after exhausting retries.
    RequestTimedOut,
    /// The response status was not a success and was not recovered from.
    Response {
        /// Raw body of the response.
        body: Vec<u8>,
        /// Headers of the response.
        headers: HeaderMap,
        /// Status code of the response.
        status: StatusCode,
        /// URL of the request.
        url: String,
    },
    /// Acquiring a token from the configured strategy failed.
    TokenAcquisition,
}

/// A protocol expectation a response violated.
#[derive(Debug)]
#[non_exhaustive]
pub enum ProtocolViolation {
    /// A 429 response carried no usable `retry_after` field.
    MissingRetryAfter,
    /// A response expected to be JSON carried another content type.
    NotJson {
        /// Content type of the response, if any.
        content_type: Option<String>,
    },
}

impl Display for ProtocolViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::MissingRetryAfter => f.write_str("429 response without a retry_after"),
            Self::NotJson { content_type } => match content_type {
                Some(content_type) => {
                    write!(f, "expected JSON, got content type '{}'", content_type)
                }
                None => f.write_str("expected JSON, got no content type"),
            },
        }
    }
}
