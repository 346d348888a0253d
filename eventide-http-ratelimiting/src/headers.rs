//! Parse typed rate limit headers from a response.
//!
//! Every response's headers are fed through [`RatelimitHeaders::from_pairs`]
//! so the [`BucketManager`] can be kept in sync with the state the API
//! advertises.
//!
//! [`BucketManager`]: super::BucketManager

use std::{
    error::Error,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    str::{self, Utf8Error},
};

/// A header failed to be parsed.
#[derive(Debug)]
pub struct HeaderParsingError {
    pub(super) source: Option<Box<dyn Error + Send + Sync>>,
    pub(super) kind: HeaderParsingErrorType,
}

impl HeaderParsingError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &HeaderParsingErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn Error + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (HeaderParsingErrorType, Option<Box<dyn Error + Send + Sync>>) {
        (self.kind, self.source)
    }

    pub(super) fn missing(name: HeaderName) -> Self {
        Self {
            kind: HeaderParsingErrorType::Missing { name },
            source: None,
        }
    }

    pub(super) fn not_utf8(name: HeaderName, value: Vec<u8>, source: Utf8Error) -> Self {
        Self {
            kind: HeaderParsingErrorType::NotUtf8 { name, value },
            source: Some(Box::new(source)),
        }
    }
}

impl Display for HeaderParsingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            HeaderParsingErrorType::Missing { name } => {
                f.write_str("at least one header, '")?;
                f.write_str(name.name())?;

                f.write_str("', is missing")
            }
            HeaderParsingErrorType::NotUtf8 { name, value } => {
                f.write_str("header '")?;
                f.write_str(name.name())?;
                f.write_str("' contains invalid UTF-8: ")?;

                Debug::fmt(value, f)
            }
            HeaderParsingErrorType::Parsing { kind, name, value } => {
                f.write_str("header '")?;
                f.write_str(name.name())?;
                f.write_str("' can not be parsed as a ")?;
                f.write_str(kind.name())?;
                f.write_str(": '")?;
                f.write_str(value)?;

                f.write_str("'")
            }
        }
    }
}

impl Error for HeaderParsingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`HeaderParsingError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum HeaderParsingErrorType {
    /// Expected header is missing.
    Missing {
        /// Name of the header that should be present in the list.
        name: HeaderName,
    },
    /// Header value is not UTF-8 valid.
    NotUtf8 {
        /// Name of the header.
        name: HeaderName,
        /// Value of the header.
        value: Vec<u8>,
    },
    /// Header value is not of the expected type.
    Parsing {
        /// Type of header value expected.
        kind: HeaderType,
        /// Name of the header.
        name: HeaderName,
        /// Value of the header.
        value: String,
    },
}

/// Typed name of a rate limit header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderName {
    /// Hash identifying the bucket on the server side.
    Bucket,
    /// Maximum requests allotted in the bucket.
    Limit,
    /// Remaining requests allotted in the current window.
    Remaining,
    /// When the bucket resets, in seconds since the Unix epoch.
    Reset,
    /// How long until the bucket resets, in seconds.
    ResetAfter,
    /// Scope the rate limit applies to.
    Scope,
}

impl HeaderName {
    /// Lowercased name for the bucket header.
    pub const BUCKET: &'static str = "x-ratelimit-bucket";

    /// Lowercased name for the limit header.
    pub const LIMIT: &'static str = "x-ratelimit-limit";

    /// Lowercased name for the remaining header.
    pub const REMAINING: &'static str = "x-ratelimit-remaining";

    /// Lowercased name for the reset header.
    pub const RESET: &'static str = "x-ratelimit-reset";

    /// Lowercased name for the reset-after header.
    pub const RESET_AFTER: &'static str = "x-ratelimit-reset-after";

    /// Lowercased name for the scope header.
    pub const SCOPE: &'static str = "x-ratelimit-scope";

    /// Lowercased name of the header.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bucket => Self::BUCKET,
            Self::Limit => Self::LIMIT,
            Self::Remaining => Self::REMAINING,
            Self::Reset => Self::RESET,
            Self::ResetAfter => Self::RESET_AFTER,
            Self::Scope => Self::SCOPE,
        }
    }
}

impl Display for HeaderName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Expected type of a header value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderType {
    /// Type of header value is a float.
    Float,
    /// Type of header value is an integer.
    Integer,
    /// Type of header value is a string.
    String,
}

impl HeaderType {
    /// Name of the type of header.
    const fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Integer => "integer",
            Self::String => "string",
        }
    }
}

impl Display for HeaderType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Scope a rate limit applies to.
///
/// Values the API has not documented are treated as the default,
/// [`Route`].
///
/// [`Route`]: Self::Route
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum RatelimitScope {
    /// Every bucket in the process, regardless of route.
    Global,
    /// The bucket of the route that was called.
    Route,
    /// A resource shared between multiple consumers.
    Shared,
    /// All traffic authenticated with the same user's token.
    User,
}

impl RatelimitScope {
    /// Name of the scope, as sent in the header.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Route => "route",
            Self::Shared => "shared",
            Self::User => "user",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "global" => Self::Global,
            "route" => Self::Route,
            "shared" => Self::Shared,
            "user" => Self::User,
            _ => return None,
        })
    }
}

impl Display for RatelimitScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Information about the rate limit bucket is available.
#[derive(Clone, Debug, PartialEq)]
pub struct Present {
    /// Hashed bucket ID, if any.
    bucket: Option<Box<str>>,
    /// Total number of permits allocated to the bucket.
    limit: u64,
    /// Remaining number of permits.
    remaining: u64,
    /// When the bucket resets, in seconds since the Unix epoch.
    reset: f64,
    /// Number of seconds until the bucket resets.
    reset_after: f64,
    /// Scope the rate limit applies to.
    scope: RatelimitScope,
}

impl Present {
    /// Immutable reference to the bucket hash, if available.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Consume the headers, returning the owned bucket hash if available.
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_bucket(self) -> Option<Box<str>> {
        self.bucket
    }

    /// Total number of permits allocated to the bucket.
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// Remaining number of permits.
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// When the bucket resets, in seconds since the Unix epoch.
    pub const fn reset(&self) -> f64 {
        self.reset
    }

    /// Number of seconds until the bucket resets.
    pub const fn reset_after(&self) -> f64 {
        self.reset_after
    }

    /// Scope the rate limit applies to.
    pub const fn scope(&self) -> RatelimitScope {
        self.scope
    }
}

/// Parsed rate limit headers.
///
/// A response either carries information about its bucket or no rate limit
/// headers at all.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum RatelimitHeaders {
    /// No rate limit headers present.
    None,
    /// Information about the rate limit bucket is available.
    Present(Present),
}

impl RatelimitHeaders {
    /// Whether there are no rate limit headers.
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Whether rate limit headers are present.
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Parse headers from an iterator of tuples containing the header name
    /// and value.
    ///
    /// Header names must be lowercased.
    ///
    /// # Examples
    ///
    /// ```
    /// use eventide_http_ratelimiting::headers::RatelimitHeaders;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let headers = [
    ///     ("x-ratelimit-bucket", "d721dea6054f6322373d361f98e5c38b".as_bytes()),
    ///     ("x-ratelimit-limit", "10".as_bytes()),
    ///     ("x-ratelimit-remaining", "9".as_bytes()),
    ///     ("x-ratelimit-reset", "1573795260.333".as_bytes()),
    ///     ("x-ratelimit-reset-after", "10.000".as_bytes()),
    /// ];
    ///
    /// let headers = RatelimitHeaders::from_pairs(headers.into_iter())?;
    /// assert!(matches!(
    ///     headers,
    ///     RatelimitHeaders::Present(p) if p.remaining() == 9,
    /// ));
    /// # Ok(()) }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a [`HeaderParsingError`] if a value is not valid UTF-8 or of
    /// the expected type, or if some but not all of the required headers are
    /// present.
    pub fn from_pairs<'a>(
        headers: impl Iterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<Self, HeaderParsingError> {
        let mut bucket = None;
        let mut limit = None;
        let mut remaining = None;
        let mut reset = None;
        let mut reset_after = None;
        let mut scope = None;

        for (name, value) in headers {
            match name {
                HeaderName::BUCKET => {
                    bucket.replace(header_str(HeaderName::Bucket, value)?);
                }
                HeaderName::LIMIT => {
                    limit.replace(header_int(HeaderName::Limit, value)?);
                }
                HeaderName::REMAINING => {
                    remaining.replace(header_int(HeaderName::Remaining, value)?);
                }
                HeaderName::RESET => {
                    reset.replace(header_float(HeaderName::Reset, value)?);
                }
                HeaderName::RESET_AFTER => {
                    reset_after.replace(header_float(HeaderName::ResetAfter, value)?);
                }
                HeaderName::SCOPE => {
                    scope = RatelimitScope::from_name(header_str(HeaderName::Scope, value)?);
                }
                _ => continue,
            }
        }

        // If none of the values have been set then there are no rate limit
        // headers, meaning the route is not rate limited.
        if bucket.is_none()
            && limit.is_none()
            && remaining.is_none()
            && reset.is_none()
            && reset_after.is_none()
        {
            return Ok(Self::None);
        }

        Ok(Self::Present(Present {
            bucket: bucket.map(Into::into),
            limit: limit.ok_or_else(|| HeaderParsingError::missing(HeaderName::Limit))?,
            remaining: remaining
                .ok_or_else(|| HeaderParsingError::missing(HeaderName::Remaining))?,
            reset: reset.ok_or_else(|| HeaderParsingError::missing(HeaderName::Reset))?,
            reset_after: reset_after
                .ok_or_else(|| HeaderParsingError::missing(HeaderName::ResetAfter))?,
            scope: scope.unwrap_or(RatelimitScope::Route),
        }))
    }
}

/// Parse a value expected to be a float.
fn header_float(name: HeaderName, value: &[u8]) -> Result<f64, HeaderParsingError> {
    let text = str::from_utf8(value)
        .map_err(|source| HeaderParsingError::not_utf8(name, value.to_owned(), source))?;

    let end = text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Float,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })?;

    Ok(end)
}

/// Parse a value expected to be an integer.
fn header_int(name: HeaderName, value: &[u8]) -> Result<u64, HeaderParsingError> {
    let text = str::from_utf8(value)
        .map_err(|source| HeaderParsingError::not_utf8(name, value.to_owned(), source))?;

    let end = text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind: HeaderType::Integer,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })?;

    Ok(end)
}

/// Parse a value expected to be a UTF-8 valid string.
fn header_str(name: HeaderName, value: &[u8]) -> Result<&str, HeaderParsingError> {
    let text = str::from_utf8(value)
        .map_err(|source| HeaderParsingError::not_utf8(name, value.to_owned(), source))?;

    Ok(text)
}
