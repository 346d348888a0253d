//! Errors returned by the rate limiting components.

use crate::route::CompiledRoute;
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    time::Duration,
};

/// Failure while interacting with a rate limiter.
#[derive(Debug)]
pub struct RatelimitError {
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
    pub(crate) kind: RatelimitErrorType,
}

impl RatelimitError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &RatelimitErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn Error + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (RatelimitErrorType, Option<Box<dyn Error + Send + Sync>>) {
        (self.kind, self.source)
    }

    pub(crate) const fn cancelled() -> Self {
        Self {
            kind: RatelimitErrorType::Cancelled,
            source: None,
        }
    }

    pub(crate) const fn component_state(alive: bool) -> Self {
        Self {
            kind: RatelimitErrorType::ComponentState { alive },
            source: None,
        }
    }

    pub(crate) fn rate_limit_too_long(
        route: &CompiledRoute,
        global: bool,
        retry_after: Duration,
        max_rate_limit: Duration,
        limit: Option<u64>,
        period: Option<Duration>,
    ) -> Self {
        Self {
            kind: RatelimitErrorType::RateLimitTooLong {
                route: route.to_string().into_boxed_str(),
                global,
                retry_after,
                max_rate_limit,
                limit,
                period,
            },
            source: None,
        }
    }
}

impl Display for RatelimitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            RatelimitErrorType::Cancelled => {
                f.write_str("rate limiter was closed while the acquisition was queued")
            }
            RatelimitErrorType::ComponentState { alive } => {
                if *alive {
                    f.write_str("bucket manager is already running")
                } else {
                    f.write_str("bucket manager is not running")
                }
            }
            RatelimitErrorType::RateLimitTooLong {
                route,
                global,
                retry_after,
                max_rate_limit,
                ..
            } => {
                f.write_str("predicted ")?;

                if *global {
                    f.write_str("global ")?;
                }

                write!(
                    f,
                    "rate limit of {}s on '{}' exceeds the maximum of {}s",
                    retry_after.as_secs_f64(),
                    route,
                    max_rate_limit.as_secs_f64(),
                )
            }
        }
    }
}

impl Error for RatelimitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`RatelimitError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum RatelimitErrorType {
    /// A queued acquisition was cancelled by [`close`].
    ///
    /// [`close`]: crate::WindowedLimiter::close
    Cancelled,
    /// The operation requires the component to be in the opposite lifecycle
    /// state.
    ComponentState {
        /// Whether the component is currently running.
        alive: bool,
    },
    /// The predicted wait for a permit exceeds the configured ceiling.
    RateLimitTooLong {
        /// Display form of the route that was being acquired.
        route: Box<str>,
        /// Whether the wait is caused by the global rate limit.
        global: bool,
        /// Predicted time until a permit would become available.
        retry_after: Duration,
        /// Configured ceiling the prediction exceeded.
        max_rate_limit: Duration,
        /// Capacity of the bucket, if the cause is a bucket.
        limit: Option<u64>,
        /// Refill period of the bucket, if the cause is a bucket.
        period: Option<Duration>,
    },
}
