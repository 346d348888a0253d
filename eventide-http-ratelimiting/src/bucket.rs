//! A rate limit bucket bound to one route, authorization, and major
//! parameter identity.

use crate::{
    error::RatelimitError, manual::ManualLimiter, route::CompiledRoute, windowed::WindowedLimiter,
    UNKNOWN_HASH,
};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::{
    sync::{Mutex as AsyncMutex, OwnedMutexGuard},
    time::{Duration, Instant},
};

/// Tolerance within which a server-provided slide period is considered equal
/// to the tracked one, avoiding drift from every response.
const PERIOD_DRIFT_TOLERANCE: Duration = Duration::from_millis(500);

/// Drift beyond which adopting a new slide period is logged.
const PERIOD_JUMP_WARN: Duration = Duration::from_millis(700);

/// Upper bound applied to durations derived from response values, so hostile
/// input cannot overflow duration arithmetic.
const MAX_WINDOW_SECONDS: f64 = 4_294_967_295.0;

/// An active rate limit bucket for a specific route and major parameter
/// combination.
///
/// Until the API reveals the route's bucket hash, the bucket is *unknown* and
/// additionally holds a single-holder lock during acquisition, so only one
/// probe request per unresolved route and authorization is in flight at a
/// time. That way the next `X-RateLimit-Bucket` header observed can be
/// attributed to the right route.
#[derive(Debug)]
pub struct RestBucket {
    window: WindowedLimiter,
    compiled_route: CompiledRoute,
    global: Arc<ManualLimiter>,
    max_rate_limit: Duration,
    lock: Arc<AsyncMutex<()>>,
}

/// Scope of one granted acquisition on a [`RestBucket`].
///
/// Hold the lease for the full duration of the request, through updating the
/// rate limit information from the response headers. Dropping it releases
/// the unknown-bucket probe lock, if one was held.
#[derive(Debug)]
pub struct BucketLease {
    _probe: Option<OwnedMutexGuard<()>>,
}

impl RestBucket {
    /// Create a new bucket.
    ///
    /// The name is either a real bucket key or, for a route whose bucket hash
    /// is not yet known, a key starting with [`UNKNOWN_HASH`].
    pub fn new(
        name: impl Into<Box<str>>,
        compiled_route: CompiledRoute,
        global: Arc<ManualLimiter>,
        max_rate_limit: Duration,
    ) -> Self {
        Self {
            window: WindowedLimiter::new(name),
            compiled_route,
            global,
            max_rate_limit,
            lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Name of the bucket.
    pub fn name(&self) -> Box<str> {
        self.window.lock().name.clone()
    }

    /// Whether the bucket hash has not been revealed yet.
    pub fn is_unknown(&self) -> bool {
        self.window.lock().name.starts_with(UNKNOWN_HASH)
    }

    /// Whether no acquisitions are queued on the bucket.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Total number of permits per window.
    pub fn limit(&self) -> u64 {
        self.window.lock().limit
    }

    /// Permits left in the current window.
    pub fn remaining(&self) -> u64 {
        self.window.lock().remaining
    }

    /// Current per-permit refill interval.
    pub fn period(&self) -> Duration {
        self.window.lock().period
    }

    pub(crate) fn increase_at(&self) -> Instant {
        self.window.lock().increase_at
    }

    /// Acquire a permit on the bucket and on the global limiter.
    ///
    /// The returned lease must be held until the response's rate limit
    /// headers have been processed.
    ///
    /// # Errors
    ///
    /// Returns an error of type [`RateLimitTooLong`] if the predicted wait,
    /// on either the bucket or the global limiter, exceeds the configured
    /// ceiling, and of type [`Cancelled`] if the bucket is closed while
    /// waiting.
    ///
    /// [`Cancelled`]: crate::error::RatelimitErrorType::Cancelled
    /// [`RateLimitTooLong`]: crate::error::RatelimitErrorType::RateLimitTooLong
    pub async fn acquire(&self) -> Result<BucketLease, RatelimitError> {
        let probe = if self.is_unknown() {
            Some(Arc::clone(&self.lock).lock_owned().await)
        } else {
            None
        };

        let now = Instant::now();

        {
            let window = self.window.lock();

            if window.remaining == 0 {
                let retry_after = window.time_until_increase(now);

                if retry_after > self.max_rate_limit {
                    return Err(RatelimitError::rate_limit_too_long(
                        &self.compiled_route,
                        false,
                        retry_after,
                        self.max_rate_limit,
                        Some(window.limit),
                        Some(window.period),
                    ));
                }
            }
        }

        self.window.acquire().await?;

        if let Some(reset_at) = self.global.reset_at() {
            let retry_after = reset_at.saturating_duration_since(Instant::now());

            if retry_after > self.max_rate_limit {
                return Err(RatelimitError::rate_limit_too_long(
                    &self.compiled_route,
                    true,
                    retry_after,
                    self.max_rate_limit,
                    None,
                    None,
                ));
            }
        }

        self.global.acquire().await?;

        Ok(BucketLease { _probe: probe })
    }

    /// Update the bucket from a response's rate limit headers.
    ///
    /// The per-permit refill interval is inferred from what the response
    /// reveals: `reset_after / (limit - remaining)`. Information describing a
    /// window that has already passed is ignored, as is a response claiming
    /// the full limit remains, since the current request has already been
    /// accounted for locally.
    pub fn update_rate_limit(&self, remaining: u64, limit: u64, reset_at: f64, reset_after: f64) {
        if remaining >= limit {
            return;
        }

        #[allow(clippy::cast_precision_loss)]
        let slide_seconds = reset_after / (limit - remaining) as f64;
        let next_slide_at = instant_from_epoch(reset_at - reset_after + slide_seconds);
        let slide_period = duration_from_secs(slide_seconds);

        let mut window = self.window.lock();

        if next_slide_at < window.increase_at {
            // Rate limit information from a window that has already passed.
            return;
        }

        if window.limit != limit {
            if window.limit > limit {
                tracing::warn!(
                    name = %window.name,
                    old = window.limit,
                    new = limit,
                    "bucket decreased its limit, a small increase in 429s is possible",
                );
            }

            window.limit = limit;
            window.remaining = window.remaining.min(limit);
        }

        // Adopt the slide period only when the window reference was reset, on
        // the first usage of the bucket (which carries the most accurate
        // value), or when the inferred period diverged too far from the
        // tracked one.
        let drift = absolute_difference(window.period, slide_period);

        if window.out_of_sync || remaining == limit - 1 || drift > PERIOD_DRIFT_TOLERANCE {
            if drift > PERIOD_JUMP_WARN {
                tracing::warn!(
                    name = %window.name,
                    old = window.period.as_secs_f64(),
                    new = slide_period.as_secs_f64(),
                    "bucket slide period changed sharply, a small increase in 429s is possible",
                );
            }

            window.out_of_sync = false;
            window.period = slide_period;
            window.increase_at = next_slide_at;
        }
    }

    /// Give an unknown bucket its real key and seed its window from the
    /// response that revealed it.
    ///
    /// Only legal on an unknown bucket; a resolved bucket's name never
    /// reverts.
    pub fn resolve(
        &self,
        real_bucket_key: &str,
        remaining: u64,
        limit: u64,
        reset_at: f64,
        reset_after: f64,
    ) {
        let mut window = self.window.lock();

        if !window.name.starts_with(UNKNOWN_HASH) {
            debug_assert!(false, "resolve called on a known bucket");

            return;
        }

        window.name = real_bucket_key.into();
        window.out_of_sync = false;

        if remaining >= limit {
            return;
        }

        #[allow(clippy::cast_precision_loss)]
        let slide_period = duration_from_secs(reset_after / (limit - remaining) as f64);

        window.remaining = remaining;
        window.limit = limit;
        window.period = slide_period;
        window.increase_at = instant_from_epoch(reset_at - reset_after) + slide_period;
    }

    /// Cancel the drain task and every queued acquisition.
    pub fn close(&self) {
        self.window.close();
    }
}

/// Clamp a possibly negative or non-finite seconds value into a [`Duration`].
fn duration_from_secs(seconds: f64) -> Duration {
    if seconds > 0.0 && seconds.is_finite() {
        Duration::from_secs_f64(seconds.min(MAX_WINDOW_SECONDS))
    } else {
        Duration::ZERO
    }
}

/// Convert a wall-clock epoch timestamp into the monotonic clock, anchored at
/// the current time.
///
/// Window arithmetic is monotonic; the conversion happens once here, on
/// ingest, so no wall clocks are stored in bucket state.
fn instant_from_epoch(epoch_seconds: f64) -> Instant {
    let now = Instant::now();
    let now_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |since| since.as_secs_f64());
    let delta = epoch_seconds - now_epoch;

    if delta >= 0.0 {
        now + duration_from_secs(delta)
    } else {
        now.checked_sub(duration_from_secs(-delta)).unwrap_or(now)
    }
}

fn absolute_difference(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

#[cfg(test)]
mod tests {
    use super::{BucketLease, RestBucket};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(BucketLease: Debug, Send, Sync);
    assert_impl_all!(RestBucket: Debug, Send, Sync);
}
