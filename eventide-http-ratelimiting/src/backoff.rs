//! Exponential backoff with random jitter for retrying transient failures.

use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// A non-finite value was passed to [`Backoff::new`].
#[derive(Debug)]
pub struct BackoffArgumentError {
    name: &'static str,
    value: f64,
}

impl BackoffArgumentError {
    /// Name of the offending parameter.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The value that was rejected.
    pub const fn value(&self) -> f64 {
        self.value
    }
}

impl Display for BackoffArgumentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "backoff parameter '{}' must be finite, got {}",
            self.name, self.value,
        )
    }
}

impl Error for BackoffArgumentError {}

/// Lazy iterator of exponentially increasing sleep durations, in seconds.
///
/// Each value is `min(base^i, cap)` plus a uniformly random jitter in
/// `[0, jitter)`, where `i` counts the draws since construction or the last
/// [`reset`]. The exponent stops increasing once the uncapped value reaches
/// `cap`, so the sequence plateaus rather than overflowing. A `jitter` of
/// zero disables jitter entirely.
///
/// [`reset`]: Self::reset
#[derive(Clone, Debug)]
pub struct Backoff {
    base: f64,
    cap: f64,
    jitter: f64,
    increment: u32,
}

impl Backoff {
    /// Create a new backoff sequence.
    ///
    /// # Errors
    ///
    /// Returns a [`BackoffArgumentError`] if any parameter is NaN or
    /// infinite.
    pub fn new(base: f64, cap: f64, jitter: f64) -> Result<Self, BackoffArgumentError> {
        if !base.is_finite() {
            return Err(BackoffArgumentError {
                name: "base",
                value: base,
            });
        }

        if !cap.is_finite() {
            return Err(BackoffArgumentError {
                name: "cap",
                value: cap,
            });
        }

        if !jitter.is_finite() {
            return Err(BackoffArgumentError {
                name: "jitter",
                value: jitter,
            });
        }

        Ok(Self {
            base,
            cap,
            jitter,
            increment: 0,
        })
    }

    /// Start the sequence at the given exponent instead of zero.
    #[must_use]
    pub const fn starting_at(mut self, increment: u32) -> Self {
        self.increment = increment;

        self
    }

    /// Restart the sequence from the beginning.
    pub fn reset(&mut self) {
        self.increment = 0;
    }
}

impl Iterator for Backoff {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        #[allow(clippy::cast_possible_wrap)]
        let mut value = self.base.powi(self.increment as i32);

        if value >= self.cap {
            value = self.cap;
        } else {
            self.increment += 1;
        }

        Some(value + rand::random::<f64>() * self.jitter)
    }
}
