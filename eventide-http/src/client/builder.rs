use super::{Client, State};
use crate::{
    strategy::TokenStrategy,
    transport::{HyperTransport, Transport},
    API_VERSION,
};
use eventide_http_ratelimiting::{
    manager::{DEFAULT_GC_EXPIRE_AFTER, DEFAULT_GC_POLL_PERIOD},
    Backoff, BucketManager,
};
use std::sync::{atomic::AtomicU64, Arc};
use tokio::time::Duration;

/// A builder for [`Client`].
#[derive(Debug)]
pub struct ClientBuilder {
    backoff_base: f64,
    backoff_cap: f64,
    backoff_jitter: f64,
    base_url: String,
    gc_expire_after: Duration,
    gc_poll_period: Duration,
    max_rate_limit: Duration,
    max_retries: u8,
    timeout: Duration,
    token: Option<Box<str>>,
    token_strategy: Option<Box<dyn TokenStrategy>>,
    transport: Option<Box<dyn Transport>>,
}

impl ClientBuilder {
    /// Create a new builder to create a [`Client`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the [`Client`].
    ///
    /// This also starts the rate limiter's garbage collection task, so it
    /// must be called from within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if a backoff parameter set via [`backoff`] is not finite.
    ///
    /// [`backoff`]: Self::backoff
    pub fn build(self) -> Client {
        let backoff = Backoff::new(self.backoff_base, self.backoff_cap, self.backoff_jitter)
            .expect("backoff parameters must be finite");

        let transport = self
            .transport
            .unwrap_or_else(|| Box::new(HyperTransport::new()));

        let bucket_manager = BucketManager::new(self.max_rate_limit);
        bucket_manager
            .start(self.gc_poll_period, self.gc_expire_after)
            .expect("a fresh bucket manager is not already running");

        Client {
            state: Arc::new(State {
                backoff,
                base_url: self.base_url.into_boxed_str(),
                bucket_manager,
                max_retries: self.max_retries,
                request_counter: AtomicU64::new(0),
                timeout: self.timeout,
                token: self.token,
                token_strategy: self.token_strategy,
                transport,
            }),
        }
    }

    /// Set the exponential backoff parameters used when retrying transient
    /// failures.
    ///
    /// The i-th retry sleeps `min(base^i, cap)` seconds plus a random jitter
    /// in `[0, jitter)`. Defaults to a base of 2, a cap of 16 and a jitter
    /// of 1.
    pub const fn backoff(mut self, base: f64, cap: f64, jitter: f64) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self.backoff_jitter = jitter;

        self
    }

    /// Set the base URL requests are issued against.
    ///
    /// Useful for routing through a proxy.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();

        self
    }

    /// Set how long a bucket may sit idle past its reset before the garbage
    /// collector disposes of it.
    ///
    /// Higher values retain rate limit information for longer, which may
    /// produce more accurate limiting. The default is 10 seconds.
    pub const fn gc_expire_after(mut self, expire_after: Duration) -> Self {
        self.gc_expire_after = expire_after;

        self
    }

    /// Set the period between garbage collection passes over the buckets.
    ///
    /// The default is 20 seconds.
    pub const fn gc_poll_period(mut self, poll_period: Duration) -> Self {
        self.gc_poll_period = poll_period;

        self
    }

    /// Set the longest rate limit the client is willing to wait out.
    ///
    /// A predicted or reported wait above this ceiling fails the request
    /// instead. Some endpoints report waits measured in hours. The default
    /// is five minutes.
    pub const fn max_rate_limit(mut self, max_rate_limit: Duration) -> Self {
        self.max_rate_limit = max_rate_limit;

        self
    }

    /// Set how many times connection errors, timeouts, and retryable
    /// statuses are retried.
    ///
    /// The default is 3.
    ///
    /// # Panics
    ///
    /// Panics if `max_retries` is greater than 5.
    pub fn max_retries(mut self, max_retries: u8) -> Self {
        assert!(max_retries <= 5, "'max_retries' must be at most 5");

        self.max_retries = max_retries;

        self
    }

    /// Set the timeout for a single HTTP request attempt.
    ///
    /// The default is 10 seconds.
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;

        self
    }

    /// Set the token to use for requests.
    ///
    /// If the token is not prefixed with its scheme, `Bot ` is assumed.
    pub fn token(mut self, mut token: String) -> Self {
        let is_bot = token.starts_with("Bot ");
        let is_bearer = token.starts_with("Bearer ");

        if !is_bot && !is_bearer {
            token.insert_str(0, "Bot ");
        }

        self.token.replace(token.into_boxed_str());

        self
    }

    /// Set a strategy that acquires and renews tokens, instead of a fixed
    /// token.
    ///
    /// With a strategy configured, an unauthorized response invalidates the
    /// used token and the request is retried once with a fresh one.
    pub fn token_strategy(mut self, strategy: Box<dyn TokenStrategy>) -> Self {
        self.token_strategy.replace(strategy);

        self
    }

    /// Set the transport performing the HTTP exchanges.
    ///
    /// Defaults to a [`HyperTransport`] with its own connection pool.
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport.replace(transport);

        self
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            backoff_base: 2.0,
            backoff_cap: 16.0,
            backoff_jitter: 1.0,
            base_url: format!("https://discord.com/api/v{}", API_VERSION),
            gc_expire_after: DEFAULT_GC_EXPIRE_AFTER,
            gc_poll_period: DEFAULT_GC_POLL_PERIOD,
            max_rate_limit: Duration::from_secs(300),
            max_retries: 3,
            timeout: Duration::from_secs(10),
            token: None,
            token_strategy: None,
            transport: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ClientBuilder;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(ClientBuilder: Debug, Default, Send);
}
