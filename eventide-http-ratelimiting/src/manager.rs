//! Process-wide registry routing every request to the right bucket.

use crate::{
    bucket::RestBucket, error::RatelimitError, manual::ManualLimiter, route::CompiledRoute,
    UNKNOWN_HASH,
};
use std::{
    collections::hash_map::{DefaultHasher, Entry, HashMap},
    hash::{Hash, Hasher},
    sync::{Arc, Mutex, Weak},
};
use tokio::{
    task::JoinHandle,
    time::{self, Duration, Instant},
};

const POISONED_ROUTES: &str = "route hash map poisoned";
const POISONED_BUCKETS: &str = "bucket map poisoned";
const POISONED_GC: &str = "gc task handle poisoned";

/// Default period between garbage collection passes.
pub const DEFAULT_GC_POLL_PERIOD: Duration = Duration::from_secs(20);

/// Default grace period past a bucket's reset before it may be purged.
pub const DEFAULT_GC_EXPIRE_AFTER: Duration = Duration::from_secs(10);

/// The rate limiter routing requests to [`RestBucket`]s.
///
/// The manager learns which bucket hash the API has assigned to each route
/// family from response headers, keyed by the route's fingerprint, and keeps
/// one live bucket per real bucket key. A route that has not revealed its
/// hash yet is tracked under a placeholder key until a response resolves it.
/// Any rate limit can change at any time, so nothing here is assumed stable.
///
/// [`start`] spins up a garbage collection task that periodically disposes of
/// idle buckets; its presence is the manager's "alive" signal, and every
/// other operation requires the manager to be alive.
///
/// The manager can be cloned cheaply and shared; clones operate on the same
/// state.
///
/// [`start`]: Self::start
#[derive(Clone, Debug)]
pub struct BucketManager {
    inner: Arc<ManagerInner>,
}

#[derive(Debug)]
struct ManagerInner {
    /// Learned `route fingerprint -> bucket hash` associations.
    routes_to_hashes: Mutex<HashMap<u64, Box<str>>>,
    /// Live buckets by real (or placeholder) bucket key.
    buckets: Mutex<HashMap<Box<str>, Arc<RestBucket>>>,
    global: Arc<ManualLimiter>,
    gc: Mutex<Option<JoinHandle<()>>>,
    max_rate_limit: Duration,
}

impl BucketManager {
    /// Create a new, not yet started manager.
    ///
    /// `max_rate_limit` is the longest wait any single acquisition may be
    /// predicted to incur before it fails fast instead.
    pub fn new(max_rate_limit: Duration) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                routes_to_hashes: Mutex::new(HashMap::new()),
                buckets: Mutex::new(HashMap::new()),
                global: Arc::new(ManualLimiter::new()),
                gc: Mutex::new(None),
                max_rate_limit,
            }),
        }
    }

    /// The longest wait any single acquisition may be predicted to incur.
    pub fn max_rate_limit(&self) -> Duration {
        self.inner.max_rate_limit
    }

    /// Whether the manager is running.
    pub fn is_alive(&self) -> bool {
        self.inner.gc.lock().expect(POISONED_GC).is_some()
    }

    /// Start the manager's garbage collection task.
    ///
    /// Stale buckets are swept every `poll_period`; a bucket is purged once
    /// it has been continuously empty and past its reset for longer than
    /// `expire_after`.
    ///
    /// # Errors
    ///
    /// Returns an error of type [`ComponentState`] if the manager is already
    /// running.
    ///
    /// [`ComponentState`]: crate::error::RatelimitErrorType::ComponentState
    pub fn start(
        &self,
        poll_period: Duration,
        expire_after: Duration,
    ) -> Result<(), RatelimitError> {
        let mut gc = self.inner.gc.lock().expect(POISONED_GC);

        if gc.is_some() {
            return Err(RatelimitError::component_state(true));
        }

        gc.replace(tokio::spawn(gc_loop(
            Arc::downgrade(&self.inner),
            poll_period,
            expire_after,
        )));

        Ok(())
    }

    /// Stop the manager, cancelling the garbage collector and every queued
    /// acquisition, and clearing all learned state.
    ///
    /// # Errors
    ///
    /// Returns an error of type [`ComponentState`] if the manager is not
    /// running.
    ///
    /// [`ComponentState`]: crate::error::RatelimitErrorType::ComponentState
    pub fn close(&self) -> Result<(), RatelimitError> {
        match self.inner.gc.lock().expect(POISONED_GC).take() {
            Some(gc) => gc.abort(),
            None => return Err(RatelimitError::component_state(false)),
        }

        let mut buckets = self.inner.buckets.lock().expect(POISONED_BUCKETS);

        for bucket in buckets.values() {
            bucket.close();
        }

        buckets.clear();
        drop(buckets);

        self.inner.global.close();
        self.inner
            .routes_to_hashes
            .lock()
            .expect(POISONED_ROUTES)
            .clear();

        Ok(())
    }

    /// Hand out the bucket responsible for the given route and
    /// authorization, creating it if it does not exist yet.
    ///
    /// The caller must treat the bucket as a scoped acquisition: call
    /// [`RestBucket::acquire`] and hold the lease for the full duration of
    /// the request, through [`update_rate_limits`].
    ///
    /// # Errors
    ///
    /// Returns an error of type [`ComponentState`] if the manager is not
    /// running.
    ///
    /// [`ComponentState`]: crate::error::RatelimitErrorType::ComponentState
    /// [`update_rate_limits`]: Self::update_rate_limits
    pub fn acquire_bucket(
        &self,
        route: &CompiledRoute,
        authentication: Option<&str>,
    ) -> Result<Arc<RestBucket>, RatelimitError> {
        if !self.is_alive() {
            return Err(RatelimitError::component_state(false));
        }

        let auth = authentication_fingerprint(authentication);
        let known = self
            .inner
            .routes_to_hashes
            .lock()
            .expect(POISONED_ROUTES)
            .get(&route.fingerprint())
            .map(|hash| route.real_bucket_key(hash, auth));
        let key = known.unwrap_or_else(|| route.unknown_bucket_key(auth));

        let mut buckets = self.inner.buckets.lock().expect(POISONED_BUCKETS);

        let bucket = match buckets.entry(key) {
            Entry::Occupied(entry) => {
                tracing::debug!(route = %route, bucket = %entry.key(), "mapped to existing bucket");

                Arc::clone(entry.get())
            }
            Entry::Vacant(entry) => {
                tracing::debug!(route = %route, bucket = %entry.key(), "mapped to new bucket");

                let bucket = Arc::new(RestBucket::new(
                    entry.key().clone(),
                    route.clone(),
                    Arc::clone(&self.inner.global),
                    self.inner.max_rate_limit,
                ));
                entry.insert(Arc::clone(&bucket));

                bucket
            }
        };

        Ok(bucket)
    }

    /// Ingest a response's rate limit headers.
    ///
    /// Records the route family's bucket hash, resolves or creates the
    /// concrete bucket as needed, and updates its window. After this returns,
    /// the route fingerprint points at the most recently observed hash and
    /// [`acquire_bucket`] with the same route and authorization yields the
    /// updated bucket.
    ///
    /// # Errors
    ///
    /// Returns an error of type [`ComponentState`] if the manager is not
    /// running.
    ///
    /// [`ComponentState`]: crate::error::RatelimitErrorType::ComponentState
    /// [`acquire_bucket`]: Self::acquire_bucket
    #[allow(clippy::too_many_arguments)]
    pub fn update_rate_limits(
        &self,
        route: &CompiledRoute,
        authentication: Option<&str>,
        bucket_hash: &str,
        remaining: u64,
        limit: u64,
        reset_at: f64,
        reset_after: f64,
    ) -> Result<(), RatelimitError> {
        if !self.is_alive() {
            return Err(RatelimitError::component_state(false));
        }

        let auth = authentication_fingerprint(authentication);

        self.inner
            .routes_to_hashes
            .lock()
            .expect(POISONED_ROUTES)
            .insert(route.fingerprint(), bucket_hash.into());

        let real_key = route.real_bucket_key(bucket_hash, auth);

        let bucket = {
            let mut buckets = self.inner.buckets.lock().expect(POISONED_BUCKETS);

            if let Some(bucket) = buckets.get(&real_key) {
                tracing::debug!(
                    route = %route,
                    bucket = %real_key,
                    reset_after,
                    limit,
                    remaining,
                    "updating bucket",
                );

                Arc::clone(bucket)
            } else {
                let unknown_key = route.unknown_bucket_key(auth);

                let bucket = if let Some(bucket) = buckets.remove(&unknown_key) {
                    tracing::debug!(
                        route = %route,
                        from = %unknown_key,
                        to = %real_key,
                        "remapping existing bucket",
                    );

                    bucket
                } else {
                    tracing::debug!(route = %route, bucket = %real_key, "mapping to new bucket");

                    Arc::new(RestBucket::new(
                        UNKNOWN_HASH,
                        route.clone(),
                        Arc::clone(&self.inner.global),
                        self.inner.max_rate_limit,
                    ))
                };

                bucket.resolve(&real_key, remaining, limit, reset_at, reset_after);
                buckets.insert(real_key.clone(), Arc::clone(&bucket));

                bucket
            }
        };

        bucket.update_rate_limit(remaining, limit, reset_at, reset_after);

        Ok(())
    }

    /// Block every bucketed acquisition for `retry_after`, for a global rate
    /// limit reported by the API.
    pub fn throttle(&self, retry_after: Duration) {
        self.inner.global.throttle(retry_after);
    }

    /// Wait on the global limiter without touching any bucket.
    ///
    /// Used for routes with no declared rate limits, which skip bucket
    /// acquisition but still honor a global rate limit.
    ///
    /// # Errors
    ///
    /// Returns an error of type [`ComponentState`] if the manager is not
    /// running, and of type [`Cancelled`] if it is closed while waiting.
    ///
    /// [`Cancelled`]: crate::error::RatelimitErrorType::Cancelled
    /// [`ComponentState`]: crate::error::RatelimitErrorType::ComponentState
    pub async fn acquire_global(&self) -> Result<(), RatelimitError> {
        if !self.is_alive() {
            return Err(RatelimitError::component_state(false));
        }

        self.inner.global.acquire().await
    }
}

/// Sweep the bucket map on a fixed period until the manager is dropped or
/// the task is aborted by [`BucketManager::close`].
async fn gc_loop(inner: Weak<ManagerInner>, poll_period: Duration, expire_after: Duration) {
    tracing::trace!("rate limit garbage collector started");

    loop {
        time::sleep(poll_period).await;

        match inner.upgrade() {
            Some(inner) => purge_stale_buckets(&inner, expire_after),
            None => break,
        }
    }
}

/// Dispose of every bucket that is empty and past its reset by more than
/// `expire_after`.
fn purge_stale_buckets(inner: &ManagerInner, expire_after: Duration) {
    let now = Instant::now();
    let mut active = 0_usize;
    let mut dead = 0_usize;

    let mut buckets = inner.buckets.lock().expect(POISONED_BUCKETS);
    let total = buckets.len();

    buckets.retain(|_, bucket| {
        if bucket.is_empty() && bucket.increase_at() + expire_after < now {
            bucket.close();
            dead += 1;

            return false;
        }

        if bucket.increase_at() > now {
            active += 1;
        }

        true
    });

    drop(buckets);

    let survival = total - active - dead;

    if dead > 0 {
        tracing::debug!(active, dead, survival, "purged stale buckets");
    } else {
        tracing::trace!(active, survival, "no buckets purged");
    }
}

/// Process-local fingerprint of an authorization value.
fn authentication_fingerprint(authentication: Option<&str>) -> u64 {
    let mut hasher = DefaultHasher::new();
    authentication.hash(&mut hasher);

    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::BucketManager;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(BucketManager: Clone, Debug, Send, Sync);
}
