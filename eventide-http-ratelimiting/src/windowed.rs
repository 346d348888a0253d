//! Sliding-window rate limiting with in-order queued acquisition.

use crate::error::RatelimitError;
use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{self, Duration, Instant},
};

const POISONED: &str = "window state poisoned";

/// Future resolving once a permit has been granted.
///
/// The permit is reserved, or the caller queued, at the time the future is
/// created rather than when it is first polled, so completion order follows
/// the order of [`acquire`] calls.
///
/// [`acquire`]: WindowedLimiter::acquire
#[derive(Debug)]
pub struct Acquire(AcquireState);

#[derive(Debug)]
enum AcquireState {
    Ready(Option<RatelimitError>),
    Waiting(oneshot::Receiver<()>),
}

impl Acquire {
    pub(crate) const fn ready(error: Option<RatelimitError>) -> Self {
        Self(AcquireState::Ready(error))
    }

    pub(crate) const fn waiting(rx: oneshot::Receiver<()>) -> Self {
        Self(AcquireState::Waiting(rx))
    }
}

impl Future for Acquire {
    type Output = Result<(), RatelimitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().0 {
            AcquireState::Ready(error) => Poll::Ready(match error.take() {
                Some(error) => Err(error),
                None => Ok(()),
            }),
            AcquireState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|result| result.map_err(|_| RatelimitError::cancelled())),
        }
    }
}

/// Rate limiter over a sliding window with a bounded number of permits.
///
/// Acquisitions complete immediately while permits remain. Once the window is
/// exhausted, or while earlier acquisitions are still queued, new
/// acquisitions join a first-come-first-served queue that a background drain
/// task releases as the window refills. The drain task only exists while the
/// queue is non-empty and disposes of itself once it drains it.
#[derive(Debug)]
pub struct WindowedLimiter {
    window: Arc<Mutex<Window>>,
}

#[derive(Debug)]
pub(crate) struct Window {
    pub(crate) name: Box<str>,
    pub(crate) limit: u64,
    pub(crate) remaining: u64,
    pub(crate) period: Duration,
    pub(crate) increase_at: Instant,
    pub(crate) out_of_sync: bool,
    queue: VecDeque<oneshot::Sender<()>>,
    drain: Option<JoinHandle<()>>,
    closed: bool,
}

impl Window {
    /// Whether the window is currently exhausted.
    ///
    /// If the window's reference time has passed, this rolls it over first:
    /// permits refill to the limit and the reference moves one period ahead.
    /// Rolling over marks the window out of sync, so the next server-provided
    /// period is trusted verbatim.
    pub(crate) fn is_rate_limited(&mut self, now: Instant) -> bool {
        if self.increase_at <= now {
            self.remaining = self.limit;
            self.increase_at = now + self.period;
            self.out_of_sync = true;

            return false;
        }

        self.remaining == 0
    }

    /// How long to sleep before permits become available, rolling the window
    /// over if it already has.
    fn time_until_reset(&mut self, now: Instant) -> Duration {
        if self.is_rate_limited(now) {
            self.increase_at - now
        } else {
            Duration::ZERO
        }
    }

    /// Time left until `increase_at`, saturating at zero.
    pub(crate) fn time_until_increase(&self, now: Instant) -> Duration {
        self.increase_at.saturating_duration_since(now)
    }
}

impl WindowedLimiter {
    /// Create a limiter with a single permit per one-second window.
    ///
    /// These placeholder parameters admit exactly one call before queueing;
    /// real values are installed once a response reveals them.
    pub fn new(name: impl Into<Box<str>>) -> Self {
        let period = Duration::from_secs(1);

        Self {
            window: Arc::new(Mutex::new(Window {
                name: name.into(),
                limit: 1,
                remaining: 1,
                period,
                increase_at: Instant::now() + period,
                out_of_sync: false,
                queue: VecDeque::new(),
                drain: None,
                closed: false,
            })),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().expect(POISONED)
    }

    /// Acquire one permit, waiting in line if the window is exhausted.
    ///
    /// Completion order is strictly first-come-first-served with respect to
    /// the order of `acquire` calls.
    ///
    /// Must be called from within a Tokio runtime, as draining the queue
    /// happens on a background task.
    ///
    /// # Errors
    ///
    /// The future resolves to an error of type [`Cancelled`] if the limiter
    /// is closed before the permit is granted.
    ///
    /// [`Cancelled`]: crate::error::RatelimitErrorType::Cancelled
    pub fn acquire(&self) -> Acquire {
        let mut window = self.lock();

        if window.closed {
            return Acquire::ready(Some(RatelimitError::cancelled()));
        }

        if window.drain.is_some() || window.is_rate_limited(Instant::now()) {
            let (tx, rx) = oneshot::channel();
            window.queue.push_back(tx);

            if window.drain.is_none() {
                window.drain = Some(tokio::spawn(drain(Arc::clone(&self.window))));
            }

            Acquire::waiting(rx)
        } else {
            window.remaining -= 1;

            Acquire::ready(None)
        }
    }

    /// Whether no acquisitions are queued.
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Cancel the drain task, if running, and every queued acquisition.
    pub fn close(&self) {
        let mut window = self.lock();
        window.closed = true;

        if let Some(drain) = window.drain.take() {
            drain.abort();
        }

        let pending = window.queue.len();
        window.queue.clear();

        if pending > 0 {
            tracing::debug!(
                name = %window.name,
                pending,
                "rate limiter closed with queued acquisitions",
            );
        } else {
            tracing::debug!(name = %window.name, "rate limiter closed");
        }
    }
}

/// Release queued acquisitions as the window refills, then dispose of the
/// task handle once the queue empties.
async fn drain(window: Arc<Mutex<Window>>) {
    loop {
        let wait = {
            let mut window = window.lock().expect(POISONED);

            if window.queue.is_empty() {
                window.drain = None;

                break;
            }

            let wait = window.time_until_reset(Instant::now());

            if !wait.is_zero() {
                tracing::debug!(
                    name = %window.name,
                    seconds = wait.as_secs_f64(),
                    "rate limited, waiting for the window to refill",
                );
            }

            wait
        };

        if !wait.is_zero() {
            time::sleep(wait).await;
        }

        let mut window = window.lock().expect(POISONED);

        while window.remaining > 0 {
            match window.queue.pop_front() {
                Some(tx) => {
                    if tx.send(()).is_ok() {
                        window.remaining -= 1;
                    }
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Acquire, WindowedLimiter};
    use static_assertions::assert_impl_all;
    use std::{fmt::Debug, future::Future};

    assert_impl_all!(Acquire: Debug, Future, Send, Sync);
    assert_impl_all!(WindowedLimiter: Debug, Send, Sync);
}
