//! Handling of the process-wide global rate limit.

use crate::{error::RatelimitError, windowed::Acquire};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{self, Duration, Instant},
};

const POISONED: &str = "global limiter state poisoned";

/// Rate limiter for the global rate limit.
///
/// The baseline state is unblocked: [`acquire`] completes immediately.
/// Calling [`throttle`] blocks the limiter for the given duration; any
/// acquisition made in the meantime is queued and released in order once the
/// duration elapses. Throttling again while already blocked replaces the
/// running timer, so the most recently reported `retry_after` wins.
///
/// [`acquire`]: Self::acquire
/// [`throttle`]: Self::throttle
#[derive(Debug, Default)]
pub struct ManualLimiter {
    shared: Arc<Mutex<Shared>>,
}

#[derive(Debug, Default)]
struct Shared {
    queue: VecDeque<oneshot::Sender<()>>,
    unlock: Option<JoinHandle<()>>,
    reset_at: Option<Instant>,
    /// Incremented by every `throttle`, so a superseded unlock task that has
    /// already passed its sleep does not release the queue early.
    epoch: u64,
    closed: bool,
}

impl ManualLimiter {
    /// Create a new, unblocked global limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no global rate limit is in effect.
    ///
    /// While unblocked the returned future is immediately ready; while
    /// blocked, the caller is queued at call time and released in order once
    /// the block lifts.
    ///
    /// # Errors
    ///
    /// The future resolves to an error of type [`Cancelled`] if the limiter
    /// is closed while the acquisition is queued.
    ///
    /// [`Cancelled`]: crate::error::RatelimitErrorType::Cancelled
    pub fn acquire(&self) -> Acquire {
        let mut shared = self.shared.lock().expect(POISONED);

        if shared.closed {
            return Acquire::ready(Some(RatelimitError::cancelled()));
        }

        if shared.unlock.is_some() {
            let (tx, rx) = oneshot::channel();
            shared.queue.push_back(tx);

            Acquire::waiting(rx)
        } else {
            Acquire::ready(None)
        }
    }

    /// Block all acquisitions for `retry_after`, releasing queued waiters in
    /// order once it elapses.
    pub fn throttle(&self, retry_after: Duration) {
        let mut shared = self.shared.lock().expect(POISONED);

        if shared.closed {
            return;
        }

        if let Some(unlock) = shared.unlock.take() {
            unlock.abort();
        }

        shared.epoch += 1;
        shared.reset_at = Some(Instant::now() + retry_after);

        let epoch = shared.epoch;
        shared.unlock = Some(tokio::spawn(unlock_later(
            Arc::clone(&self.shared),
            retry_after,
            epoch,
        )));
    }

    /// When the current global rate limit lifts, if one is in effect.
    pub fn reset_at(&self) -> Option<Instant> {
        self.shared.lock().expect(POISONED).reset_at
    }

    /// Cancel the running timer, if any, and every queued acquisition.
    pub fn close(&self) {
        let mut shared = self.shared.lock().expect(POISONED);
        shared.closed = true;
        shared.reset_at = None;

        if let Some(unlock) = shared.unlock.take() {
            unlock.abort();
        }

        let pending = shared.queue.len();
        shared.queue.clear();

        if pending > 0 {
            tracing::debug!(pending, "global rate limiter closed with queued acquisitions");
        } else {
            tracing::debug!("global rate limiter closed");
        }
    }
}

async fn unlock_later(shared: Arc<Mutex<Shared>>, retry_after: Duration, epoch: u64) {
    tracing::warn!(
        seconds = retry_after.as_secs_f64(),
        "globally rate limited, all requests are paused",
    );

    time::sleep(retry_after).await;

    let mut shared = shared.lock().expect(POISONED);

    if shared.epoch != epoch {
        return;
    }

    shared.reset_at = None;

    while let Some(tx) = shared.queue.pop_front() {
        let _ = tx.send(());
    }

    shared.unlock = None;
}

#[cfg(test)]
mod tests {
    use super::ManualLimiter;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(ManualLimiter: Debug, Default, Send, Sync);
}
