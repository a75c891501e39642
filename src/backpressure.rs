//! Backpressure for outbound frames.
//!
//! Producers can enqueue frames faster than a slow peer reads them. The
//! [`BackpressureController`] counts frames handed to the writer task but
//! not yet written. Once the count reaches the limit, `send` callers park
//! until the writer task releases slots after a batch write, or until the
//! backpressure timeout elapses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{RSocketError, Result};

struct Shared {
    pending: AtomicUsize,
    released: Notify,
}

/// Pending-frame counter shared by every writer handle and the writer task.
#[derive(Clone)]
pub struct BackpressureController {
    shared: Arc<Shared>,
    max_pending: usize,
    timeout: Duration,
}

impl BackpressureController {
    /// Allow up to `max_pending` unwritten frames; waiters give up after `timeout`.
    pub fn new(max_pending: usize, timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: AtomicUsize::new(0),
                released: Notify::new(),
            }),
            max_pending: max_pending.max(1),
            timeout,
        }
    }

    /// Whether the limit is reached.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.pending_count() >= self.max_pending
    }

    /// Frames reserved but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Reserve a slot without waiting.
    ///
    /// # Errors
    ///
    /// `BackpressureTimeout` if the limit is reached.
    pub fn try_reserve(&self) -> Result<()> {
        let max = self.max_pending;
        self.shared
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|_| RSocketError::BackpressureTimeout)
    }

    /// Reserve a slot, parking until one is released.
    ///
    /// # Errors
    ///
    /// `BackpressureTimeout` if no slot frees up within the timeout.
    pub async fn reserve(&self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            // Register interest before checking so a release in between is not lost.
            let released = self.shared.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.try_reserve().is_ok() {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                tracing::warn!(
                    pending = self.pending_count(),
                    max_pending = self.max_pending,
                    "backpressure timeout"
                );
                return Err(RSocketError::BackpressureTimeout);
            }
        }
    }

    /// Release `count` slots after a batch write and wake parked producers.
    pub fn release_many(&self, count: usize) {
        if count == 0 {
            return;
        }
        let _ = self
            .shared
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(count))
            });
        self.shared.released.notify_waiters();
    }
}

impl std::fmt::Debug for BackpressureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureController")
            .field("pending", &self.pending_count())
            .field("max_pending", &self.max_pending)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Gives a reserved slot back if the frame never reaches the writer task.
pub struct BackpressureGuard {
    controller: BackpressureController,
    armed: bool,
}

impl BackpressureGuard {
    /// Guard a slot already reserved on `controller`.
    pub fn new(controller: BackpressureController) -> Self {
        Self {
            controller,
            armed: true,
        }
    }

    /// The frame was queued; the writer task releases the slot.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for BackpressureGuard {
    fn drop(&mut self) {
        if self.armed {
            self.controller.release_many(1);
        }
    }
}
