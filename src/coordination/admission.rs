//! Single-flight admission queue for the inference backend.
//!
//! Built on a one-permit [`Semaphore`], which hands out permits in request
//! order. A waiter whose future is dropped leaves the queue without ever
//! taking the slot; the holder's permit is returned when its
//! [`AdmissionTicket`] drops, so error, timeout and cancellation all
//! release the slot on the same path.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::{AppError, Result};

/// FIFO, single-holder gate in front of a constrained backend.
#[derive(Clone)]
pub struct AdmissionQueue {
    slot: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    hold_timeout: Option<Duration>,
}

/// Proof of holding the admission slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct AdmissionTicket {
    _permit: OwnedSemaphorePermit,
}

/// Decrements the waiting count however the wait ends.
struct WaitingGuard(Arc<AtomicUsize>);

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AdmissionQueue {
    /// Create an idle queue. `hold_timeout` bounds how long [`run`](Self::run)
    /// lets one request keep the slot.
    #[must_use]
    pub fn new(hold_timeout: Option<Duration>) -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
            waiting: Arc::new(AtomicUsize::new(0)),
            hold_timeout,
        }
    }

    /// Wait for the slot in FIFO order.
    ///
    /// Dropping the returned future before it resolves removes the caller
    /// from the queue without consuming the slot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Admission` if the queue has been closed.
    pub async fn acquire(&self) -> Result<AdmissionTicket> {
        let depth = self.waiting.fetch_add(1, Ordering::SeqCst) + 1;
        let _waiting = WaitingGuard(Arc::clone(&self.waiting));
        debug!(queue_depth = depth, "waiting for admission slot");

        let permit = Arc::clone(&self.slot)
            .acquire_owned()
            .await
            .map_err(|_| AppError::Admission("admission queue closed".into()))?;

        Ok(AdmissionTicket { _permit: permit })
    }

    /// Run `request` exclusively: wait for the slot, execute under the hold
    /// timeout, and release on every exit path.
    ///
    /// # Errors
    ///
    /// Propagates the request's own error, or returns
    /// `AppError::Admission` if the hold timeout elapses or the queue is
    /// closed.
    pub async fn run<F, T>(&self, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _ticket = self.acquire().await?;

        match self.hold_timeout {
            Some(limit) => match tokio::time::timeout(limit, request).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        hold_timeout_secs = limit.as_secs(),
                        "admission slot holder timed out, releasing slot"
                    );
                    Err(AppError::Admission(format!(
                        "request exceeded admission hold timeout of {}s",
                        limit.as_secs()
                    )))
                }
            },
            None => request.await,
        }
    }

    /// Number of callers currently waiting (including one that is about to
    /// be granted the slot).
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Whether the slot is currently held.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Stop admitting; current and future waiters fail with `AppError::Admission`.
    pub fn close(&self) {
        self.slot.close();
    }
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new(None)
    }
}
