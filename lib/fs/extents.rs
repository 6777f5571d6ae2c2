use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::Notify;

use crate::fs::CacheError;

const STATUS_IDLE: u8 = 0;
const STATUS_PENDING: u8 = 1;
const STATUS_COMPLETE: u8 = 2;
const STATUS_CANCELLED: u8 = 3;

/// Status of a file node's outstanding cached-data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtentStatus {
    /// No request has been issued.
    Idle,
    /// A request is outstanding; waiters are parked.
    Pending,
    /// The last request completed.
    Complete,
    /// The node was invalidated. Terminal.
    Cancelled,
}

/// Pending-request status and signal pair for a file node.
///
/// The extent subsystem itself lives outside this crate. This is only the
/// rendezvous its waiters park on, so invalidation can wake them with
/// [`CacheError::Cancelled`].
#[derive(Debug)]
pub struct ExtentState {
    status: AtomicU8,
    /// Wakes waiters when `status` leaves `PENDING`.
    notify: Notify,
}

impl Default for ExtentState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtentState {
    /// Creates an idle state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(STATUS_IDLE),
            notify: Notify::new(),
        }
    }

    /// The current status.
    #[must_use]
    pub fn status(&self) -> ExtentStatus {
        match self.status.load(Ordering::Acquire) {
            STATUS_IDLE => ExtentStatus::Idle,
            STATUS_PENDING => ExtentStatus::Pending,
            STATUS_COMPLETE => ExtentStatus::Complete,
            _ => ExtentStatus::Cancelled,
        }
    }

    /// Marks a request outstanding. Joining an already pending request is fine.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Cancelled`] once the node has been invalidated.
    pub fn begin_request(&self) -> Result<(), CacheError> {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            match current {
                STATUS_CANCELLED => return Err(CacheError::Cancelled),
                STATUS_PENDING => return Ok(()),
                _ => {}
            }
            match self.status.compare_exchange(
                current,
                STATUS_PENDING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Marks the outstanding request complete and wakes its waiters.
    pub fn complete_request(&self) {
        let _ = self.status.compare_exchange(
            STATUS_PENDING,
            STATUS_COMPLETE,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        self.notify.notify_waiters();
    }

    /// Cancels any outstanding request and wakes every waiter.
    ///
    /// Returns `true` if this call performed the cancellation.
    pub fn cancel(&self) -> bool {
        let previous = self.status.swap(STATUS_CANCELLED, Ordering::AcqRel);
        self.notify.notify_waiters();
        previous != STATUS_CANCELLED
    }

    /// Waits until no request is pending.
    ///
    /// The `Notified` future is pinned and `enable()`d before the status is
    /// read, so a `notify_waiters()` racing the check is not lost.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Cancelled`] if the node was invalidated before or
    /// while waiting.
    pub async fn wait(&self) -> Result<(), CacheError> {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            match self.status.load(Ordering::Acquire) {
                STATUS_CANCELLED => return Err(CacheError::Cancelled),
                STATUS_PENDING => {}
                _ => return Ok(()),
            }
            notified.await;
        }
    }
}
