//! Process-local notification channel.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  ┌────────────┐
//! │ SoftTimers │  │ GPIO driver│   any context, including interrupts
//! └─────┬──────┘  └─────┬──────┘
//!       │ submit()      │ submit()
//!       ▼               ▼
//! ┌──────────────────────────────┐
//! │ ChannelHandle (Weak<Shared>) │
//! └──────────────┬───────────────┘
//!                ▼
//! ┌──────────────────────────────┐
//! │ Shared                       │
//! │  - RecordQueue (spin Mutex)  │
//! │  - Waiter (wake token)       │
//! └──────────────┬───────────────┘
//!                │ receive()
//!                ▼
//!        single consumer loop
//! ```
//!
//! The [`Channel`] owns the shared state. Handles hold a weak reference, so
//! dropping or closing the channel makes every later submission fail with
//! [`Error::Fatal`](crate::Error::Fatal).

mod handle;
mod queue;
mod waiter;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use spin::Mutex;

use crate::error::{Error, Result};

pub use handle::ChannelHandle;
pub use queue::NotificationRecord;
pub use waiter::{WaitOutcome, Waiter};

#[cfg(feature = "std")]
pub use waiter::CondvarWaiter;

use queue::RecordQueue;

pub(crate) struct Shared {
    queue: Mutex<RecordQueue>,
    waiter: Box<dyn Waiter>,
    closed: AtomicBool,
}

impl Shared {
    #[inline]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Rendezvous point delivering notification records, in arrival order, to
/// exactly one consumer.
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    /// Creates an unbounded channel that blocks through `waiter`.
    pub fn create<W: Waiter + 'static>(waiter: W) -> Result<Self> {
        Ok(Self::from_parts(RecordQueue::new(), Box::new(waiter)))
    }

    /// Creates a channel holding at most `capacity` pending records.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceExhausted`] if `capacity` is zero or the queue storage
    /// cannot be allocated.
    pub fn with_capacity<W: Waiter + 'static>(waiter: W, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::ResourceExhausted("channel capacity is zero"));
        }
        let queue = RecordQueue::bounded(capacity)
            .ok_or(Error::ResourceExhausted("channel queue allocation failed"))?;
        Ok(Self::from_parts(queue, Box::new(waiter)))
    }

    /// Creates an unbounded channel backed by a [`CondvarWaiter`].
    #[cfg(feature = "std")]
    pub fn new() -> Result<Self> {
        Self::create(CondvarWaiter::new())
    }

    fn from_parts(queue: RecordQueue, waiter: Box<dyn Waiter>) -> Self {
        debug!("Creating notification channel");
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(queue),
                waiter,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a new handle that sources use to submit records.
    pub fn connect(&self) -> ChannelHandle {
        ChannelHandle::new(Arc::downgrade(&self.shared))
    }

    /// Receives the oldest pending record, blocking while the queue is empty.
    ///
    /// `None` blocks indefinitely. This is the only blocking operation of the
    /// dispatch core; it never spins.
    ///
    /// # Errors
    ///
    /// - [`Error::Fatal`] once the channel has been closed.
    /// - [`Error::WouldBlock`] if `timeout` elapsed with nothing to receive.
    /// - [`Error::Interrupted`] if the waiter was interrupted.
    pub fn receive(&self, timeout: Option<Duration>) -> Result<NotificationRecord> {
        loop {
            if let Some(record) = self.try_pop()? {
                return Ok(record);
            }

            match self.shared.waiter.wait(timeout) {
                // The token may predate a record that was already consumed.
                WaitOutcome::Woken => continue,
                WaitOutcome::TimedOut => return Err(Error::WouldBlock),
                WaitOutcome::Interrupted => return Err(Error::Interrupted),
            }
        }
    }

    /// Receives the oldest pending record without blocking.
    pub fn try_receive(&self) -> Result<NotificationRecord> {
        self.try_pop()?.ok_or(Error::WouldBlock)
    }

    fn try_pop(&self) -> Result<Option<NotificationRecord>> {
        if self.shared.is_closed() {
            return Err(Error::Fatal);
        }
        let record = self.shared.queue.lock().pop();
        if let Some(record) = &record {
            trace!("Received record #{} tag {}", record.seq, record.tag);
        }
        Ok(record)
    }

    /// Destroys the channel: pending records are discarded, every later
    /// `receive` and `submit` fails with [`Error::Fatal`].
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            debug!("Closing notification channel");
            self.shared.queue.lock().clear();
            self.shared.waiter.wake();
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Number of records waiting to be received.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Number of records rejected by a full bounded queue.
    pub fn dropped(&self) -> u64 {
        self.shared.queue.lock().dropped()
    }
}
