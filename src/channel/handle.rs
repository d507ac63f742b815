//! Submission handle given to event sources.
//!
//! A handle holds only a weak reference to the channel: it can deliver records
//! but cannot keep the channel alive, receive from it, or see what other
//! sources are registered. Submission never blocks and takes only the queue's
//! spin lock, so it is safe from interrupt context.

use alloc::sync::Weak;

use crate::error::{Error, Result};
use crate::tag::{NotificationTag, SourceId};

use super::Shared;

/// Connection to a [`Channel`](super::Channel) used by sources to submit records.
#[derive(Clone)]
pub struct ChannelHandle {
    shared: Weak<Shared>,
}

impl ChannelHandle {
    pub(super) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }

    /// Appends a record and wakes the consumer.
    ///
    /// Returns the record's sequence number on the channel.
    ///
    /// # Errors
    ///
    /// - [`Error::Fatal`] if the channel has been destroyed or closed.
    /// - [`Error::WouldBlock`] if a bounded channel is full; the record is dropped.
    pub fn submit(&self, tag: NotificationTag, origin: SourceId) -> Result<u64> {
        let shared = self.shared.upgrade().ok_or(Error::Fatal)?;
        if shared.is_closed() {
            return Err(Error::Fatal);
        }

        let seq = shared
            .queue
            .lock()
            .push(tag, origin)
            .map_err(|_| Error::WouldBlock)?;
        shared.waiter.wake();

        trace!("Submitted record #{} tag {} from {}", seq, tag, origin);
        Ok(seq)
    }

    /// Returns `true` while the channel exists and accepts records.
    pub fn is_connected(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| !shared.is_closed())
    }
}

impl core::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("connected", &self.is_connected())
            .finish()
    }
}
