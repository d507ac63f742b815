//! FIFO record queue backing a notification channel.
//!
//! Records are stamped with a monotonically increasing sequence number at
//! submission and popped strictly in that order. There is no priority
//! reordering: a record from the timer and one from a pin leave the queue in
//! the order they entered it.

use alloc::collections::VecDeque;

use crate::tag::{NotificationTag, SourceId};

/// A fixed-shape notification delivered through a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationRecord {
    /// Why the notification fired.
    pub tag: NotificationTag,
    /// The registration that submitted it.
    pub origin: SourceId,
    /// Arrival order on the channel, starting at zero.
    pub seq: u64,
}

/// Submission rejected because a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

pub struct RecordQueue {
    records: VecDeque<NotificationRecord>,
    /// `None` means kernel-buffered style: grows as needed.
    capacity: Option<usize>,
    next_seq: u64,
    dropped: u64,
}

impl RecordQueue {
    /// Creates an unbounded queue.
    pub fn new() -> Self {
        Self {
            records: VecDeque::new(),
            capacity: None,
            next_seq: 0,
            dropped: 0,
        }
    }

    /// Creates a queue holding at most `capacity` records, allocated up front.
    ///
    /// Returns `None` if the allocation fails.
    pub fn bounded(capacity: usize) -> Option<Self> {
        let mut records = VecDeque::new();
        records.try_reserve_exact(capacity).ok()?;
        Some(Self {
            records,
            capacity: Some(capacity),
            next_seq: 0,
            dropped: 0,
        })
    }

    /// Appends a record and returns its sequence number.
    pub fn push(&mut self, tag: NotificationTag, origin: SourceId) -> Result<u64, QueueFull> {
        if let Some(capacity) = self.capacity {
            if self.records.len() >= capacity {
                self.dropped += 1;
                return Err(QueueFull);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.push_back(NotificationRecord { tag, origin, seq });
        Ok(seq)
    }

    /// Removes the oldest record.
    pub fn pop(&mut self) -> Option<NotificationRecord> {
        self.records.pop_front()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Number of records rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Discards every pending record.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
