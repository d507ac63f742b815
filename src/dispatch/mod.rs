//! The dispatch loop.
//!
//! Each iteration:
//!
//! 1. Blocks on the channel with no timeout. `Interrupted` is retried, a
//!    destroyed channel ends the loop.
//! 2. Validates the record against the [`SourceRegistry`] and marks the
//!    source `Fired`. Stale, duplicated or forged records are skipped.
//! 3. Looks the record's tag up in the [`DispatchTable`] and runs the action
//!    synchronously. Unknown tags are reported and skipped.
//! 4. Completes the source: rearms it right away if the [`RearmTable`] says
//!    so, before blocking again. This happens for registered sources that
//!    have no action too.

mod cancel;
mod table;

use core::time::Duration;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::source::{Rejection, SourceKind, SourceRegistry};
use crate::tag::NotificationTag;

pub use cancel::CancellationToken;
pub use table::{mirror_action, Action, DispatchTable, RearmPolicy, RearmTable};

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The action mapped to the tag ran.
    Dispatched(NotificationTag),
    /// No action is mapped to the tag.
    UnknownTag(NotificationTag),
    /// The registry refused the record.
    Rejected(NotificationTag, Rejection),
    /// The receive was interrupted and will be retried.
    Interrupted,
    /// A finite receive timeout elapsed.
    TimedOut,
}

/// Counters kept by the dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Records taken off the channel.
    pub received: u64,
    /// Actions run.
    pub dispatched: u64,
    /// Records whose tag had no action.
    pub unknown: u64,
    /// Records refused by the registry.
    pub rejected: u64,
    /// Receives interrupted by a signal.
    pub interrupted: u64,
    /// Timer rearms performed after an action.
    pub rearmed: u64,
}

/// Single consumer of a notification channel.
pub struct Dispatcher<'a> {
    registry: &'a SourceRegistry,
    actions: DispatchTable<'a>,
    rearm: RearmTable,
    stats: LoopStats,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a SourceRegistry, actions: DispatchTable<'a>, rearm: RearmTable) -> Self {
        Self {
            registry,
            actions,
            rearm,
            stats: LoopStats::default(),
        }
    }

    /// Runs iterations until `cancel` is set or the channel is destroyed.
    ///
    /// Returns `Ok(())` on cancellation and [`Error::Fatal`] if the channel
    /// went away. Every other error is logged and the loop carries on.
    pub fn run(&mut self, channel: &Channel, cancel: &CancellationToken) -> Result {
        info!(
            "Dispatch loop started: {} action(s), {} source(s)",
            self.actions.len(),
            self.registry.len()
        );

        while !cancel.is_cancelled() {
            match self.step(channel, None) {
                Ok(_) => {}
                Err(err) if err.is_fatal() => {
                    error!("Dispatch loop terminated: {}", err);
                    return Err(err);
                }
                Err(err) => warn!("Dispatch iteration failed: {}", err),
            }
        }

        info!("Dispatch loop cancelled after {} record(s)", self.stats.received);
        Ok(())
    }

    /// Performs one iteration, waiting at most `timeout` for a record.
    ///
    /// # Errors
    ///
    /// [`Error::Fatal`] if the channel was destroyed, or the error raised
    /// while rearming the source. The record is fully consumed either way.
    pub fn step(&mut self, channel: &Channel, timeout: Option<Duration>) -> Result<Step> {
        let record = match channel.receive(timeout) {
            Ok(record) => record,
            Err(Error::Interrupted) => {
                self.stats.interrupted += 1;
                warn!("Receive interrupted, retrying");
                return Ok(Step::Interrupted);
            }
            Err(Error::WouldBlock) => return Ok(Step::TimedOut),
            Err(err) => return Err(err),
        };
        self.stats.received += 1;
        let tag = record.tag;

        let kind = match self.registry.mark_fired(&record) {
            Ok(kind) => kind,
            Err(Rejection::Unregistered) if !self.actions.contains(tag) => {
                self.stats.unknown += 1;
                warn!("Unexpected notification tag {} from {}", tag, record.origin);
                return Ok(Step::UnknownTag(tag));
            }
            Err(reason) => {
                self.stats.rejected += 1;
                warn!("Dropping record #{} tag {}: {}", record.seq, tag, reason);
                return Ok(Step::Rejected(tag, reason));
            }
        };

        // Registered sources are completed even without an action.
        let step = match self.actions.get_mut(tag) {
            Some(action) => {
                trace!("Dispatching record #{} tag {}", record.seq, tag);
                action(&record);
                self.stats.dispatched += 1;
                Step::Dispatched(tag)
            }
            None => {
                self.stats.unknown += 1;
                warn!("No action for {:?} tag {} from {}", kind, tag, record.origin);
                Step::UnknownTag(tag)
            }
        };

        let rearm = self.rearm.get(tag).map(RearmPolicy::period);
        self.registry.complete(tag, rearm)?;
        if kind == SourceKind::Timer && rearm.is_some() {
            self.stats.rearmed += 1;
        }

        Ok(step)
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn registry(&self) -> &'a SourceRegistry {
        self.registry
    }
}
