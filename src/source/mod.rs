//! Event sources and their registration with a channel.
//!
//! Every source (the timer, each input pin) owns exactly one registration:
//! a unique [`NotificationTag`], a [`SourceId`] stamped on the records it
//! submits, and a [`SourceState`] tracked by the registry.
//!
//! The timer is one-shot: the dispatch loop rearms it after each firing. Pins
//! rearm implicitly because the driver clears its edge latch after every
//! delivered notification.

mod registry;
mod state;

use alloc::boxed::Box;
use core::fmt;
use core::time::Duration;

use axerrno::AxResult;

use crate::channel::ChannelHandle;
use crate::driver::{Edge, Pull};
use crate::tag::{NotificationTag, SourceId};

pub use registry::SourceRegistry;
pub use state::SourceState;

/// A physical or logical event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// Countdown timer firing `period` after each arming.
    Timer {
        /// Countdown armed at registration and after every firing.
        period: Duration,
    },
    /// Digital input notifying on edges of the given polarity.
    DigitalInputPin {
        /// Pin number.
        pin: u32,
        /// Pull resistor configured before arming.
        pull: Pull,
        /// Edge polarity that produces a notification.
        edge: Edge,
    },
}

impl EventSource {
    /// Timer source with the given period.
    pub const fn timer(period: Duration) -> Self {
        Self::Timer { period }
    }

    /// Pull-up input pin notifying on `edge`.
    pub const fn pin(pin: u32, edge: Edge) -> Self {
        Self::DigitalInputPin {
            pin,
            pull: Pull::Up,
            edge,
        }
    }

    pub const fn kind(&self) -> SourceKind {
        match self {
            Self::Timer { .. } => SourceKind::Timer,
            Self::DigitalInputPin { .. } => SourceKind::Pin,
        }
    }
}

/// Kind of a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Timer,
    Pin,
}

/// Why a record was refused by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No source is registered under the record's tag.
    Unregistered,
    /// The record's origin is not the registration owning the tag.
    ForeignOrigin {
        /// Origin of the registration owning the tag.
        expected: SourceId,
    },
    /// The source was not armed, so the record is stale or duplicated.
    NotArmed(SourceState),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered => f.write_str("no source registered for tag"),
            Self::ForeignOrigin { expected } => write!(f, "origin does not match {expected}"),
            Self::NotArmed(state) => write!(f, "source is {state:?}, not armed"),
        }
    }
}

/// Registration of a timer source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    tag: NotificationTag,
    origin: SourceId,
}

impl TimerHandle {
    pub fn tag(&self) -> NotificationTag {
        self.tag
    }

    pub fn origin(&self) -> SourceId {
        self.origin
    }
}

/// Registration of an input pin source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinHandle {
    tag: NotificationTag,
    origin: SourceId,
    pin: u32,
}

impl PinHandle {
    pub fn tag(&self) -> NotificationTag {
        self.tag
    }

    pub fn origin(&self) -> SourceId {
        self.origin
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }
}

/// A platform timer object with at most one outstanding countdown.
pub trait OneShotTimer: Send + Sync {
    /// Starts a countdown of `after`, replacing any outstanding one. On expiry
    /// the timer submits exactly one record to its channel.
    fn arm(&self, after: Duration) -> AxResult;

    /// Cancels the outstanding countdown, if any.
    fn cancel(&self) -> AxResult;
}

/// Factory for [`OneShotTimer`]s bound to a channel and tag.
pub trait TimerBackend: Send + Sync {
    /// Creates a timer delivering `tag` from `origin` into `channel`.
    ///
    /// Returns `AxError::NoMemory` when no more timers can be allocated.
    fn create_timer(
        &self,
        channel: ChannelHandle,
        tag: NotificationTag,
        origin: SourceId,
    ) -> AxResult<Box<dyn OneShotTimer>>;
}
