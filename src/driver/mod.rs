//! GPIO driver collaborator.
//!
//! The dispatch core only needs a small capability set from the pin layer:
//! put a pin into input or output mode, select its pull resistor, arm edge
//! detection that submits into a channel, and drive or sample a level.
//! Two backends implement it:
//!
//! - [`MmioGpio`]: direct access to the BCM2711 register block.
//! - [`SimGpio`]: an in-memory pin model recording every call.
//!
//! After each delivered notification the driver clears its own edge latch, so
//! pins fire again without an explicit rearm from the dispatch loop.

pub(crate) mod mmio;
mod sim;

use axerrno::AxResult;

use crate::channel::ChannelHandle;
use crate::tag::{NotificationTag, SourceId};

pub use mmio::MmioGpio;
pub use sim::{SimCall, SimGpio, SimOp};

/// Pull resistor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    None,
    Up,
    Down,
}

/// Edge polarity that triggers a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// Returns `true` if a transition from `from` to `to` is detected.
    pub const fn detects(self, from: bool, to: bool) -> bool {
        match self {
            Self::Rising => !from && to,
            Self::Falling => from && !to,
            Self::Both => from != to,
        }
    }

    #[inline]
    pub const fn rising(self) -> bool {
        matches!(self, Self::Rising | Self::Both)
    }

    #[inline]
    pub const fn falling(self) -> bool {
        matches!(self, Self::Falling | Self::Both)
    }
}

/// Capability interface of a GPIO backend.
///
/// Methods take `&self`: a driver is shared between setup code, actions that
/// drive outputs, and the interrupt path delivering edge notifications.
pub trait GpioDriver: Send + Sync {
    /// Puts `pin` into input mode.
    fn configure_pin_input(&self, pin: u32) -> AxResult;

    /// Puts `pin` into output mode.
    fn configure_pin_output(&self, pin: u32) -> AxResult;

    /// Selects the pull resistor of `pin`.
    fn configure_pull(&self, pin: u32, pull: Pull) -> AxResult;

    /// Arms edge detection on `pin`. Each detected edge submits one record
    /// carrying `tag` and `origin` through `channel`.
    fn arm_edge_notification(
        &self,
        pin: u32,
        edge: Edge,
        channel: ChannelHandle,
        tag: NotificationTag,
        origin: SourceId,
    ) -> AxResult;

    /// Stops edge detection on `pin`.
    fn disarm_edge_notification(&self, pin: u32) -> AxResult;

    /// Drives an output pin high (`true`) or low.
    fn write_pin(&self, pin: u32, level: bool) -> AxResult;

    /// Samples the current level of `pin`.
    fn read_pin(&self, pin: u32) -> AxResult<bool>;
}
