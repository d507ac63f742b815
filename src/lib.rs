#![no_std]

//! # Pulsegate
//!
//! A single-threaded event dispatch core. A periodic timer and edge-triggered
//! GPIO interrupts deliver tagged notifications into one channel; a blocking
//! loop receives them in arrival order, runs the action mapped to each tag and
//! rearms the timer before blocking again.
//!
//! The crate is `no_std` and uses `alloc`. The `std` feature (on by default)
//! adds [`CondvarWaiter`], a hosted blocking primitive for the channel.
//!
//! ## Architecture
//!
//! ```text
//!  SoftTimers::expire ──┐           ┌── MmioGpio::handle_interrupt / SimGpio
//!                       ▼           ▼
//!                  ChannelHandle::submit(tag, origin)
//!                            │
//!                            ▼
//!                ┌─────────────────────┐
//!                │ Channel (FIFO queue) │  receive() blocks on a Waiter
//!                └──────────┬──────────┘
//!                           ▼
//!                ┌─────────────────────┐
//!                │     Dispatcher      │  validate → action → rearm
//!                └──────────┬──────────┘
//!                           ▼
//!                    SourceRegistry (tag → source, state, timer)
//! ```
//!
//! - [`Channel`]: rendezvous point delivering [`NotificationRecord`]s to one consumer.
//! - [`SourceRegistry`]: associates each timer or pin with a unique [`NotificationTag`].
//! - [`Dispatcher`]: the receive loop, with a [`CancellationToken`] checked once per iteration.
//! - [`GpioDriver`]: the pin collaborator, with [`MmioGpio`] and [`SimGpio`] backends.
//! - [`SoftTimers`]: one-shot timers driven by a platform tick.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pulsegate::*;
//!
//! let channel = Channel::new()?;
//! let gpio = Arc::new(SimGpio::new());
//! let timers = Arc::new(SoftTimers::new());
//! let config = EventSetConfig::button_demo();
//!
//! let registry = SourceRegistry::from_config(channel.connect(), gpio.clone(), timers.clone(), &config)?;
//!
//! let table = DispatchTable::new()
//!     .on(EventSetConfig::TIMEOUT, |_| info!("Press a button already!"))
//!     .on(EventSetConfig::BUTTON_1, |_| info!("Thank you for pressing button 1!"))
//!     .on(EventSetConfig::BUTTON_2, |_| info!("Thank you for pressing button 2!"));
//!
//! let mut dispatcher = Dispatcher::new(&registry, table, config.rearm_table());
//! dispatcher.run(&channel, &CancellationToken::new())?;
//! ```

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;
#[macro_use]
extern crate log;

mod channel;
mod config;
mod dispatch;
mod driver;
mod error;
mod source;
mod tag;
mod timer;

pub use channel::{Channel, ChannelHandle, NotificationRecord, WaitOutcome, Waiter};
pub use config::{EventSetConfig, SourceConfig};
pub use dispatch::{
    mirror_action, Action, CancellationToken, DispatchTable, Dispatcher, LoopStats, RearmPolicy,
    RearmTable, Step,
};
pub use driver::{Edge, GpioDriver, MmioGpio, Pull, SimCall, SimGpio, SimOp};
pub use error::{Error, Result};
pub use source::{
    EventSource, OneShotTimer, PinHandle, Rejection, SourceKind, SourceRegistry, SourceState,
    TimerBackend, TimerHandle,
};
pub use tag::{NotificationTag, SourceId};
pub use timer::{SoftTimer, SoftTimers};

#[cfg(feature = "std")]
pub use channel::CondvarWaiter;

/// Register block constants for the BCM2711 GPIO backend.
pub mod mmio {
    pub use crate::driver::mmio::{GPIO_PHYS_BASE, GPIO_REGION_SIZE, MAX_PINS, reg};
}
