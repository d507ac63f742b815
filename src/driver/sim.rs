//! In-memory GPIO backend.
//!
//! `SimGpio` stands in for a message-based GPIO server: every request is
//! recorded, individual operations can be made to fail, and input levels are
//! driven from outside with [`SimGpio::set_level`]. An edge matching the armed
//! polarity submits one record, after which the latch is clear again.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use axerrno::{ax_err, AxError, AxResult};
use spin::Mutex;

use crate::channel::ChannelHandle;
use crate::tag::{NotificationTag, SourceId};

use super::{Edge, GpioDriver, Pull};

/// Driver operation recorded by [`SimGpio`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimOp {
    ConfigureInput,
    ConfigureOutput,
    ConfigurePull,
    ArmEdge,
    DisarmEdge,
    Write,
    Read,
}

/// One request received by [`SimGpio`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimCall {
    pub pin: u32,
    pub op: SimOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum PinMode {
    #[default]
    Unconfigured,
    Input,
    Output,
}

#[derive(Clone)]
struct Arming {
    edge: Edge,
    channel: ChannelHandle,
    tag: NotificationTag,
    origin: SourceId,
}

#[derive(Default)]
struct SimPin {
    mode: PinMode,
    pull: Option<Pull>,
    level: bool,
    arming: Option<Arming>,
}

/// Simulated GPIO bank.
pub struct SimGpio {
    pin_count: u32,
    pins: Mutex<BTreeMap<u32, SimPin>>,
    calls: Mutex<Vec<SimCall>>,
    faults: Mutex<BTreeMap<(u32, SimOp), AxError>>,
}

impl SimGpio {
    /// Same pin count as the BCM2711 bank.
    pub const DEFAULT_PIN_COUNT: u32 = 58;

    pub fn new() -> Self {
        Self::with_pin_count(Self::DEFAULT_PIN_COUNT)
    }

    pub fn with_pin_count(pin_count: u32) -> Self {
        Self {
            pin_count,
            pins: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(BTreeMap::new()),
        }
    }

    /// Makes every later `op` on `pin` fail with `err`.
    pub fn fail_on(&self, pin: u32, op: SimOp, err: AxError) {
        self.faults.lock().insert((pin, op), err);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Drives the external level of an input pin.
    ///
    /// Returns `true` if the transition matched the armed edge and a record
    /// was submitted.
    pub fn set_level(&self, pin: u32, level: bool) -> AxResult<bool> {
        let arming = {
            let mut pins = self.pins.lock();
            let Some(state) = pins.get_mut(&pin).filter(|p| p.mode == PinMode::Input) else {
                return ax_err!(BadState, "pin is not configured as an input");
            };
            let previous = core::mem::replace(&mut state.level, level);
            state
                .arming
                .as_ref()
                .filter(|a| a.edge.detects(previous, level))
                .cloned()
        };

        let Some(arming) = arming else {
            return Ok(false);
        };

        match arming.channel.submit(arming.tag, arming.origin) {
            Ok(_) => Ok(true),
            Err(err) => {
                warn!("Pin {} edge notification lost: {}", pin, err);
                Ok(false)
            }
        }
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<SimCall> {
        self.calls.lock().clone()
    }

    /// Requests received for `pin`, in order.
    pub fn calls_for(&self, pin: u32) -> Vec<SimOp> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.pin == pin)
            .map(|c| c.op)
            .collect()
    }

    pub fn is_armed(&self, pin: u32) -> bool {
        self.pins
            .lock()
            .get(&pin)
            .is_some_and(|p| p.arming.is_some())
    }

    pub fn is_input(&self, pin: u32) -> bool {
        self.mode(pin) == PinMode::Input
    }

    pub fn is_output(&self, pin: u32) -> bool {
        self.mode(pin) == PinMode::Output
    }

    pub fn pull(&self, pin: u32) -> Option<Pull> {
        self.pins.lock().get(&pin).and_then(|p| p.pull)
    }

    /// Current level of `pin`, if it has been configured.
    pub fn level(&self, pin: u32) -> Option<bool> {
        self.pins
            .lock()
            .get(&pin)
            .filter(|p| p.mode != PinMode::Unconfigured)
            .map(|p| p.level)
    }

    fn mode(&self, pin: u32) -> PinMode {
        self.pins
            .lock()
            .get(&pin)
            .map_or(PinMode::Unconfigured, |p| p.mode)
    }

    /// Records the request and applies pin range checks and injected faults.
    fn request(&self, pin: u32, op: SimOp) -> AxResult {
        self.calls.lock().push(SimCall { pin, op });
        if pin >= self.pin_count {
            return ax_err!(InvalidInput, "pin out of range");
        }
        match self.faults.lock().get(&(pin, op)) {
            Some(&err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for SimGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl GpioDriver for SimGpio {
    fn configure_pin_input(&self, pin: u32) -> AxResult {
        self.request(pin, SimOp::ConfigureInput)?;
        self.pins.lock().entry(pin).or_default().mode = PinMode::Input;
        Ok(())
    }

    fn configure_pin_output(&self, pin: u32) -> AxResult {
        self.request(pin, SimOp::ConfigureOutput)?;
        let mut pins = self.pins.lock();
        let state = pins.entry(pin).or_default();
        state.mode = PinMode::Output;
        state.arming = None;
        Ok(())
    }

    fn configure_pull(&self, pin: u32, pull: Pull) -> AxResult {
        self.request(pin, SimOp::ConfigurePull)?;
        let mut pins = self.pins.lock();
        let state = pins.entry(pin).or_default();
        state.pull = Some(pull);
        // An open input settles at the level its resistor pulls to.
        if state.mode == PinMode::Input {
            match pull {
                Pull::Up => state.level = true,
                Pull::Down => state.level = false,
                Pull::None => {}
            }
        }
        Ok(())
    }

    fn arm_edge_notification(
        &self,
        pin: u32,
        edge: Edge,
        channel: ChannelHandle,
        tag: NotificationTag,
        origin: SourceId,
    ) -> AxResult {
        self.request(pin, SimOp::ArmEdge)?;
        let mut pins = self.pins.lock();
        let state = pins.entry(pin).or_default();
        if state.mode != PinMode::Input {
            return ax_err!(BadState, "edge detection requires an input pin");
        }
        debug!("SimGpio: pin {} armed for {:?} edges, tag {}", pin, edge, tag);
        state.arming = Some(Arming {
            edge,
            channel,
            tag,
            origin,
        });
        Ok(())
    }

    fn disarm_edge_notification(&self, pin: u32) -> AxResult {
        self.request(pin, SimOp::DisarmEdge)?;
        if let Some(state) = self.pins.lock().get_mut(&pin) {
            state.arming = None;
        }
        Ok(())
    }

    fn write_pin(&self, pin: u32, level: bool) -> AxResult {
        self.request(pin, SimOp::Write)?;
        match self.pins.lock().get_mut(&pin) {
            Some(state) if state.mode == PinMode::Output => {
                state.level = level;
                Ok(())
            }
            _ => ax_err!(BadState, "pin is not configured as an output"),
        }
    }

    fn read_pin(&self, pin: u32) -> AxResult<bool> {
        self.request(pin, SimOp::Read)?;
        self.level(pin)
            .ok_or_else(|| axerrno::ax_err_type!(BadState, "pin is not configured"))
    }
}
