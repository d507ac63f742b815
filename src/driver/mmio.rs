//! BCM2711 GPIO register backend.
//!
//! Drives the GPIO block of the Raspberry Pi 4 directly through its memory
//! mapped registers. The platform maps [`GPIO_PHYS_BASE`] and hands the
//! virtual address to [`MmioGpio::new`]; the interrupt controller line for
//! the bank is routed to [`MmioGpio::handle_interrupt`].
//!
//! Edge detection latches a pin's bit in `GPEDS` until software writes a 1 to
//! it. The interrupt handler submits one record per latched, bound pin and
//! then clears the latches, so several edges on one pin between two handler
//! runs are delivered as a single notification.

use core::ptr::NonNull;

use arrayvec::ArrayVec;
use axerrno::{ax_err, AxResult};
use memory_addr::{PhysAddr, PAGE_SIZE_4K};
use spin::Mutex;

use crate::channel::ChannelHandle;
use crate::tag::{NotificationTag, SourceId};

use super::{Edge, GpioDriver, Pull};

/// Physical base address of the GPIO register block.
pub const GPIO_PHYS_BASE: PhysAddr = PhysAddr::from_usize(0xfe20_0000);

/// Size of the mapping needed for the register block.
pub const GPIO_REGION_SIZE: usize = PAGE_SIZE_4K;

/// Number of GPIO lines in the bank.
pub const MAX_PINS: u32 = 58;

/// Register indices, in 32-bit words from the block base.
pub mod reg {
    /// Function select, 10 pins per register, 3 bits each.
    pub const GPFSEL0: usize = 0;
    pub const GPSET0: usize = 7;
    pub const GPCLR0: usize = 10;
    pub const GPLEV0: usize = 13;
    /// Event detect status, write 1 to clear.
    pub const GPEDS0: usize = 16;
    pub const GPREN0: usize = 19;
    pub const GPFEN0: usize = 22;
    pub const GPHEN0: usize = 25;
    pub const GPLEN0: usize = 28;
    pub const GPAREN0: usize = 31;
    pub const GPAFEN0: usize = 34;
    /// Pull resistor control, 16 pins per register, 2 bits each.
    pub const GPIO_PUP_PDN_CNTRL0: usize = 57;
    /// Words spanned by the block.
    pub const COUNT: usize = 61;
}

const FSEL_INPUT: u32 = 0b000;
const FSEL_OUTPUT: u32 = 0b001;
const FSEL_MASK: u32 = 0b111;

const PULL_NONE: u32 = 0b00;
const PULL_UP: u32 = 0b01;
const PULL_DOWN: u32 = 0b10;
const PULL_MASK: u32 = 0b11;

const DETECT_ENABLES: [usize; 6] = [
    reg::GPREN0,
    reg::GPFEN0,
    reg::GPHEN0,
    reg::GPLEN0,
    reg::GPAREN0,
    reg::GPAFEN0,
];

struct PinBinding {
    pin: u32,
    channel: ChannelHandle,
    tag: NotificationTag,
    origin: SourceId,
}

/// GPIO driver writing the BCM2711 registers directly.
pub struct MmioGpio {
    base: NonNull<u32>,
    /// Serializes read-modify-write sequences on shared registers.
    rmw: Mutex<()>,
    /// Fixed capacity so the interrupt path never allocates.
    bindings: Mutex<ArrayVec<PinBinding, { MAX_PINS as usize }>>,
}

// SAFETY: all register access goes through volatile reads and writes on a
// block that `new` requires to be exclusively owned by this driver, and
// multi-step updates are serialized by `rmw`.
unsafe impl Send for MmioGpio {}
unsafe impl Sync for MmioGpio {}

impl MmioGpio {
    /// Creates a driver over a mapped register block.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`reg::COUNT`] readable and writable
    /// 32-bit words (the GPIO block mapped uncached, or plain memory in
    /// tests) that stay valid for the driver's lifetime and are not accessed
    /// by anything else.
    pub unsafe fn new(base: NonNull<u32>) -> Self {
        debug!("MmioGpio: register block at {:p}", base);
        Self {
            base,
            rmw: Mutex::new(()),
            bindings: Mutex::new(ArrayVec::new()),
        }
    }

    /// Reads the register at word `index`.
    pub fn read_register(&self, index: usize) -> AxResult<u32> {
        if index >= reg::COUNT {
            return ax_err!(InvalidInput, "GPIO register index out of range");
        }
        Ok(self.read(index))
    }

    /// Every caller derives `index` from a `reg` constant and a checked pin.
    fn read(&self, index: usize) -> u32 {
        debug_assert!(index < reg::COUNT);
        // SAFETY: in bounds of the block guaranteed by `new`.
        unsafe { self.base.as_ptr().add(index).read_volatile() }
    }

    fn write(&self, index: usize, value: u32) {
        debug_assert!(index < reg::COUNT);
        // SAFETY: in bounds of the block guaranteed by `new`.
        unsafe { self.base.as_ptr().add(index).write_volatile(value) }
    }

    fn modify(&self, index: usize, f: impl FnOnce(u32) -> u32) {
        let _guard = self.rmw.lock();
        let value = self.read(index);
        self.write(index, f(value));
    }

    /// Bank register offset and bit mask of `pin`.
    #[inline]
    const fn bank_bit(pin: u32) -> (usize, u32) {
        ((pin / 32) as usize, 1 << (pin % 32))
    }

    fn check(pin: u32) -> AxResult {
        if pin >= MAX_PINS {
            return ax_err!(InvalidInput, "GPIO pin out of range");
        }
        Ok(())
    }

    fn select(&self, pin: u32, function: u32) {
        let shift = (pin % 10) * 3;
        self.modify(reg::GPFSEL0 + (pin / 10) as usize, |v| {
            (v & !(FSEL_MASK << shift)) | (function << shift)
        });
    }

    fn function(&self, pin: u32) -> u32 {
        let shift = (pin % 10) * 3;
        (self.read(reg::GPFSEL0 + (pin / 10) as usize) >> shift) & FSEL_MASK
    }

    /// Clears every latched event and disables all detection, dropping every
    /// binding. Used once at startup before arming any pin.
    pub fn clear_all_events(&self) {
        let _guard = self.rmw.lock();
        self.write(reg::GPEDS0, u32::MAX);
        self.write(reg::GPEDS0 + 1, u32::MAX);
        for enable in DETECT_ENABLES {
            self.write(enable, 0);
            self.write(enable + 1, 0);
        }
        self.bindings.lock().clear();
    }

    /// Services the GPIO interrupt line.
    ///
    /// Submits one record per latched pin that has a binding, then clears the
    /// latched events so the pins can fire again. Returns the number of
    /// records delivered.
    pub fn handle_interrupt(&self) -> usize {
        let bindings = self.bindings.lock();
        let mut delivered = 0;

        for bank in 0..2 {
            let events = self.read(reg::GPEDS0 + bank);
            if events == 0 {
                continue;
            }

            for binding in bindings.iter() {
                let (binding_bank, bit) = Self::bank_bit(binding.pin);
                if binding_bank != bank || events & bit == 0 {
                    continue;
                }
                match binding.channel.submit(binding.tag, binding.origin) {
                    Ok(_) => delivered += 1,
                    Err(err) => warn!("GPIO {} event lost: {}", binding.pin, err),
                }
            }

            // Unbound pins are cleared too, or the line would stay asserted.
            self.write(reg::GPEDS0 + bank, events);
        }

        trace!("GPIO interrupt delivered {} record(s)", delivered);
        delivered
    }
}

impl GpioDriver for MmioGpio {
    fn configure_pin_input(&self, pin: u32) -> AxResult {
        Self::check(pin)?;
        self.select(pin, FSEL_INPUT);
        Ok(())
    }

    fn configure_pin_output(&self, pin: u32) -> AxResult {
        Self::check(pin)?;
        self.select(pin, FSEL_OUTPUT);
        Ok(())
    }

    fn configure_pull(&self, pin: u32, pull: Pull) -> AxResult {
        Self::check(pin)?;
        let bits = match pull {
            Pull::None => PULL_NONE,
            Pull::Up => PULL_UP,
            Pull::Down => PULL_DOWN,
        };
        let shift = (pin % 16) * 2;
        self.modify(reg::GPIO_PUP_PDN_CNTRL0 + (pin / 16) as usize, |v| {
            (v & !(PULL_MASK << shift)) | (bits << shift)
        });
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
        Self::check(pin)?;
        if self.function(pin) != FSEL_INPUT {
            return ax_err!(BadState, "edge detection requires an input pin");
        }

        {
            let mut bindings = self.bindings.lock();
            bindings.retain(|b| b.pin != pin);
            if bindings
                .try_push(PinBinding {
                    pin,
                    channel,
                    tag,
                    origin,
                })
                .is_err()
            {
                return ax_err!(NoMemory, "GPIO binding table full");
            }
        }

        let (bank, bit) = Self::bank_bit(pin);
        // Drop anything latched before the pin was ours.
        self.write(reg::GPEDS0 + bank, bit);
        self.modify(reg::GPREN0 + bank, |v| if edge.rising() { v | bit } else { v & !bit });
        self.modify(reg::GPFEN0 + bank, |v| if edge.falling() { v | bit } else { v & !bit });

        debug!("MmioGpio: GPIO {} armed for {:?} edges, tag {}", pin, edge, tag);
        Ok(())
    }

    fn disarm_edge_notification(&self, pin: u32) -> AxResult {
        Self::check(pin)?;
        let (bank, bit) = Self::bank_bit(pin);
        self.modify(reg::GPREN0 + bank, |v| v & !bit);
        self.modify(reg::GPFEN0 + bank, |v| v & !bit);
        self.bindings.lock().retain(|b| b.pin != pin);
        Ok(())
    }

    fn write_pin(&self, pin: u32, level: bool) -> AxResult {
        Self::check(pin)?;
        let (bank, bit) = Self::bank_bit(pin);
        let base = if level { reg::GPSET0 } else { reg::GPCLR0 };
        self.write(base + bank, bit);
        Ok(())
    }

    fn read_pin(&self, pin: u32) -> AxResult<bool> {
        Self::check(pin)?;
        let (bank, bit) = Self::bank_bit(pin);
        Ok(self.read(reg::GPLEV0 + bank) & bit != 0)
    }
}
