//! Per-source arming state machine.
//!
//! ```text
//! Unarmed ──arm──▶ Armed ──fire──▶ Fired ──arm──▶ Armed
//!    ▲                                │
//!    └──────────────disarm────────────┘
//! ```
//!
//! Transitions use compare-and-swap so a source can never hold two
//! outstanding armings and a record can only fire an armed source once.

use core::sync::atomic::{AtomicU8, Ordering};

/// Arming state of a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceState {
    /// Registered but not armed; its next occurrence produces nothing.
    Unarmed = 0,
    /// Its next occurrence produces exactly one notification.
    Armed = 1,
    /// A notification was consumed and the source awaits rearming.
    Fired = 2,
}

impl SourceState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Armed,
            2 => Self::Fired,
            _ => Self::Unarmed,
        }
    }
}

/// Atomic cell holding a [`SourceState`].
pub struct StateCell(AtomicU8);

impl StateCell {
    pub const fn new(state: SourceState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> SourceState {
        SourceState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Unarmed | Fired -> Armed`. Fails with the current state if already armed.
    pub fn arm(&self) -> Result<(), SourceState> {
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current == SourceState::Armed as u8 {
                return Err(SourceState::Armed);
            }

            match self.0.compare_exchange_weak(
                current,
                SourceState::Armed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(_) => continue,
            }
        }
    }

    /// `Armed -> Fired`. Fails with the current state otherwise.
    pub fn fire(&self) -> Result<(), SourceState> {
        self.0
            .compare_exchange(
                SourceState::Armed as u8,
                SourceState::Fired as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(SourceState::from_u8)
    }

    /// Any state `-> Unarmed`, returning the previous state.
    pub fn disarm(&self) -> SourceState {
        SourceState::from_u8(self.0.swap(SourceState::Unarmed as u8, Ordering::AcqRel))
    }
}
