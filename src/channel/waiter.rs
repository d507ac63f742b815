//! Blocking primitive used by a channel's receive side.
//!
//! The queue itself is guarded by a spin lock so sources can submit from
//! interrupt context. Blocking is delegated to a [`Waiter`], which is the only
//! platform-specific piece: a hosted build parks the thread on a condition
//! variable, a bare-metal build could halt the core until the next interrupt.

use core::time::Duration;

/// Result of a single [`Waiter::wait`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A wake-up was delivered.
    Woken,
    /// The timeout elapsed with no wake-up.
    TimedOut,
    /// The wait was cut short by an unrelated signal.
    Interrupted,
}

/// Wake-up token shared between submitters and the single consumer.
///
/// A [`wake`](Waiter::wake) issued while nobody waits is remembered, so the
/// next [`wait`](Waiter::wait) returns immediately. Several wakes before one
/// wait collapse into a single token.
pub trait Waiter: Send + Sync {
    /// Blocks until woken, the timeout elapses, or the platform interrupts the
    /// wait. `None` waits forever. Must not spin.
    fn wait(&self, timeout: Option<Duration>) -> WaitOutcome;

    /// Delivers a wake-up. Must never block.
    fn wake(&self);
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        use std::sync::{Condvar, Mutex, PoisonError};
        use std::time::Instant;

        /// Hosted [`Waiter`] built on `std::sync::Condvar`.
        #[derive(Default)]
        pub struct CondvarWaiter {
            token: Mutex<bool>,
            cond: Condvar,
        }

        impl CondvarWaiter {
            pub fn new() -> Self {
                Self::default()
            }
        }

        impl Waiter for CondvarWaiter {
            fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
                let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);

                match timeout.map(|t| Instant::now().checked_add(t)) {
                    // Overflowing deadlines behave like an infinite wait.
                    None | Some(None) => {
                        while !*token {
                            token = self.cond.wait(token).unwrap_or_else(PoisonError::into_inner);
                        }
                    }
                    Some(Some(deadline)) => {
                        while !*token {
                            let now = Instant::now();
                            if now >= deadline {
                                return WaitOutcome::TimedOut;
                            }
                            let (guard, _) = self
                                .cond
                                .wait_timeout(token, deadline - now)
                                .unwrap_or_else(PoisonError::into_inner);
                            token = guard;
                        }
                    }
                }

                *token = false;
                WaitOutcome::Woken
            }

            fn wake(&self) {
                let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
                *token = true;
                self.cond.notify_one();
            }
        }
    }
}
