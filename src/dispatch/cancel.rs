use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// Cooperative shutdown request for the dispatch loop.
///
/// The loop checks the token once per iteration, before blocking on the
/// channel, never in the middle of an action. A loop blocked in `receive`
/// notices the cancellation after the next record.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
