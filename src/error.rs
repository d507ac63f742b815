//! Error taxonomy for channel setup, source registration and the dispatch loop.
//!
//! Setup-time errors (`ResourceExhausted`, `RegistrationFailed`, `DuplicateTag`,
//! `Driver`) abort startup. Inside the loop, `Interrupted` is retried, `Fatal`
//! terminates and everything else is logged and skipped.

use axerrno::AxError;

use crate::tag::NotificationTag;

/// Errors raised by the dispatch core.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The channel, its queue or a timer object could not be allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    /// A source could not be registered or its registration was misused.
    #[error("registration failed: {0}")]
    RegistrationFailed(&'static str),
    /// Another source on the same channel already uses this tag.
    #[error("tag {0} is already registered")]
    DuplicateTag(NotificationTag),
    /// The GPIO collaborator failed to configure a pin.
    #[error("gpio driver failed to {op} on pin {pin}: {cause:?}")]
    Driver {
        /// Pin being configured.
        pin: u32,
        /// Driver operation that failed.
        op: &'static str,
        /// Error reported by the driver.
        cause: AxError,
    },
    /// A blocking receive was interrupted by an unrelated signal.
    #[error("receive interrupted")]
    Interrupted,
    /// No record arrived before the timeout elapsed, or a bounded queue is full.
    #[error("operation would block")]
    WouldBlock,
    /// The channel was destroyed.
    #[error("channel destroyed")]
    Fatal,
}

impl Error {
    /// Builds a driver error for `pin` and the failed operation `op`.
    pub const fn driver(pin: u32, op: &'static str, cause: AxError) -> Self {
        Self::Driver { pin, op, cause }
    }

    /// Returns `true` if the dispatch loop must stop on this error.
    #[inline]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal)
    }

    /// Returns `true` if the operation can simply be retried.
    #[inline]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Interrupted | Self::WouldBlock)
    }
}

/// Result type used throughout the crate.
pub type Result<T = ()> = core::result::Result<T, Error>;

/// Maps a timer backend failure onto the registration taxonomy.
pub(crate) fn timer_error(err: AxError) -> Error {
    match err {
        AxError::NoMemory => Error::ResourceExhausted("timer"),
        _ => Error::RegistrationFailed("timer object could not be created"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Fatal.is_fatal());
        assert!(!Error::Interrupted.is_fatal());
        assert!(Error::Interrupted.is_transient());
        assert!(Error::WouldBlock.is_transient());
        assert!(!Error::DuplicateTag(NotificationTag(3)).is_transient());
    }

    #[test]
    fn test_timer_error_mapping() {
        assert_eq!(timer_error(AxError::NoMemory), Error::ResourceExhausted("timer"));
        assert!(matches!(
            timer_error(AxError::Unsupported),
            Error::RegistrationFailed(_)
        ));
    }

    #[test]
    fn test_error_display() {
        use alloc::string::ToString;

        let err = Error::driver(16, "configure pull", AxError::InvalidInput);
        assert_eq!(
            err.to_string(),
            "gpio driver failed to configure pull on pin 16: InvalidInput"
        );
        assert_eq!(
            Error::DuplicateTag(NotificationTag(2)).to_string(),
            "tag 2 is already registered"
        );
        assert_eq!(Error::Fatal.to_string(), "channel destroyed");
    }

    #[test]
    fn test_error_is_core_error() {
        fn describe(err: &dyn core::error::Error) -> alloc::string::String {
            alloc::format!("{err}")
        }

        assert_eq!(
            describe(&Error::ResourceExhausted("timer")),
            "resource exhausted: timer"
        );
        assert!(core::error::Error::source(&Error::WouldBlock).is_none());
    }
}
