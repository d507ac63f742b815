//! Identifiers carried by every notification record.

use core::fmt;

/// Application-chosen tag identifying why a notification fired.
///
/// The channel treats the tag as opaque payload. Tags must be unique across
/// all sources registered on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NotificationTag(pub u32);

impl fmt::Display for NotificationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NotificationTag {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Identity of the registration that submitted a record.
///
/// Issued by the source registry, one per registered source. The dispatch
/// loop compares it against the registration owning the record's tag to
/// reject forged or stale records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub usize);

impl SourceId {
    /// Origin used for records submitted outside any registration.
    pub const UNREGISTERED: Self = Self(usize::MAX);
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::UNREGISTERED {
            f.write_str("unregistered")
        } else {
            write!(f, "src#{}", self.0)
        }
    }
}
