//! Declarative description of an event set.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::time::Duration;

use crate::dispatch::{RearmPolicy, RearmTable};
use crate::driver::Edge;
use crate::error::{Error, Result};
use crate::source::EventSource;
use crate::tag::NotificationTag;

/// One source of an event set and the tag it delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceConfig {
    /// Tag carried by the source's notifications.
    pub tag: NotificationTag,
    /// The source itself.
    pub source: EventSource,
}

impl SourceConfig {
    pub const fn new(tag: NotificationTag, source: EventSource) -> Self {
        Self { tag, source }
    }
}

/// The complete set of sources one dispatch core is built from.
#[derive(Debug, Clone, Default)]
pub struct EventSetConfig {
    sources: Vec<SourceConfig>,
}

impl EventSetConfig {
    /// Tag of the reminder timer in [`button_demo`](Self::button_demo).
    pub const TIMEOUT: NotificationTag = NotificationTag(0);
    /// Tag of the button on GPIO 16 in [`button_demo`](Self::button_demo).
    pub const BUTTON_1: NotificationTag = NotificationTag(1);
    /// Tag of the button on GPIO 20 in [`button_demo`](Self::button_demo).
    pub const BUTTON_2: NotificationTag = NotificationTag(2);

    /// Period of the reminder timer in [`button_demo`](Self::button_demo).
    pub const REMINDER_PERIOD: Duration = Duration::from_secs(5);

    pub fn new(sources: Vec<SourceConfig>) -> Self {
        Self { sources }
    }

    /// Two pull-up buttons on GPIO 16 and 20 notifying on rising edges, and a
    /// 5 second reminder timer. Only the timer's own firing restarts its
    /// countdown (see [`rearm_table`](Self::rearm_table)); button presses
    /// leave it running.
    pub fn button_demo() -> Self {
        Self::new(alloc::vec![
            SourceConfig::new(Self::TIMEOUT, EventSource::timer(Self::REMINDER_PERIOD)),
            SourceConfig::new(Self::BUTTON_1, EventSource::pin(16, Edge::Rising)),
            SourceConfig::new(Self::BUTTON_2, EventSource::pin(20, Edge::Rising)),
        ])
    }

    /// Appends a source.
    pub fn with(mut self, tag: NotificationTag, source: EventSource) -> Self {
        self.sources.push(SourceConfig::new(tag, source));
        self
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// Checks the set before any hardware is touched: tags must be unique and
    /// no pin may be claimed twice.
    pub fn validate(&self) -> Result {
        let mut tags = BTreeSet::new();
        let mut pins = BTreeSet::new();
        for entry in &self.sources {
            if !tags.insert(entry.tag) {
                return Err(Error::DuplicateTag(entry.tag));
            }
            if let EventSource::DigitalInputPin { pin, .. } = entry.source {
                if !pins.insert(pin) {
                    return Err(Error::RegistrationFailed("pin already registered"));
                }
            }
        }
        Ok(())
    }

    /// Rearm table restarting every timer with its own period.
    pub fn rearm_table(&self) -> RearmTable {
        let policies: BTreeMap<_, _> = self
            .sources
            .iter()
            .filter_map(|entry| match entry.source {
                EventSource::Timer { period } => Some((entry.tag, RearmPolicy::Immediate(period))),
                EventSource::DigitalInputPin { .. } => None,
            })
            .collect();
        RearmTable::from(policies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_demo_is_valid() {
        let config = EventSetConfig::button_demo();
        assert!(config.validate().is_ok());
        assert_eq!(config.sources().len(), 3);

        let rearm = config.rearm_table();
        assert_eq!(
            rearm.get(EventSetConfig::TIMEOUT),
            Some(RearmPolicy::Immediate(Duration::from_secs(5)))
        );
        assert_eq!(rearm.get(EventSetConfig::BUTTON_1), None);
        assert_eq!(rearm.get(EventSetConfig::BUTTON_2), None);
    }

    #[test]
    fn test_validate_duplicates() {
        let config = EventSetConfig::button_demo()
            .with(NotificationTag(2), EventSource::pin(21, Edge::Falling));
        assert_eq!(config.validate(), Err(Error::DuplicateTag(NotificationTag(2))));

        let config = EventSetConfig::button_demo()
            .with(NotificationTag(3), EventSource::pin(16, Edge::Falling));
        assert!(matches!(config.validate(), Err(Error::RegistrationFailed(_))));
    }
}
