//! Tag-indexed action and rearm tables.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::time::Duration;

use crate::channel::NotificationRecord;
use crate::driver::GpioDriver;
use crate::tag::NotificationTag;

/// Application action run synchronously for a notification. Must not block.
pub type Action<'a> = Box<dyn FnMut(&NotificationRecord) + 'a>;

/// Mapping from tag to the action it triggers.
#[derive(Default)]
pub struct DispatchTable<'a> {
    actions: BTreeMap<NotificationTag, Action<'a>>,
}

impl<'a> DispatchTable<'a> {
    pub fn new() -> Self {
        Self {
            actions: BTreeMap::new(),
        }
    }

    /// Maps `tag` to `action`, builder style.
    pub fn on<F>(mut self, tag: NotificationTag, action: F) -> Self
    where
        F: FnMut(&NotificationRecord) + 'a,
    {
        self.insert(tag, action);
        self
    }

    /// Maps `tag` to `action`, returning the action it replaces.
    pub fn insert<F>(&mut self, tag: NotificationTag, action: F) -> Option<Action<'a>>
    where
        F: FnMut(&NotificationRecord) + 'a,
    {
        self.actions.insert(tag, Box::new(action))
    }

    pub fn contains(&self, tag: NotificationTag) -> bool {
        self.actions.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub(crate) fn get_mut(&mut self, tag: NotificationTag) -> Option<&mut Action<'a>> {
        self.actions.get_mut(&tag)
    }
}

/// How a source is rearmed after its action completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RearmPolicy {
    /// Restart the countdown right after the action. The period runs from
    /// the rearm, so time spent in the action shifts every later firing.
    Immediate(Duration),
}

impl RearmPolicy {
    pub const fn period(self) -> Duration {
        match self {
            Self::Immediate(period) => period,
        }
    }
}

/// Mapping from tag to rearm policy. Tags without an entry are not rearmed.
#[derive(Debug, Clone, Default)]
pub struct RearmTable {
    policies: BTreeMap<NotificationTag, RearmPolicy>,
}

impl RearmTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: NotificationTag, policy: RearmPolicy) -> Self {
        self.policies.insert(tag, policy);
        self
    }

    pub fn insert(&mut self, tag: NotificationTag, policy: RearmPolicy) -> Option<RearmPolicy> {
        self.policies.insert(tag, policy)
    }

    pub fn get(&self, tag: NotificationTag) -> Option<RearmPolicy> {
        self.policies.get(&tag).copied()
    }
}

impl From<BTreeMap<NotificationTag, RearmPolicy>> for RearmTable {
    fn from(policies: BTreeMap<NotificationTag, RearmPolicy>) -> Self {
        Self { policies }
    }
}

/// Action driving `output` to the inverse of `input`: a pressed pull-up
/// button (input low) lights the output, releasing it turns it off.
pub fn mirror_action(
    driver: Arc<dyn GpioDriver>,
    input: u32,
    output: u32,
) -> impl FnMut(&NotificationRecord) + 'static {
    move |_record| {
        let result = driver
            .read_pin(input)
            .and_then(|level| driver.write_pin(output, !level));
        if let Err(err) = result {
            warn!("Mirroring GPIO {} to GPIO {} failed: {:?}", input, output, err);
        }
    }
}
