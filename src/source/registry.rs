//! Source registry: tag ownership, arming and record validation.
//!
//! The registry maps each [`NotificationTag`] to exactly one source and is
//! the only place that arms sources. Tags are checked for uniqueness before
//! any timer object or pin is touched, so a duplicate never leaves a
//! half-configured source behind.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;

use spin::RwLock;

use crate::channel::{ChannelHandle, NotificationRecord};
use crate::config::EventSetConfig;
use crate::driver::{Edge, GpioDriver, Pull};
use crate::error::{timer_error, Error, Result};
use crate::tag::{NotificationTag, SourceId};

use super::state::{SourceState, StateCell};
use super::{EventSource, OneShotTimer, PinHandle, Rejection, SourceKind, TimerBackend, TimerHandle};

enum Binding {
    Timer(Box<dyn OneShotTimer>),
    Pin { pin: u32, edge: Edge },
}

struct SourceEntry {
    origin: SourceId,
    state: StateCell,
    binding: Binding,
}

impl SourceEntry {
    fn kind(&self) -> SourceKind {
        match self.binding {
            Binding::Timer(_) => SourceKind::Timer,
            Binding::Pin { .. } => SourceKind::Pin,
        }
    }
}

/// Registry of every event source delivering into one channel.
///
/// Created once at startup and passed by reference to the dispatch loop.
pub struct SourceRegistry {
    channel: ChannelHandle,
    driver: Arc<dyn GpioDriver>,
    timers: Arc<dyn TimerBackend>,
    sources: RwLock<BTreeMap<NotificationTag, SourceEntry>>,
    next_origin: AtomicUsize,
}

impl SourceRegistry {
    /// Creates an empty registry delivering into `channel`.
    pub fn new(
        channel: ChannelHandle,
        driver: Arc<dyn GpioDriver>,
        timers: Arc<dyn TimerBackend>,
    ) -> Self {
        Self {
            channel,
            driver,
            timers,
            sources: RwLock::new(BTreeMap::new()),
            next_origin: AtomicUsize::new(0),
        }
    }

    /// Builds a registry for a whole event set.
    ///
    /// The set is validated first. Pins are then configured and armed, and
    /// timers started last. If any step fails, every source armed so far is
    /// disarmed and the error returned: startup never proceeds with a
    /// partially armed set.
    pub fn from_config(
        channel: ChannelHandle,
        driver: Arc<dyn GpioDriver>,
        timers: Arc<dyn TimerBackend>,
        config: &EventSetConfig,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Self::new(channel, driver, timers);
        if let Err(err) = registry.register_set(config) {
            error!("Event set setup failed: {}", err);
            registry.disarm_all();
            return Err(err);
        }
        Ok(registry)
    }

    fn register_set(&self, config: &EventSetConfig) -> Result {
        let mut countdowns = Vec::new();
        for entry in config.sources() {
            match entry.source {
                EventSource::Timer { period } => {
                    countdowns.push((self.register_timer(entry.tag)?, period));
                }
                EventSource::DigitalInputPin { pin, pull, edge } => {
                    self.register_pin_interrupt_with_pull(pin, pull, edge, entry.tag)?;
                }
            }
        }
        for (handle, period) in countdowns {
            self.arm_timer(handle, period)?;
        }
        Ok(())
    }

    /// Registers `source` under `tag` and arms it. Timers start counting
    /// down their period immediately.
    ///
    /// Each call stands alone: a later failure does not disarm sources
    /// registered by earlier calls. Use [`from_config`](Self::from_config)
    /// when a failed setup must leave nothing armed.
    pub fn register(&self, tag: NotificationTag, source: EventSource) -> Result<SourceId> {
        match source {
            EventSource::Timer { period } => {
                let handle = self.register_timer(tag)?;
                if let Err(err) = self.arm_timer(handle, period) {
                    self.remove(tag);
                    return Err(err);
                }
                Ok(handle.origin())
            }
            EventSource::DigitalInputPin { pin, pull, edge } => self
                .register_pin_interrupt_with_pull(pin, pull, edge, tag)
                .map(|handle| handle.origin()),
        }
    }

    /// Creates a timer delivering `tag`. The timer starts unarmed; see
    /// [`arm_timer`](Self::arm_timer).
    ///
    /// A failure leaves earlier registrations untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateTag`] if `tag` is taken.
    /// - [`Error::ResourceExhausted`] or [`Error::RegistrationFailed`] if the
    ///   timer object cannot be created.
    pub fn register_timer(&self, tag: NotificationTag) -> Result<TimerHandle> {
        let mut sources = self.sources.write();
        Self::claim(&sources, tag)?;

        let origin = self.next_origin();
        let timer = self
            .timers
            .create_timer(self.channel.clone(), tag, origin)
            .map_err(timer_error)?;

        debug!("Registered timer {} as tag {}", origin, tag);
        sources.insert(
            tag,
            SourceEntry {
                origin,
                state: StateCell::new(SourceState::Unarmed),
                binding: Binding::Timer(timer),
            },
        );
        Ok(TimerHandle { tag, origin })
    }

    /// Registers a pull-up input pin notifying `tag` on `edge`.
    pub fn register_pin_interrupt(&self, pin: u32, edge: Edge, tag: NotificationTag) -> Result<PinHandle> {
        self.register_pin_interrupt_with_pull(pin, Pull::Up, edge, tag)
    }

    /// Puts `pin` into input mode, configures its pull resistor and arms edge
    /// detection delivering `tag`. The pin is `Armed` on success.
    ///
    /// A failure only affects this pin: sources registered by earlier calls
    /// stay armed. [`from_config`](Self::from_config) rolls a whole set back.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateTag`] if `tag` is taken; the driver is not called.
    /// - [`Error::RegistrationFailed`] if `pin` already belongs to a source.
    /// - [`Error::Driver`] if any configuration step fails.
    pub fn register_pin_interrupt_with_pull(
        &self,
        pin: u32,
        pull: Pull,
        edge: Edge,
        tag: NotificationTag,
    ) -> Result<PinHandle> {
        let mut sources = self.sources.write();
        Self::claim(&sources, tag)?;
        let pin_taken = sources
            .values()
            .any(|entry| matches!(entry.binding, Binding::Pin { pin: p, .. } if p == pin));
        if pin_taken {
            return Err(Error::RegistrationFailed("pin already registered"));
        }

        let origin = self.next_origin();
        self.driver
            .configure_pin_input(pin)
            .map_err(|e| Error::driver(pin, "configure input", e))?;
        self.driver
            .configure_pull(pin, pull)
            .map_err(|e| Error::driver(pin, "configure pull", e))?;
        self.driver
            .arm_edge_notification(pin, edge, self.channel.clone(), tag, origin)
            .map_err(|e| Error::driver(pin, "arm edge detection", e))?;

        debug!("Registered pin {} ({:?}, {:?}) as tag {}", pin, pull, edge, tag);
        sources.insert(
            tag,
            SourceEntry {
                origin,
                state: StateCell::new(SourceState::Armed),
                binding: Binding::Pin { pin, edge },
            },
        );
        Ok(PinHandle { tag, origin, pin })
    }

    /// Starts the countdown of an unarmed timer.
    pub fn arm_timer(&self, handle: TimerHandle, after: Duration) -> Result {
        self.rearm(handle.tag(), after)
    }

    /// Arms the timer registered under `tag` to fire once after `after`.
    ///
    /// # Errors
    ///
    /// [`Error::RegistrationFailed`] if `tag` is not a timer, if the timer
    /// still has an outstanding arming, or if the timer object refuses it.
    pub fn rearm(&self, tag: NotificationTag, after: Duration) -> Result {
        let sources = self.sources.read();
        let entry = sources
            .get(&tag)
            .ok_or(Error::RegistrationFailed("no source registered for tag"))?;
        let Binding::Timer(timer) = &entry.binding else {
            return Err(Error::RegistrationFailed("only timers can be rearmed"));
        };

        entry
            .state
            .arm()
            .map_err(|_| Error::RegistrationFailed("timer already armed"))?;
        if let Err(err) = timer.arm(after) {
            entry.state.disarm();
            warn!("Timer tag {} could not be armed: {:?}", tag, err);
            return Err(Error::RegistrationFailed("timer refused arming"));
        }

        trace!("Timer tag {} armed for {:?}", tag, after);
        Ok(())
    }

    /// Validates a received record and moves its source to `Fired`.
    ///
    /// A record is accepted only if its tag is registered, its origin is the
    /// registration owning that tag, and the source is currently `Armed`.
    pub fn mark_fired(&self, record: &NotificationRecord) -> core::result::Result<SourceKind, Rejection> {
        let sources = self.sources.read();
        let entry = sources.get(&record.tag).ok_or(Rejection::Unregistered)?;
        if entry.origin != record.origin {
            return Err(Rejection::ForeignOrigin {
                expected: entry.origin,
            });
        }
        entry.state.fire().map_err(Rejection::NotArmed)?;
        Ok(entry.kind())
    }

    /// Completes the handling of a fired source.
    ///
    /// Pins return to `Armed`: the driver already cleared their latch. A timer
    /// is rearmed for `rearm` if given, otherwise it becomes `Unarmed`.
    pub fn complete(&self, tag: NotificationTag, rearm: Option<Duration>) -> Result {
        let kind = self.kind(tag);
        match (kind, rearm) {
            (Some(SourceKind::Timer), Some(after)) => self.rearm(tag, after),
            (Some(SourceKind::Timer), None) => {
                if let Some(entry) = self.sources.read().get(&tag) {
                    entry.state.disarm();
                }
                Ok(())
            }
            (Some(SourceKind::Pin), _) => {
                if let Some(entry) = self.sources.read().get(&tag) {
                    // A pin that was disarmed meanwhile stays unarmed.
                    if entry.state.load() == SourceState::Fired {
                        let _ = entry.state.arm();
                    }
                }
                Ok(())
            }
            (None, _) => Err(Error::RegistrationFailed("no source registered for tag")),
        }
    }

    /// Disarms every source: timers are cancelled and edge detection stopped.
    pub fn disarm_all(&self) {
        for (tag, entry) in self.sources.read().iter() {
            let result = match &entry.binding {
                Binding::Timer(timer) => timer.cancel(),
                Binding::Pin { pin, .. } => self.driver.disarm_edge_notification(*pin),
            };
            if let Err(err) = result {
                warn!("Failed to disarm source tag {}: {:?}", tag, err);
            }
            entry.state.disarm();
        }
        debug!("Disarmed all sources");
    }

    fn remove(&self, tag: NotificationTag) {
        self.sources.write().remove(&tag);
    }

    fn claim(sources: &BTreeMap<NotificationTag, SourceEntry>, tag: NotificationTag) -> Result {
        if sources.contains_key(&tag) {
            warn!("Tag {} is already registered", tag);
            return Err(Error::DuplicateTag(tag));
        }
        Ok(())
    }

    fn next_origin(&self) -> SourceId {
        SourceId(self.next_origin.fetch_add(1, Ordering::Relaxed))
    }

    /// Current state of the source registered under `tag`.
    pub fn state(&self, tag: NotificationTag) -> Option<SourceState> {
        self.sources.read().get(&tag).map(|entry| entry.state.load())
    }

    pub fn kind(&self, tag: NotificationTag) -> Option<SourceKind> {
        self.sources.read().get(&tag).map(SourceEntry::kind)
    }

    /// Origin stamped on records of the source registered under `tag`.
    pub fn origin(&self, tag: NotificationTag) -> Option<SourceId> {
        self.sources.read().get(&tag).map(|entry| entry.origin)
    }

    /// Pin and edge of the pin source registered under `tag`.
    pub fn pin(&self, tag: NotificationTag) -> Option<(u32, Edge)> {
        match self.sources.read().get(&tag)?.binding {
            Binding::Pin { pin, edge } => Some((pin, edge)),
            Binding::Timer(_) => None,
        }
    }

    /// Registered tags, in ascending order.
    pub fn tags(&self) -> Vec<NotificationTag> {
        self.sources.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }

    /// Channel handle sources deliver through.
    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    /// GPIO driver shared with actions that drive outputs.
    pub fn driver(&self) -> &Arc<dyn GpioDriver> {
        &self.driver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, WaitOutcome, Waiter};
    use crate::config::SourceConfig;
    use crate::driver::{SimGpio, SimOp};
    use axerrno::{AxError, AxResult};
    use core::sync::atomic::AtomicUsize;

    struct NoWait;

    impl Waiter for NoWait {
        fn wait(&self, _timeout: Option<Duration>) -> WaitOutcome {
            WaitOutcome::TimedOut
        }

        fn wake(&self) {}
    }

    /// Timer backend counting arm calls across all of its timers.
    #[derive(Default)]
    struct CountingTimers {
        arms: Arc<AtomicUsize>,
        cancels: Arc<AtomicUsize>,
        fail: bool,
    }

    struct CountingTimer {
        arms: Arc<AtomicUsize>,
        cancels: Arc<AtomicUsize>,
    }

    impl OneShotTimer for CountingTimer {
        fn arm(&self, _after: Duration) -> AxResult {
            self.arms.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn cancel(&self) -> AxResult {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl TimerBackend for CountingTimers {
        fn create_timer(
            &self,
            _channel: ChannelHandle,
            _tag: NotificationTag,
            _origin: SourceId,
        ) -> AxResult<Box<dyn OneShotTimer>> {
            if self.fail {
                return Err(AxError::NoMemory);
            }
            Ok(Box::new(CountingTimer {
                arms: Arc::clone(&self.arms),
                cancels: Arc::clone(&self.cancels),
            }))
        }
    }

    struct Fixture {
        channel: Channel,
        gpio: Arc<SimGpio>,
        timers: Arc<CountingTimers>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                channel: Channel::create(NoWait).unwrap(),
                gpio: Arc::new(SimGpio::new()),
                timers: Arc::new(CountingTimers::default()),
            }
        }

        fn registry(&self) -> SourceRegistry {
            SourceRegistry::new(self.channel.connect(), self.gpio.clone(), self.timers.clone())
        }

        fn arms(&self) -> usize {
            self.timers.arms.load(Ordering::SeqCst)
        }
    }

    fn record(tag: u32, origin: SourceId) -> NotificationRecord {
        NotificationRecord {
            tag: NotificationTag(tag),
            origin,
            seq: 0,
        }
    }

    #[test]
    fn test_register_pin_configures_driver() {
        let fx = Fixture::new();
        let registry = fx.registry();

        let handle = registry
            .register_pin_interrupt(16, Edge::Rising, NotificationTag(1))
            .unwrap();
        assert_eq!(handle.pin(), 16);
        assert_eq!(
            fx.gpio.calls_for(16),
            alloc::vec![SimOp::ConfigureInput, SimOp::ConfigurePull, SimOp::ArmEdge]
        );
        assert_eq!(fx.gpio.pull(16), Some(Pull::Up));
        assert!(fx.gpio.is_armed(16));
        assert_eq!(registry.state(NotificationTag(1)), Some(SourceState::Armed));
        assert_eq!(registry.pin(NotificationTag(1)), Some((16, Edge::Rising)));
    }

    #[test]
    fn test_duplicate_tag_rejected_before_driver() {
        let fx = Fixture::new();
        let registry = fx.registry();

        registry.register_timer(NotificationTag(0)).unwrap();
        assert_eq!(
            registry.register_pin_interrupt(20, Edge::Rising, NotificationTag(0)),
            Err(Error::DuplicateTag(NotificationTag(0)))
        );
        assert!(fx.gpio.calls_for(20).is_empty());
        assert_eq!(
            registry.register_timer(NotificationTag(0)),
            Err(Error::DuplicateTag(NotificationTag(0)))
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.state(NotificationTag(0)), Some(SourceState::Unarmed));
    }

    #[test]
    fn test_immediate_duplicate_keeps_earlier_source_armed() {
        let fx = Fixture::new();
        let registry = fx.registry();

        registry.register_pin_interrupt(16, Edge::Rising, NotificationTag(1)).unwrap();
        assert_eq!(
            registry.register_pin_interrupt(20, Edge::Rising, NotificationTag(1)),
            Err(Error::DuplicateTag(NotificationTag(1)))
        );

        assert_eq!(registry.state(NotificationTag(1)), Some(SourceState::Armed));
        assert!(fx.gpio.is_armed(16));
        assert!(!fx.gpio.is_armed(20));
        assert_eq!(registry.pin(NotificationTag(1)), Some((16, Edge::Rising)));
    }

    #[test]
    fn test_pin_cannot_be_registered_twice() {
        let fx = Fixture::new();
        let registry = fx.registry();
        registry.register_pin_interrupt(16, Edge::Rising, NotificationTag(1)).unwrap();
        assert!(matches!(
            registry.register_pin_interrupt(16, Edge::Falling, NotificationTag(2)),
            Err(Error::RegistrationFailed(_))
        ));
    }

    #[test]
    fn test_driver_error_leaves_no_source() {
        let fx = Fixture::new();
        fx.gpio.fail_on(20, SimOp::ArmEdge, AxError::Io);
        let registry = fx.registry();

        let err = registry
            .register_pin_interrupt(20, Edge::Rising, NotificationTag(2))
            .unwrap_err();
        assert_eq!(err, Error::driver(20, "arm edge detection", AxError::Io));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_timer_creation_failure() {
        let fx = Fixture {
            timers: Arc::new(CountingTimers {
                fail: true,
                ..Default::default()
            }),
            ..Fixture::new()
        };
        let registry = fx.registry();
        assert_eq!(
            registry.register_timer(NotificationTag(0)),
            Err(Error::ResourceExhausted("timer"))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_timer_single_outstanding_arming() {
        let fx = Fixture::new();
        let registry = fx.registry();
        let timer = registry.register_timer(NotificationTag(0)).unwrap();

        registry.arm_timer(timer, Duration::from_secs(5)).unwrap();
        assert!(registry.rearm(NotificationTag(0), Duration::from_secs(5)).is_err());
        assert_eq!(fx.arms(), 1);

        let kind = registry.mark_fired(&record(0, timer.origin())).unwrap();
        assert_eq!(kind, SourceKind::Timer);
        assert_eq!(registry.state(NotificationTag(0)), Some(SourceState::Fired));

        registry.complete(NotificationTag(0), Some(Duration::from_secs(5))).unwrap();
        assert_eq!(registry.state(NotificationTag(0)), Some(SourceState::Armed));
        assert_eq!(fx.arms(), 2);

        // Fired without a rearm policy: the timer stops.
        registry.mark_fired(&record(0, timer.origin())).unwrap();
        registry.complete(NotificationTag(0), None).unwrap();
        assert_eq!(registry.state(NotificationTag(0)), Some(SourceState::Unarmed));
    }

    #[test]
    fn test_mark_fired_rejections() {
        let fx = Fixture::new();
        let registry = fx.registry();
        let timer = registry.register_timer(NotificationTag(0)).unwrap();
        let pin = registry
            .register_pin_interrupt(16, Edge::Rising, NotificationTag(1))
            .unwrap();

        assert_eq!(
            registry.mark_fired(&record(9, timer.origin())),
            Err(Rejection::Unregistered)
        );
        assert_eq!(
            registry.mark_fired(&record(0, pin.origin())),
            Err(Rejection::ForeignOrigin {
                expected: timer.origin()
            })
        );
        // Registered but never armed: a record for it is stale.
        assert_eq!(
            registry.mark_fired(&record(0, timer.origin())),
            Err(Rejection::NotArmed(SourceState::Unarmed))
        );

        assert!(registry.mark_fired(&record(1, pin.origin())).is_ok());
        assert_eq!(
            registry.mark_fired(&record(1, pin.origin())),
            Err(Rejection::NotArmed(SourceState::Fired))
        );
        registry.complete(NotificationTag(1), None).unwrap();
        assert_eq!(registry.state(NotificationTag(1)), Some(SourceState::Armed));
    }

    #[test]
    fn test_from_config_rejects_duplicates_before_arming() {
        let fx = Fixture::new();
        let config = EventSetConfig::new(alloc::vec![
            SourceConfig::new(NotificationTag(0), EventSource::timer(Duration::from_secs(5))),
            SourceConfig::new(NotificationTag(1), EventSource::pin(16, Edge::Rising)),
            SourceConfig::new(NotificationTag(1), EventSource::pin(20, Edge::Rising)),
        ]);

        let result = SourceRegistry::from_config(
            fx.channel.connect(),
            fx.gpio.clone(),
            fx.timers.clone(),
            &config,
        );
        assert!(matches!(result, Err(Error::DuplicateTag(NotificationTag(1)))));
        assert!(!fx.gpio.is_armed(16));
        assert!(!fx.gpio.is_armed(20));
        assert!(fx.gpio.calls().is_empty());
        assert_eq!(fx.arms(), 0);
    }

    #[test]
    fn test_from_config_rolls_back_on_driver_error() {
        let fx = Fixture::new();
        fx.gpio.fail_on(20, SimOp::ConfigurePull, AxError::Io);

        let result = SourceRegistry::from_config(
            fx.channel.connect(),
            fx.gpio.clone(),
            fx.timers.clone(),
            &EventSetConfig::button_demo(),
        );
        assert!(matches!(result, Err(Error::Driver { pin: 20, .. })));
        // Pin 16 was armed before pin 20 failed and has been rolled back.
        assert!(!fx.gpio.is_armed(16));
        assert_eq!(fx.arms(), 0);
    }

    #[test]
    fn test_from_config_button_demo() {
        let fx = Fixture::new();
        let registry = SourceRegistry::from_config(
            fx.channel.connect(),
            fx.gpio.clone(),
            fx.timers.clone(),
            &EventSetConfig::button_demo(),
        )
        .unwrap();

        assert_eq!(registry.len(), 3);
        for tag in registry.tags() {
            assert_eq!(registry.state(tag), Some(SourceState::Armed));
        }
        assert_eq!(registry.kind(EventSetConfig::TIMEOUT), Some(SourceKind::Timer));
        assert_eq!(fx.arms(), 1);

        registry.disarm_all();
        assert!(!fx.gpio.is_armed(16));
        assert_eq!(fx.timers.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state(EventSetConfig::BUTTON_1), Some(SourceState::Unarmed));
    }
}
