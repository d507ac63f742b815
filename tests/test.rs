use axerrno::AxResult;
use pulsegate::{
    CancellationToken, Channel, ChannelHandle, DispatchTable, Dispatcher, Edge, Error,
    EventSetConfig, EventSource, GpioDriver, NotificationRecord, NotificationTag, OneShotTimer,
    SimGpio, SoftTimers, SourceConfig, SourceId, SourceRegistry, SourceState, Step, TimerBackend,
    mirror_action,
};
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: NotificationTag = EventSetConfig::TIMEOUT;
const BUTTON_1: NotificationTag = EventSetConfig::BUTTON_1;
const BUTTON_2: NotificationTag = EventSetConfig::BUTTON_2;

/// Timer backend that only counts arm calls; firings are fed by hand.
#[derive(Default)]
struct FakeTimers {
    arms: Arc<AtomicUsize>,
}

struct FakeTimer {
    arms: Arc<AtomicUsize>,
}

impl OneShotTimer for FakeTimer {
    fn arm(&self, _after: Duration) -> AxResult {
        self.arms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cancel(&self) -> AxResult {
        Ok(())
    }
}

impl TimerBackend for FakeTimers {
    fn create_timer(
        &self,
        _channel: ChannelHandle,
        _tag: NotificationTag,
        _origin: SourceId,
    ) -> AxResult<Box<dyn OneShotTimer>> {
        Ok(Box::new(FakeTimer {
            arms: Arc::clone(&self.arms),
        }))
    }
}

#[test]
fn test_button_scenario_dispatch_order() {
    let channel = Channel::new().unwrap();
    let gpio = Arc::new(SimGpio::new());
    let timers = Arc::new(FakeTimers::default());
    let registry = SourceRegistry::from_config(
        channel.connect(),
        gpio.clone(),
        timers.clone(),
        &EventSetConfig::button_demo(),
    )
    .unwrap();
    let initial_arms = timers.arms.load(Ordering::SeqCst);
    assert_eq!(initial_arms, 1);

    // Synthetic records in the order [1, 0, 2, 0], each from its own source.
    let handle = channel.connect();
    for tag in [BUTTON_1, TIMEOUT, BUTTON_2, TIMEOUT] {
        handle.submit(tag, registry.origin(tag).unwrap()).unwrap();
    }

    let actions = RefCell::new(Vec::new());
    let table = DispatchTable::new()
        .on(TIMEOUT, |_| actions.borrow_mut().push("timeout"))
        .on(BUTTON_1, |_| actions.borrow_mut().push("button1"))
        .on(BUTTON_2, |_| actions.borrow_mut().push("button2"));
    let config = EventSetConfig::button_demo();
    let mut dispatcher = Dispatcher::new(&registry, table, config.rearm_table());

    for _ in 0..4 {
        assert!(matches!(
            dispatcher.step(&channel, Some(Duration::from_secs(1))),
            Ok(Step::Dispatched(_))
        ));
    }

    let stats = dispatcher.stats();
    assert_eq!(stats.rearmed, 2);
    assert_eq!(stats.unknown + stats.rejected, 0);
    drop(dispatcher);

    assert_eq!(
        actions.into_inner(),
        ["button1", "timeout", "button2", "timeout"]
    );
    assert_eq!(timers.arms.load(Ordering::SeqCst) - initial_arms, 2);
    for tag in [TIMEOUT, BUTTON_1, BUTTON_2] {
        assert_eq!(registry.state(tag), Some(SourceState::Armed));
    }
}

#[test]
fn test_duplicate_tag_leaves_nothing_armed() {
    let channel = Channel::new().unwrap();
    let gpio = Arc::new(SimGpio::new());
    let timers = Arc::new(FakeTimers::default());
    let config = EventSetConfig::new(vec![
        SourceConfig::new(NotificationTag(7), EventSource::pin(16, Edge::Rising)),
        SourceConfig::new(NotificationTag(7), EventSource::timer(Duration::from_secs(5))),
    ]);

    let result = SourceRegistry::from_config(channel.connect(), gpio.clone(), timers.clone(), &config);
    assert!(matches!(result, Err(Error::DuplicateTag(NotificationTag(7)))));
    assert!(!gpio.is_armed(16));
    assert_eq!(timers.arms.load(Ordering::SeqCst), 0);
}

#[test]
fn test_end_to_end_with_threads() {
    let channel = Channel::new().unwrap();
    let gpio = Arc::new(SimGpio::new());
    let timers = SoftTimers::new();

    let config = EventSetConfig::button_demo();
    let registry = SourceRegistry::from_config(
        channel.connect(),
        gpio.clone(),
        Arc::new(timers.clone()),
        &config,
    )
    .unwrap();

    // Hardware side: one press of button 2, then the reminder timer expiring.
    let board = Arc::clone(&gpio);
    let clock = timers.clone();
    let hardware = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(10));
        board.set_level(20, false).unwrap();
        board.set_level(20, true).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        clock.expire(EventSetConfig::REMINDER_PERIOD);
    });

    gpio.configure_pin_output(21).unwrap();
    let seen: RefCell<Vec<NotificationRecord>> = RefCell::new(Vec::new());
    let cancel = CancellationToken::new();
    let mut mirror = mirror_action(gpio.clone(), 20, 21);

    let table = DispatchTable::new()
        .on(EventSetConfig::BUTTON_2, |record| {
            mirror(record);
            seen.borrow_mut().push(*record);
        })
        .on(EventSetConfig::TIMEOUT, |record| {
            seen.borrow_mut().push(*record);
            cancel.cancel();
        });
    let mut dispatcher = Dispatcher::new(&registry, table, config.rearm_table());

    assert_eq!(dispatcher.run(&channel, &cancel), Ok(()));
    hardware.join().unwrap();
    drop(dispatcher);

    let seen = seen.into_inner();
    let tags: Vec<_> = seen.iter().map(|r| r.tag).collect();
    assert_eq!(tags, [EventSetConfig::BUTTON_2, EventSetConfig::TIMEOUT]);
    assert!(seen[0].seq < seen[1].seq);

    // Button released (input high) drives the mirrored output low.
    assert_eq!(gpio.read_pin(21), Ok(false));
    // The timer was rearmed from the tick it fired at.
    assert_eq!(timers.next_deadline(), Some(EventSetConfig::REMINDER_PERIOD * 2));
}
