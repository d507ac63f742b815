//! Software one-shot timers driven by a platform tick.
//!
//! [`SoftTimers`] keeps every outstanding countdown in a `timer_list` and is
//! advanced by the platform: a periodic tick interrupt or a hosted thread
//! calls [`SoftTimers::expire`] with the current monotonic time. Each expired
//! countdown submits exactly one record to the channel its timer was created
//! for.

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::time::Duration;

use axerrno::{ax_err, AxResult};
use spin::Mutex;
use timer_list::{TimeValue, TimerEvent, TimerList};

use crate::channel::ChannelHandle;
use crate::source::{OneShotTimer, TimerBackend};
use crate::tag::{NotificationTag, SourceId};

struct Expiry {
    key: usize,
    channel: ChannelHandle,
    tag: NotificationTag,
    origin: SourceId,
}

impl TimerEvent for Expiry {
    fn callback(self, now: TimeValue) {
        trace!("Timer {} expired at {:?}", self.key, now);
        if let Err(err) = self.channel.submit(self.tag, self.origin) {
            warn!("Timer {} notification lost: {}", self.key, err);
        }
    }
}

struct Wheel {
    list: TimerList<Expiry>,
    /// Time of the last tick; countdowns start from here.
    now: TimeValue,
    next_key: usize,
    live: usize,
    limit: Option<usize>,
}

/// Timer backend holding all countdowns of one dispatch core.
#[derive(Clone)]
pub struct SoftTimers {
    wheel: Arc<Mutex<Wheel>>,
}

impl SoftTimers {
    /// Constructs an empty backend with the clock at zero.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Constructs a backend that refuses to create more than `limit` timers.
    pub fn with_limit(limit: usize) -> Self {
        Self::build(Some(limit))
    }

    fn build(limit: Option<usize>) -> Self {
        Self {
            wheel: Arc::new(Mutex::new(Wheel {
                list: TimerList::new(),
                now: TimeValue::ZERO,
                next_key: 0,
                live: 0,
                limit,
            })),
        }
    }

    /// Advances the clock to `now` and fires every countdown due by then.
    ///
    /// Returns the number of timers that expired. Time never moves backwards:
    /// an earlier `now` is ignored.
    pub fn expire(&self, now: TimeValue) -> usize {
        let mut wheel = self.wheel.lock();
        if now > wheel.now {
            wheel.now = now;
        }
        let now = wheel.now;

        let mut fired = 0;
        while let Some((_deadline, event)) = wheel.list.expire_one(now) {
            event.callback(now);
            fired += 1;
        }
        fired
    }

    /// Current clock value, as of the last [`expire`](Self::expire).
    pub fn now(&self) -> TimeValue {
        self.wheel.lock().now
    }

    /// Earliest outstanding deadline, for a tick source that sleeps until it.
    pub fn next_deadline(&self) -> Option<TimeValue> {
        self.wheel.lock().list.next_deadline()
    }

    /// Returns `true` if any countdown is outstanding.
    pub fn has_pending(&self) -> bool {
        !self.wheel.lock().list.is_empty()
    }
}

impl Default for SoftTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerBackend for SoftTimers {
    fn create_timer(
        &self,
        channel: ChannelHandle,
        tag: NotificationTag,
        origin: SourceId,
    ) -> AxResult<Box<dyn OneShotTimer>> {
        let mut wheel = self.wheel.lock();
        if wheel.limit.is_some_and(|limit| wheel.live >= limit) {
            return ax_err!(NoMemory, "soft timer limit reached");
        }

        let key = wheel.next_key;
        wheel.next_key += 1;
        wheel.live += 1;

        Ok(Box::new(SoftTimer {
            key,
            wheel: Arc::clone(&self.wheel),
            channel,
            tag,
            origin,
        }))
    }
}

/// A single countdown in a [`SoftTimers`] backend.
pub struct SoftTimer {
    key: usize,
    wheel: Arc<Mutex<Wheel>>,
    channel: ChannelHandle,
    tag: NotificationTag,
    origin: SourceId,
}

impl OneShotTimer for SoftTimer {
    fn arm(&self, after: Duration) -> AxResult {
        let mut wheel = self.wheel.lock();
        let key = self.key;
        wheel.list.cancel(|event| event.key == key);

        let deadline = wheel.now.saturating_add(after);
        wheel.list.set(
            deadline,
            Expiry {
                key,
                channel: self.channel.clone(),
                tag: self.tag,
                origin: self.origin,
            },
        );
        trace!("Timer {} armed for {:?}", key, deadline);
        Ok(())
    }

    fn cancel(&self) -> AxResult {
        let key = self.key;
        self.wheel.lock().list.cancel(|event| event.key == key);
        Ok(())
    }
}

impl Drop for SoftTimer {
    fn drop(&mut self) {
        let key = self.key;
        let mut wheel = self.wheel.lock();
        wheel.list.cancel(|event| event.key == key);
        wheel.live -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, WaitOutcome, Waiter};

    struct NoWait;

    impl Waiter for NoWait {
        fn wait(&self, _timeout: Option<Duration>) -> WaitOutcome {
            WaitOutcome::TimedOut
        }

        fn wake(&self) {}
    }

    fn secs(s: u64) -> TimeValue {
        Duration::from_secs(s)
    }

    #[test]
    fn test_countdown_fires_once() {
        let channel = Channel::create(NoWait).unwrap();
        let timers = SoftTimers::new();
        let timer = timers
            .create_timer(channel.connect(), NotificationTag(0), SourceId(0))
            .unwrap();

        timer.arm(secs(5)).unwrap();
        assert_eq!(timers.next_deadline(), Some(secs(5)));
        assert_eq!(timers.expire(secs(4)), 0);
        assert_eq!(timers.expire(secs(5)), 1);
        assert_eq!(timers.expire(secs(20)), 0);

        assert_eq!(channel.try_receive().unwrap().tag, NotificationTag(0));
        assert_eq!(channel.pending(), 0);
    }

    #[test]
    fn test_rearm_counts_from_last_tick() {
        let channel = Channel::create(NoWait).unwrap();
        let timers = SoftTimers::new();
        let timer = timers
            .create_timer(channel.connect(), NotificationTag(0), SourceId(0))
            .unwrap();

        timer.arm(secs(5)).unwrap();
        timers.expire(secs(7));
        // Rearmed late: the next deadline drifts with the rearm point.
        timer.arm(secs(5)).unwrap();
        assert_eq!(timers.next_deadline(), Some(secs(12)));
    }

    #[test]
    fn test_arm_replaces_outstanding_countdown() {
        let channel = Channel::create(NoWait).unwrap();
        let timers = SoftTimers::new();
        let timer = timers
            .create_timer(channel.connect(), NotificationTag(0), SourceId(0))
            .unwrap();

        timer.arm(secs(5)).unwrap();
        timer.arm(secs(3)).unwrap();
        assert_eq!(timers.expire(secs(10)), 1);

        timer.arm(secs(1)).unwrap();
        timer.cancel().unwrap();
        assert!(!timers.has_pending());
        assert_eq!(timers.expire(secs(20)), 0);
    }

    #[test]
    fn test_limit_and_drop() {
        let channel = Channel::create(NoWait).unwrap();
        let timers = SoftTimers::with_limit(1);
        let first = timers
            .create_timer(channel.connect(), NotificationTag(0), SourceId(0))
            .unwrap();
        assert!(timers
            .create_timer(channel.connect(), NotificationTag(1), SourceId(1))
            .is_err());

        first.arm(secs(1)).unwrap();
        drop(first);
        assert!(!timers.has_pending());
        assert!(timers
            .create_timer(channel.connect(), NotificationTag(1), SourceId(1))
            .is_ok());
    }
}
