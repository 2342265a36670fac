//! Countdowns to the next phase boundary
//!
//! A countdown first ticks on the host clock's next whole second, then once
//! per interval, reporting the whole real seconds left until its target. The
//! tick that reports zero or less is the last one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sbte_core::DateTime;

use crate::host::{TimerHandle, TimerHost};

/// Identifies a countdown within its owner
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CountdownId(pub u64);

/// One countdown report
#[derive(Clone, Debug)]
pub struct CountdownTick<P> {
    pub id: CountdownId,
    /// Whole real seconds until the target, floored
    pub remaining_secs: i64,
    /// The boundary being counted down to
    pub target: DateTime,
    /// Start of the phase the countdown was started in, if known
    pub from: Option<DateTime>,
    /// Owner's phase at the time of the tick
    pub phase: P,
}

impl<P> CountdownTick<P> {
    /// True on the last tick
    pub fn is_final(&self) -> bool {
        self.remaining_secs <= 0
    }
}

pub type CountdownCallback<P> = Arc<dyn Fn(&CountdownTick<P>) + Send + Sync>;

/// Reads the owner's phase; `None` once the owner is gone
pub(crate) type PhaseReader<P> = Arc<dyn Fn() -> Option<P> + Send + Sync>;

/// Unix milliseconds of `at`, rounded up
pub(crate) fn target_millis(at: &DateTime) -> i64 {
    at.epoch().slow_seconds * 1000 + at.offset().as_slow_millis_ceil()
}

/// Real milliseconds from `now_millis` until `at`, never negative
pub(crate) fn millis_until(at: &DateTime, now_millis: i64) -> i64 {
    (target_millis(at) - now_millis).max(0)
}

#[derive(Default)]
struct TickState {
    handle: Option<TimerHandle>,
    stopped: bool,
}

pub(crate) struct Countdown<P> {
    id: CountdownId,
    host: Arc<dyn TimerHost>,
    interval_millis: i64,
    target: DateTime,
    target_millis: i64,
    from: Option<DateTime>,
    read_phase: PhaseReader<P>,
    callback: CountdownCallback<P>,
    state: Mutex<TickState>,
}

impl<P: Copy + Send + Sync + 'static> Countdown<P> {
    pub(crate) fn start(
        id: CountdownId,
        host: Arc<dyn TimerHost>,
        interval_millis: i64,
        target: DateTime,
        from: Option<DateTime>,
        read_phase: PhaseReader<P>,
        callback: CountdownCallback<P>,
    ) -> Arc<Self> {
        let countdown = Arc::new(Countdown {
            id,
            host,
            interval_millis,
            target,
            target_millis: target_millis(&target),
            from,
            read_phase,
            callback,
            state: Mutex::new(TickState::default()),
        });
        let now = countdown.host.now_millis();
        countdown.schedule_tick((1000 - now.rem_euclid(1000)) % 1000);
        tracing::debug!(id = id.0, target = %target, "countdown started");
        countdown
    }

    fn schedule_tick(self: &Arc<Self>, delay_millis: i64) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        let weak = Arc::downgrade(self);
        state.handle = Some(self.host.schedule(
            Duration::from_millis(delay_millis.max(0) as u64),
            Box::new(move || {
                if let Some(countdown) = weak.upgrade() {
                    countdown.tick();
                }
            }),
        ));
    }

    fn tick(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.handle = None;
        }
        let Some(phase) = (self.read_phase)() else {
            self.stop();
            return;
        };
        let remaining_secs = (self.target_millis - self.host.now_millis()).div_euclid(1000);
        let tick = CountdownTick {
            id: self.id,
            remaining_secs,
            target: self.target,
            from: self.from,
            phase,
        };
        if tick.is_final() {
            self.state.lock().stopped = true;
        }
        (self.callback)(&tick);
        if !tick.is_final() {
            self.schedule_tick(self.interval_millis);
        }
    }

    /// Stop ticking. Returns false if already stopped.
    pub(crate) fn stop(&self) -> bool {
        let mut state = self.state.lock();
        let was_running = !state.stopped;
        state.stopped = true;
        if let Some(handle) = state.handle.take() {
            self.host.cancel(handle);
        }
        was_running
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

impl<P> Drop for Countdown<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().handle.take() {
            self.host.cancel(handle);
        }
    }
}

/// Countdowns owned by one routine or scheduler
pub(crate) struct CountdownSet<P> {
    next_id: u64,
    active: HashMap<CountdownId, Arc<Countdown<P>>>,
}

impl<P: Copy + Send + Sync + 'static> CountdownSet<P> {
    pub(crate) fn new() -> Self {
        CountdownSet {
            next_id: 0,
            active: HashMap::new(),
        }
    }

    /// Drop finished countdowns and hand out a fresh id
    pub(crate) fn reserve(&mut self) -> CountdownId {
        self.active.retain(|_, countdown| !countdown.is_stopped());
        let id = CountdownId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, countdown: Arc<Countdown<P>>) {
        self.active.insert(countdown.id, countdown);
    }

    pub(crate) fn remove(&mut self, id: CountdownId) -> Option<Arc<Countdown<P>>> {
        self.active.remove(&id)
    }

    pub(crate) fn take_all(&mut self) -> Vec<Arc<Countdown<P>>> {
        self.active.drain().map(|(_, countdown)| countdown).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualTimerHost;
    use sbte_core::{Epoch, FAST_PER_SLOW};

    fn at_millis(millis: i64) -> DateTime {
        DateTime::from_unix_millis(Epoch::MAIN, millis)
    }

    #[test]
    fn test_target_millis_rounds_up() {
        let epoch_ms = Epoch::MAIN.slow_seconds * 1000;
        let at = DateTime::from_offset(Epoch::MAIN, sbte_core::Duration::from_fast_secs(1));
        // 1/72 s is 13.9ms
        assert_eq!(target_millis(&at), epoch_ms + 14);
        let at = DateTime::from_offset(
            Epoch::MAIN,
            sbte_core::Duration::from_fast_secs(FAST_PER_SLOW),
        );
        assert_eq!(target_millis(&at), epoch_ms + 1000);
        assert_eq!(millis_until(&at, epoch_ms + 5000), 0);
    }

    #[test]
    fn test_counts_down_to_zero() {
        let start = 1_700_000_000_000;
        let host = Arc::new(ManualTimerHost::new(start));
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let countdown = Countdown::start(
            CountdownId(0),
            host.clone(),
            1000,
            at_millis(start + 3_500),
            None,
            Arc::new(|| Some(7u8)),
            Arc::new(move |tick: &CountdownTick<u8>| sink.lock().push((tick.remaining_secs, tick.phase))),
        );
        host.advance(Duration::from_secs(10));
        assert_eq!(*log.lock(), vec![(3, 7), (2, 7), (1, 7), (0, 7)]);
        assert!(countdown.is_stopped());
        assert_eq!(host.pending(), 0);
    }

    #[test]
    fn test_aligns_to_whole_second() {
        let start = 1_700_000_000_250;
        let host = Arc::new(ManualTimerHost::new(start));
        let _countdown = Countdown::start(
            CountdownId(0),
            host.clone(),
            1000,
            at_millis(start + 60_000),
            None,
            Arc::new(|| Some(())),
            Arc::new(|_: &CountdownTick<()>| {}),
        );
        assert_eq!(host.next_due(), Some(1_700_000_001_000));
    }

    #[test]
    fn test_stop() {
        let start = 1_700_000_000_000;
        let host = Arc::new(ManualTimerHost::new(start));
        let log = Arc::new(Mutex::new(0));
        let sink = log.clone();
        let countdown = Countdown::start(
            CountdownId(0),
            host.clone(),
            1000,
            at_millis(start + 60_000),
            None,
            Arc::new(|| Some(())),
            Arc::new(move |_: &CountdownTick<()>| *sink.lock() += 1),
        );
        host.advance(Duration::from_millis(1_500));
        assert_eq!(*log.lock(), 2);
        assert!(countdown.stop());
        assert!(!countdown.stop());
        host.advance(Duration::from_secs(5));
        assert_eq!(*log.lock(), 2);
    }

    #[test]
    fn test_owner_gone_stops() {
        let start = 1_700_000_000_000;
        let host = Arc::new(ManualTimerHost::new(start));
        let countdown = Countdown::start(
            CountdownId(0),
            host.clone(),
            1000,
            at_millis(start + 60_000),
            None,
            Arc::new(|| None::<()>),
            Arc::new(|_: &CountdownTick<()>| panic!("owner is gone")),
        );
        host.advance(Duration::from_secs(2));
        assert!(countdown.is_stopped());
    }
}
