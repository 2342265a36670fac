//! Timer hosts
//!
//! Routines never sleep. They ask a [`TimerHost`] to run a callback after a
//! delay and read "now" from the same host, so a virtual host drives them
//! deterministically and a tokio host drives them in real programs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sbte_core::{Clock, SystemClock};
use tokio::task::AbortHandle;

/// Callback run once when a timer fires
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled timer within its host
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// Source of time and one-shot timers
pub trait TimerHost: Send + Sync {
    /// Unix time in milliseconds
    fn now_millis(&self) -> i64;

    /// Run `callback` once after `delay`
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    /// Cancel a pending timer. Returns false if it already fired or was
    /// cancelled.
    fn cancel(&self, handle: TimerHandle) -> bool;
}

/// Reads "now" from a timer host
#[derive(Clone)]
pub struct HostClock(pub Arc<dyn TimerHost>);

impl Clock for HostClock {
    fn now_millis(&self) -> i64 {
        self.0.now_millis()
    }
}

#[derive(Default)]
struct ManualQueue {
    now: i64,
    next_id: u64,
    /// (due, id) -> callback; ties fire in scheduling order
    queue: BTreeMap<(i64, u64), TimerCallback>,
    due_of: HashMap<u64, i64>,
}

/// Virtual-time host. Time only moves in [`advance`](Self::advance) and
/// [`advance_to`](Self::advance_to), which fire due timers in order.
#[derive(Default)]
pub struct ManualTimerHost {
    inner: Mutex<ManualQueue>,
}

impl ManualTimerHost {
    pub fn new(start_millis: i64) -> Self {
        ManualTimerHost {
            inner: Mutex::new(ManualQueue {
                now: start_millis,
                ..Default::default()
            }),
        }
    }

    /// Move time forward, firing every timer that falls due on the way
    pub fn advance(&self, by: Duration) {
        let target = self.now_millis() + by.as_millis() as i64;
        self.advance_to(target);
    }

    /// Move time to `target_millis`, firing due timers in order. Timers
    /// scheduled by callbacks fire too if they fall due before the target.
    /// Time never moves backwards.
    pub fn advance_to(&self, target_millis: i64) {
        loop {
            let callback = {
                let mut inner = self.inner.lock();
                let due = match inner.queue.keys().next() {
                    Some(&key) if key.0 <= target_millis => key,
                    _ => break,
                };
                inner.due_of.remove(&due.1);
                inner.now = inner.now.max(due.0);
                inner.queue.remove(&due)
            };
            if let Some(callback) = callback {
                callback();
            }
        }
        let mut inner = self.inner.lock();
        inner.now = inner.now.max(target_millis);
    }

    /// Fire everything already due without moving time
    pub fn run_due(&self) {
        self.advance_to(self.now_millis());
    }

    /// Number of pending timers
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Due time of the earliest pending timer
    pub fn next_due(&self) -> Option<i64> {
        self.inner.lock().queue.keys().next().map(|&(due, _)| due)
    }

    /// Delays of all pending timers from now, earliest first
    pub fn pending_delays(&self) -> Vec<i64> {
        let inner = self.inner.lock();
        inner.queue.keys().map(|&(due, _)| due - inner.now).collect()
    }
}

impl TimerHost for ManualTimerHost {
    fn now_millis(&self) -> i64 {
        self.inner.lock().now
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let due = inner.now + delay.as_millis() as i64;
        inner.queue.insert((due, id), callback);
        inner.due_of.insert(id, due);
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let mut inner = self.inner.lock();
        match inner.due_of.remove(&handle.0) {
            Some(due) => inner.queue.remove(&(due, handle.0)).is_some(),
            None => false,
        }
    }
}

/// Host backed by a tokio runtime and the system clock
pub struct TokioTimerHost {
    runtime: tokio::runtime::Handle,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioTimerHost {
    /// Host on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }

    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self::with_clock(runtime, Arc::new(SystemClock))
    }

    pub fn with_clock(runtime: tokio::runtime::Handle, clock: Arc<dyn Clock>) -> Self {
        TokioTimerHost {
            runtime,
            clock,
            next_id: AtomicU64::new(0),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of timers not yet fired or cancelled
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl TimerHost for TokioTimerHost {
    fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = self.tasks.clone();
        // Held across spawn so the task cannot deregister before it is registered
        let mut registered = self.tasks.lock();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if tasks.lock().remove(&id).is_some() {
                callback();
            }
        });
        registered.insert(id, join.abort_handle());
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        match self.tasks.lock().remove(&handle.0) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}
