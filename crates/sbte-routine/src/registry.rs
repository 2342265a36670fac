//! Per-instance bookkeeping for armed timers and phase listeners
//!
//! Each routine and scheduler owns its own registries, so pausing one never
//! touches another's timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::host::{TimerCallback, TimerHandle, TimerHost};

/// Identifies a subscription made with `subscribe`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Phase listener. Receives the phase it was registered for.
pub type Listener<P> = Arc<dyn Fn(P) + Send + Sync>;

/// Listeners keyed by phase, kept in registration order
pub struct ListenerSet<P> {
    next_id: u64,
    entries: Vec<(ListenerId, P, Listener<P>)>,
}

impl<P: Copy + PartialEq> ListenerSet<P> {
    pub fn new() -> Self {
        ListenerSet {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, phase: P, listener: Listener<P>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, phase, listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _, _)| *entry != id);
        self.entries.len() != before
    }

    /// Snapshot of the listeners for `phase`, to be invoked without holding
    /// the owner's lock
    pub fn matching(&self, phase: P) -> Vec<Listener<P>> {
        self.entries
            .iter()
            .filter(|(_, p, _)| *p == phase)
            .map(|(_, _, listener)| listener.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P: Copy + PartialEq> Default for ListenerSet<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke a listener snapshot in order
pub fn dispatch<P: Copy>(listeners: &[Listener<P>], phase: P) {
    for listener in listeners {
        listener(phase);
    }
}

/// Slot of an armed timer within a [`TimerRegistry`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerSlot(u64);

/// Timers armed by one instance
pub struct TimerRegistry {
    host: Arc<dyn TimerHost>,
    next_slot: u64,
    armed: HashMap<TimerSlot, TimerHandle>,
}

impl TimerRegistry {
    pub fn new(host: Arc<dyn TimerHost>) -> Self {
        TimerRegistry {
            host,
            next_slot: 0,
            armed: HashMap::new(),
        }
    }

    /// Reserve a slot before scheduling so the callback can release it
    pub fn reserve(&mut self) -> TimerSlot {
        let slot = TimerSlot(self.next_slot);
        self.next_slot += 1;
        slot
    }

    /// Schedule `callback` and record it under `slot`
    pub fn arm(&mut self, slot: TimerSlot, delay: Duration, callback: TimerCallback) {
        let handle = self.host.schedule(delay, callback);
        self.armed.insert(slot, handle);
    }

    /// Forget a timer that has fired. Returns false if the slot was
    /// cancelled in the meantime.
    pub fn release(&mut self, slot: TimerSlot) -> bool {
        self.armed.remove(&slot).is_some()
    }

    /// Cancel every armed timer
    pub fn cancel_all(&mut self) -> usize {
        let count = self.armed.len();
        for (_, handle) in self.armed.drain() {
            self.host.cancel(handle);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
