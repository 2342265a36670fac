//! Routines - recurring on/off cycles on the dual clock
//!
//! The state at trigger time is computed in closed form from the anchor,
//! the cycle and "now" ([`status_at`]); nothing in the past is replayed.
//! From there the routine re-arms one timer per phase boundary. Delays
//! longer than the configured horizon are approached in horizon-sized
//! steps, each of which re-derives the remaining delay.

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;
use sbte_core::{DateTime, DateTimeFactory, Duration};

use crate::config::RoutineConfig;
use crate::countdown::{
    millis_until, Countdown, CountdownCallback, CountdownId, CountdownSet, CountdownTick,
    PhaseReader,
};
use crate::definition::{ResolvedDefinition, RoutineDefinition};
use crate::host::{HostClock, TimerHost};
use crate::phase::Phase;
use crate::registry::{dispatch, Listener, ListenerId, ListenerSet, TimerRegistry, TimerSlot};
use crate::scheduler::Boundary;

/// Routine state at one instant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoutineStatus {
    pub phase: Phase,
    /// Index of the current segment in the cycle; even is on, odd is off.
    /// `None` before the first on-interval and when no segment is open.
    pub cycle_pointer: Option<usize>,
    /// Cycles entered so far
    pub cycles: u64,
    /// On-intervals entered so far
    pub executions: u64,
    /// Start of the current phase
    pub current_phase_start: Option<DateTime>,
    /// When the current phase ends
    pub phase_end: Option<DateTime>,
    /// Start of the next phase. `None` once no further phase change will be
    /// scheduled; an ongoing phase with no next start ends in STOPPED.
    pub next_phase_start: Option<DateTime>,
}

impl RoutineStatus {
    /// State of a routine that was never triggered
    pub fn untriggered() -> Self {
        RoutineStatus {
            phase: Phase::Waiting,
            cycle_pointer: None,
            cycles: 0,
            executions: 0,
            current_phase_start: None,
            phase_end: None,
            next_phase_start: None,
        }
    }

    fn stopped(cycle_pointer: Option<usize>, cycles: u64, executions: u64) -> Self {
        RoutineStatus {
            phase: Phase::Stopped,
            cycle_pointer,
            cycles,
            executions,
            ..Self::untriggered()
        }
    }

    /// WAITING -> ONGOING at `next_phase_start`
    fn begin_on(&mut self, def: &ResolvedDefinition) {
        let Some(start) = self.next_phase_start else {
            return;
        };
        let pointer = self.cycle_pointer.map_or(0, |p| (p + 1) % def.cycle.len());
        let end = start + def.segment(pointer);
        self.cycle_pointer = Some(pointer);
        self.executions += 1;
        if pointer == 0 {
            self.cycles += 1;
        }
        self.phase = Phase::Ongoing;
        self.current_phase_start = Some(start);
        self.phase_end = Some(end);
        self.next_phase_start = if def.ends_after(self.executions, end, pointer) {
            None
        } else {
            Some(end)
        };
    }

    /// ONGOING -> WAITING, or STOPPED when nothing follows
    fn end_on(&mut self, def: &ResolvedDefinition) {
        let Some(end) = self.phase_end else {
            return;
        };
        if self.next_phase_start.is_none() {
            self.phase = Phase::Stopped;
            self.current_phase_start = None;
            self.phase_end = None;
            return;
        }
        let pointer = self.cycle_pointer.map_or(0, |p| (p + 1) % def.cycle.len());
        let next = end + def.segment(pointer);
        self.cycle_pointer = Some(pointer);
        self.phase = Phase::Waiting;
        self.current_phase_start = Some(end);
        self.phase_end = Some(next);
        self.next_phase_start = Some(next);
    }
}

/// Closed-form state of a routine at `now`.
///
/// An on-interval runs only if it starts before `until` and within the
/// limit. A cycle shorter than one fast second runs a single on-interval.
pub fn status_at(def: &ResolvedDefinition, now: DateTime) -> RoutineStatus {
    let anchor = def.anchor;
    if def.until.is_some_and(|until| until <= anchor) {
        return RoutineStatus::stopped(None, 0, 0);
    }
    if now < anchor {
        return RoutineStatus {
            phase_end: Some(anchor),
            next_phase_start: Some(anchor),
            ..RoutineStatus::untriggered()
        };
    }

    let at = |rel: i64| anchor + Duration::from_fast_secs(rel);
    let pairs = def.pairs();
    let limit = def.effective_limit();
    let clip = |executions: u64| limit.map_or(executions, |l| executions.min(l));
    let now_rel = (now - anchor).as_fast_secs();
    let until_rel = def.until.map(|until| (until - anchor).as_fast_secs());
    let cycle_len = def.cycle_length().as_fast_secs();

    let mut cycles = if def.execute_once() {
        1
    } else {
        let horizon = until_rel.map_or(now_rel, |u| u.min(now_rel));
        (horizon.div_euclid(cycle_len) + 1).max(1) as u64
    };
    if let Some(cycle_limit) = def.cycle_limit() {
        cycles = cycles.min(cycle_limit);
    }
    let cycle_start = (cycles as i64 - 1) * cycle_len;

    // first segment of the last counted cycle still open at `now`
    let mut offset = cycle_start;
    let mut open = None;
    for (i, segment) in def.cycle.iter().enumerate() {
        let end = offset.saturating_add(segment.as_fast_secs());
        if end > now_rel {
            open = Some((i, offset, end));
            break;
        }
        offset = end;
    }
    let done_before = (cycles - 1) * pairs;

    match open {
        None => {
            // every segment of the last counted cycle is over
            let mut started = 0;
            let mut offset = cycle_start;
            for (i, segment) in def.cycle.iter().enumerate() {
                if i % 2 == 0 && until_rel.map_or(true, |u| offset < u) {
                    started += 1;
                }
                offset = offset.saturating_add(segment.as_fast_secs());
            }
            let executions = if def.execute_once() { 1 } else { done_before + started };
            RoutineStatus::stopped(None, cycles, clip(executions))
        }
        Some((pointer, start, end)) if pointer % 2 == 0 => {
            let executions = done_before + (pointer / 2) as u64 + 1;
            let past_until = until_rel.is_some_and(|u| start >= u);
            if limit.is_some_and(|l| executions > l) || past_until {
                return RoutineStatus::stopped(Some(pointer), cycles, clip(executions - 1));
            }
            let end = at(end);
            RoutineStatus {
                phase: Phase::Ongoing,
                cycle_pointer: Some(pointer),
                cycles,
                executions,
                current_phase_start: Some(at(start)),
                phase_end: Some(end),
                next_phase_start: if def.ends_after(executions, end, pointer) {
                    None
                } else {
                    Some(end)
                },
            }
        }
        Some((pointer, start, end)) => {
            let executions = done_before + (pointer / 2) as u64 + 1;
            if def.ends_after(executions, at(start), pointer - 1) {
                return RoutineStatus::stopped(Some(pointer), cycles, clip(executions));
            }
            RoutineStatus {
                phase: Phase::Waiting,
                cycle_pointer: Some(pointer),
                cycles,
                executions,
                current_phase_start: Some(at(start)),
                phase_end: Some(at(end)),
                next_phase_start: Some(at(end)),
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transition {
    PhaseStart,
    PhaseEnd,
}

struct RoutineState {
    definition: RoutineDefinition,
    resolved: Option<ResolvedDefinition>,
    status: RoutineStatus,
    /// Bumped by trigger and pause; timers of older generations are inert
    generation: u64,
    timers: TimerRegistry,
    listeners: ListenerSet<Phase>,
    countdowns: CountdownSet<Phase>,
}

struct Shared {
    host: Arc<dyn TimerHost>,
    config: RoutineConfig,
    factory: DateTimeFactory,
    state: Mutex<RoutineState>,
}

/// A recurring on/off routine.
///
/// Cloning gives another handle to the same routine. Pending timers hold
/// only weak references, so dropping every handle silences the routine.
#[derive(Clone)]
pub struct Routine {
    shared: Arc<Shared>,
}

impl Routine {
    pub fn new(host: Arc<dyn TimerHost>, definition: impl Into<RoutineDefinition>) -> Self {
        Self::with_config(host, RoutineConfig::default(), definition)
    }

    pub fn with_config(
        host: Arc<dyn TimerHost>,
        config: RoutineConfig,
        definition: impl Into<RoutineDefinition>,
    ) -> Self {
        let factory = DateTimeFactory::new(config.epoch, Arc::new(HostClock(host.clone())));
        let state = RoutineState {
            definition: definition.into(),
            resolved: None,
            status: RoutineStatus::untriggered(),
            generation: 0,
            timers: TimerRegistry::new(host.clone()),
            listeners: ListenerSet::new(),
            countdowns: CountdownSet::new(),
        };
        Routine {
            shared: Arc::new(Shared {
                host,
                config,
                factory,
                state: Mutex::new(state),
            }),
        }
    }

    /// Recompute the state from "now", notify the listeners of the current
    /// phase once and arm the next boundary. Replaces any armed timers.
    pub fn trigger(&self) {
        self.shared.trigger();
    }

    /// Replace the definition, then [`trigger`](Self::trigger)
    pub fn trigger_with(&self, definition: impl Into<RoutineDefinition>) {
        self.shared.state.lock().definition = definition.into();
        self.shared.trigger();
    }

    /// Call `listener` on every entry into `phase`. Fires immediately if the
    /// routine is already in that phase.
    pub fn subscribe<F>(&self, phase: Phase, listener: F) -> ListenerId
    where
        F: Fn(Phase) + Send + Sync + 'static,
    {
        let listener: Listener<Phase> = Arc::new(listener);
        let (id, current) = {
            let mut st = self.shared.state.lock();
            (st.listeners.add(phase, listener.clone()), st.status.phase)
        };
        if current == phase {
            listener(phase);
        }
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.state.lock().listeners.remove(id)
    }

    /// Cancel every armed timer and countdown. Phase and counters are kept;
    /// call [`trigger`](Self::trigger) to resume from "now".
    pub fn pause(&self) {
        let countdowns = {
            let mut st = self.shared.state.lock();
            st.generation += 1;
            let cancelled = st.timers.cancel_all();
            tracing::debug!(cancelled, phase = %st.status.phase, "routine paused");
            st.countdowns.take_all()
        };
        for countdown in countdowns {
            countdown.stop();
        }
    }

    /// Count down to the end of the current phase. Returns `None` if no
    /// boundary is pending.
    pub fn start_countdown<F>(&self, callback: F) -> Option<CountdownId>
    where
        F: Fn(&CountdownTick<Phase>) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        let read_phase: PhaseReader<Phase> =
            Arc::new(move || weak.upgrade().map(|shared| shared.state.lock().status.phase));
        let callback: CountdownCallback<Phase> = Arc::new(callback);
        // reserve and insert under one lock: a pause must see every started countdown
        let mut st = self.shared.state.lock();
        let target = st.status.phase_end?;
        let id = st.countdowns.reserve();
        let countdown = Countdown::start(
            id,
            self.shared.host.clone(),
            self.shared.config.countdown_millis(),
            target,
            st.status.current_phase_start,
            read_phase,
            callback,
        );
        st.countdowns.insert(countdown);
        Some(id)
    }

    pub fn stop_countdown(&self, id: CountdownId) -> bool {
        let countdown = self.shared.state.lock().countdowns.remove(id);
        countdown.is_some_and(|countdown| countdown.stop())
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().status.phase
    }

    pub fn status(&self) -> RoutineStatus {
        self.shared.state.lock().status
    }

    pub fn next_phase_start(&self) -> Option<DateTime> {
        self.shared.state.lock().status.next_phase_start
    }

    pub fn current_phase_start(&self) -> Option<DateTime> {
        self.shared.state.lock().status.current_phase_start
    }

    pub fn definition(&self) -> RoutineDefinition {
        self.shared.state.lock().definition.clone()
    }

    /// The definition as resolved by the last trigger
    pub fn resolved(&self) -> Option<ResolvedDefinition> {
        self.shared.state.lock().resolved.clone()
    }

    /// Number of timers currently armed by this routine
    pub fn armed_timers(&self) -> usize {
        self.shared.state.lock().timers.len()
    }

    pub fn config(&self) -> &RoutineConfig {
        &self.shared.config
    }

    /// Factory reading "now" from this routine's host
    pub fn factory(&self) -> &DateTimeFactory {
        &self.shared.factory
    }

    /// Phase once a boundary already due by `now` has fired. Only an armed
    /// boundary counts; a paused routine keeps its phase.
    pub(crate) fn settled_phase(&self, now: DateTime) -> Phase {
        let st = self.shared.state.lock();
        let due = !st.timers.is_empty() && st.status.phase_end.is_some_and(|end| end <= now);
        match (st.status.phase, due) {
            (Phase::Waiting, true) => Phase::Ongoing,
            (Phase::Ongoing, true) if st.status.next_phase_start.is_some() => Phase::Waiting,
            (Phase::Ongoing, true) => Phase::Stopped,
            (phase, _) => phase,
        }
    }

    /// Boundaries of the current or next on-interval, and of the one after
    /// it when the current phase is ongoing. An ongoing interval is listed
    /// with its start.
    pub(crate) fn upcoming_boundaries(&self) -> Vec<(DateTime, Boundary)> {
        let st = self.shared.state.lock();
        let Some(def) = st.resolved.as_ref() else {
            return Vec::new();
        };
        let status = &st.status;
        let next_pointer = status.cycle_pointer.map_or(0, |p| p + 1);
        match (status.phase, status.phase_end) {
            (Phase::Waiting, Some(start)) => {
                vec![
                    (start, Boundary::Start),
                    (start + def.segment(next_pointer), Boundary::End),
                ]
            }
            (Phase::Ongoing, Some(end)) => {
                let mut out = Vec::with_capacity(4);
                if let Some(start) = status.current_phase_start {
                    out.push((start, Boundary::Start));
                }
                out.push((end, Boundary::End));
                if status.next_phase_start.is_some() {
                    let start = end + def.segment(next_pointer);
                    out.push((start, Boundary::Start));
                    out.push((start + def.segment(next_pointer + 1), Boundary::End));
                }
                out
            }
            _ => Vec::new(),
        }
    }
}

impl Shared {
    fn trigger(self: &Arc<Self>) {
        let (generation, phase, listeners) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            st.timers.cancel_all();
            st.generation += 1;
            let resolved = st.definition.resolve(&self.factory);
            st.status = status_at(&resolved, self.factory.now());
            st.resolved = Some(resolved);
            tracing::debug!(
                phase = %st.status.phase,
                executions = st.status.executions,
                next = ?st.status.next_phase_start,
                "routine triggered"
            );
            (st.generation, st.status.phase, st.listeners.matching(st.status.phase))
        };
        dispatch(&listeners, phase);
        self.arm_next(generation);
    }

    fn arm_next(self: &Arc<Self>, generation: u64) {
        let mut st = self.state.lock();
        if st.generation != generation {
            return;
        }
        let transition = match st.status.phase {
            Phase::Waiting => Transition::PhaseStart,
            Phase::Ongoing => Transition::PhaseEnd,
            Phase::Stopped => return,
        };
        if let Some(target) = st.status.phase_end {
            self.arm(&mut st, target, transition, generation);
        }
    }

    fn arm(
        self: &Arc<Self>,
        st: &mut RoutineState,
        target: DateTime,
        transition: Transition,
        generation: u64,
    ) {
        let delay = millis_until(&target, self.host.now_millis());
        let horizon = self.config.horizon_millis();
        let slot = st.timers.reserve();
        let weak = Arc::downgrade(self);
        if delay < horizon {
            tracing::debug!(?transition, delay_ms = delay, "arming phase timer");
            st.timers.arm(
                slot,
                StdDuration::from_millis(delay as u64),
                Box::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_timer(slot, generation, transition);
                    }
                }),
            );
        } else {
            tracing::debug!(delay_ms = delay, horizon_ms = horizon, "boundary beyond horizon");
            st.timers.arm(
                slot,
                StdDuration::from_millis(horizon as u64),
                Box::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_recheck(slot, generation, target, transition);
                    }
                }),
            );
        }
    }

    fn on_recheck(
        self: &Arc<Self>,
        slot: TimerSlot,
        generation: u64,
        target: DateTime,
        transition: Transition,
    ) {
        let mut st = self.state.lock();
        if !st.timers.release(slot) || st.generation != generation {
            return;
        }
        self.arm(&mut st, target, transition, generation);
    }

    fn on_timer(self: &Arc<Self>, slot: TimerSlot, generation: u64, transition: Transition) {
        let (phase, listeners) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if !st.timers.release(slot) || st.generation != generation {
                return;
            }
            let Some(def) = st.resolved.as_ref() else {
                return;
            };
            match transition {
                Transition::PhaseStart => st.status.begin_on(def),
                Transition::PhaseEnd => st.status.end_on(def),
            }
            tracing::debug!(
                phase = %st.status.phase,
                pointer = ?st.status.cycle_pointer,
                executions = st.status.executions,
                "routine phase changed"
            );
            (st.status.phase, st.listeners.matching(st.status.phase))
        };
        dispatch(&listeners, phase);
        self.arm_next(generation);
    }
}

impl fmt::Debug for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.shared.state.lock();
        f.debug_struct("Routine")
            .field("definition", &st.definition)
            .field("status", &st.status)
            .finish()
    }
}
