//! Schedulers - mutually exclusive routines
//!
//! A scheduler owns a list of routines whose on-intervals must never
//! overlap and reports one grand phase for all of them. On every child
//! report it rebuilds a timetable of the children's upcoming boundaries.
//! Two consecutive boundaries of the same kind mean two on-intervals
//! intersect; the scheduler then pauses every child and stays ERRORED.
//!
//! Children hand over at the same instant through separate timers. While
//! computing the grand phase, a child other than the reporting one whose
//! boundary is already due counts as past it, so a handover never shows
//! up as a WAITING gap.

use std::sync::Arc;

use parking_lot::Mutex;
use sbte_core::{DateTime, DateTimeFactory, SbteError};

use crate::config::RoutineConfig;
use crate::countdown::{
    Countdown, CountdownCallback, CountdownId, CountdownSet, CountdownTick, PhaseReader,
};
use crate::definition::RoutineDefinition;
use crate::host::{HostClock, TimerHost};
use crate::phase::{GrandPhase, Phase};
use crate::registry::{dispatch, Listener, ListenerId, ListenerSet};
use crate::routine::Routine;

/// Kind of a timetable entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Boundary {
    /// An on-interval begins
    Start,
    /// An on-interval ends
    End,
}

/// One upcoming boundary of one child
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimetableEntry {
    pub at: DateTime,
    pub boundary: Boundary,
    /// Index of the child in its scheduler
    pub routine: usize,
    /// Order among entries at the same instant: ends, then zero-length
    /// on-intervals, then starts
    rank: u8,
    /// Position within the child's own entries
    seq: usize,
}

impl TimetableEntry {
    fn sort_key(&self) -> (DateTime, u8, usize, usize) {
        (self.at, self.rank, self.routine, self.seq)
    }
}

/// Build the sorted timetable from each child's upcoming boundaries
pub fn build_timetable(children: &[Vec<(DateTime, Boundary)>]) -> Vec<TimetableEntry> {
    let mut timetable = Vec::new();
    for (routine, boundaries) in children.iter().enumerate() {
        for (seq, &(at, boundary)) in boundaries.iter().enumerate() {
            // a Start immediately followed by an End at the same instant
            let instant = match boundary {
                Boundary::Start => boundaries
                    .get(seq + 1)
                    .is_some_and(|&(end, b)| b == Boundary::End && end == at),
                Boundary::End => seq > 0 && boundaries[seq - 1] == (at, Boundary::Start),
            };
            let rank = match (instant, boundary) {
                (true, _) => 1,
                (false, Boundary::End) => 0,
                (false, Boundary::Start) => 2,
            };
            timetable.push(TimetableEntry {
                at,
                boundary,
                routine,
                rank,
                seq,
            });
        }
    }
    timetable.sort_by_key(TimetableEntry::sort_key);
    timetable
}

/// True if no two consecutive entries have the same kind
pub fn verify_timetable(timetable: &[TimetableEntry]) -> bool {
    timetable
        .windows(2)
        .all(|pair| pair[0].boundary != pair[1].boundary)
}

/// Next grand start and end. While the grand phase is ongoing the end comes
/// first and the start is searched after it; otherwise the other way round.
pub fn seek_next_state_change(
    timetable: &[TimetableEntry],
    rising_edge: bool,
) -> (Option<DateTime>, Option<DateTime>) {
    let mut next_start = None;
    let mut next_end = None;
    for entry in timetable {
        match entry.boundary {
            Boundary::Start if next_start.is_none() && (!rising_edge || next_end.is_some()) => {
                next_start = Some(entry.at);
            }
            Boundary::End if next_end.is_none() && (rising_edge || next_start.is_some()) => {
                next_end = Some(entry.at);
            }
            _ => {}
        }
        if next_start.is_some() && next_end.is_some() {
            break;
        }
    }
    (next_start, next_end)
}

/// Exactly one child ongoing is ONGOING, all stopped is STOPPED, anything
/// else is WAITING
pub fn grand_phase_of(phases: &[Phase]) -> GrandPhase {
    let ongoing = phases.iter().filter(|&&p| p == Phase::Ongoing).count();
    if ongoing == 1 {
        GrandPhase::Ongoing
    } else if phases.iter().all(|&p| p == Phase::Stopped) {
        GrandPhase::Stopped
    } else {
        GrandPhase::Waiting
    }
}

/// Something a scheduler can adopt as a child
pub enum RoutineSource {
    Definition(RoutineDefinition),
    Routine(Routine),
}

impl From<&str> for RoutineSource {
    fn from(text: &str) -> Self {
        RoutineSource::Definition(RoutineDefinition::parse(text))
    }
}

impl From<String> for RoutineSource {
    fn from(text: String) -> Self {
        RoutineSource::Definition(RoutineDefinition::parse(&text))
    }
}

impl From<RoutineDefinition> for RoutineSource {
    fn from(definition: RoutineDefinition) -> Self {
        RoutineSource::Definition(definition)
    }
}

impl From<Routine> for RoutineSource {
    fn from(routine: Routine) -> Self {
        RoutineSource::Routine(routine)
    }
}

struct SchedulerState {
    routines: Vec<Routine>,
    /// Child reports are ignored until every child has been triggered
    active: bool,
    phase: GrandPhase,
    phase_since: Option<DateTime>,
    next_start: Option<DateTime>,
    next_end: Option<DateTime>,
    overlap: Option<SbteError>,
    listeners: ListenerSet<GrandPhase>,
    countdowns: CountdownSet<GrandPhase>,
}

struct SchedulerShared {
    host: Arc<dyn TimerHost>,
    config: RoutineConfig,
    factory: DateTimeFactory,
    state: Mutex<SchedulerState>,
}

/// Aggregate of routines whose on-intervals must not overlap
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    pub fn new(host: Arc<dyn TimerHost>) -> Self {
        Self::with_config(host, RoutineConfig::default())
    }

    pub fn with_config(host: Arc<dyn TimerHost>, config: RoutineConfig) -> Self {
        let factory = DateTimeFactory::new(config.epoch, Arc::new(HostClock(host.clone())));
        let state = SchedulerState {
            routines: Vec::new(),
            active: false,
            phase: GrandPhase::Waiting,
            phase_since: None,
            next_start: None,
            next_end: None,
            overlap: None,
            listeners: ListenerSet::new(),
            countdowns: CountdownSet::new(),
        };
        Scheduler {
            shared: Arc::new(SchedulerShared {
                host,
                config,
                factory,
                state: Mutex::new(state),
            }),
        }
    }

    /// Adopt each source as a child and return their indices. Definitions
    /// become routines sharing this scheduler's host and configuration.
    pub fn load_routines<I, S>(&self, sources: I) -> Vec<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<RoutineSource>,
    {
        let mut indices = Vec::new();
        for source in sources {
            let routine = match source.into() {
                RoutineSource::Definition(definition) => Routine::with_config(
                    self.shared.host.clone(),
                    self.shared.config.clone(),
                    definition,
                ),
                RoutineSource::Routine(routine) => routine,
            };
            let index = {
                let mut st = self.shared.state.lock();
                st.routines.push(routine.clone());
                st.routines.len() - 1
            };
            for phase in Phase::ALL {
                let weak = Arc::downgrade(&self.shared);
                routine.subscribe(phase, move |_| {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_child_report(Some(index));
                    }
                });
            }
            tracing::debug!(index, "routine loaded");
            indices.push(index);
        }
        indices
    }

    /// Trigger every child, then compute the grand phase. Does nothing once
    /// ERRORED.
    pub fn trigger_all(&self) {
        let routines = {
            let mut st = self.shared.state.lock();
            if st.phase == GrandPhase::Errored {
                return;
            }
            st.active = false;
            st.routines.clone()
        };
        for routine in &routines {
            routine.trigger();
        }
        self.shared.state.lock().active = true;
        self.shared.on_child_report(None);
    }

    /// Call `listener` on every change into `phase`. Fires immediately if
    /// the scheduler is already in that phase.
    pub fn subscribe<F>(&self, phase: GrandPhase, listener: F) -> ListenerId
    where
        F: Fn(GrandPhase) + Send + Sync + 'static,
    {
        let listener: Listener<GrandPhase> = Arc::new(listener);
        let (id, current) = {
            let mut st = self.shared.state.lock();
            (st.listeners.add(phase, listener.clone()), st.phase)
        };
        if current == phase {
            listener(phase);
        }
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.state.lock().listeners.remove(id)
    }

    /// Pause every child and stop the scheduler's countdowns
    pub fn pause(&self) {
        let (routines, countdowns) = {
            let mut st = self.shared.state.lock();
            (st.routines.clone(), st.countdowns.take_all())
        };
        for routine in &routines {
            routine.pause();
        }
        for countdown in countdowns {
            countdown.stop();
        }
    }

    /// Count down to the nearer of the grand next start and end
    pub fn start_countdown<F>(&self, callback: F) -> Option<CountdownId>
    where
        F: Fn(&CountdownTick<GrandPhase>) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        let read_phase: PhaseReader<GrandPhase> =
            Arc::new(move || weak.upgrade().map(|shared| shared.state.lock().phase));
        let callback: CountdownCallback<GrandPhase> = Arc::new(callback);
        // reserve and insert under one lock: a pause must see every started countdown
        let mut st = self.shared.state.lock();
        let target = match (st.next_start, st.next_end) {
            (Some(start), Some(end)) => start.min(end),
            (start, end) => start.or(end)?,
        };
        let id = st.countdowns.reserve();
        let countdown = Countdown::start(
            id,
            self.shared.host.clone(),
            self.shared.config.countdown_millis(),
            target,
            st.phase_since,
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

    /// Check the children's upcoming on-intervals for overlaps. Does not
    /// change the grand phase.
    pub fn verify(&self) -> bool {
        verify_timetable(&self.timetable())
    }

    /// Sorted upcoming boundaries of every child
    pub fn timetable(&self) -> Vec<TimetableEntry> {
        let routines = self.shared.state.lock().routines.clone();
        timetable_of(&routines)
    }

    pub fn phase(&self) -> GrandPhase {
        self.shared.state.lock().phase
    }

    pub fn next_start(&self) -> Option<DateTime> {
        self.shared.state.lock().next_start
    }

    pub fn next_end(&self) -> Option<DateTime> {
        self.shared.state.lock().next_end
    }

    /// Set once an overlap was found
    pub fn overlap(&self) -> Option<SbteError> {
        self.shared.state.lock().overlap.clone()
    }

    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    pub fn routines(&self) -> Vec<Routine> {
        self.shared.state.lock().routines.clone()
    }

    pub fn routine(&self, index: usize) -> Option<Routine> {
        self.shared.state.lock().routines.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().routines.is_empty()
    }
}

fn timetable_of(routines: &[Routine]) -> Vec<TimetableEntry> {
    let children: Vec<_> = routines.iter().map(Routine::upcoming_boundaries).collect();
    build_timetable(&children)
}

impl SchedulerShared {
    /// Recompute after a child changed phase. `reporter` is the child whose
    /// phase is read as is; every other child is settled at "now".
    fn on_child_report(&self, reporter: Option<usize>) {
        let mut st = self.state.lock();
        if !st.active || st.phase == GrandPhase::Errored {
            return;
        }
        let timetable = timetable_of(&st.routines);
        tracing::trace!(entries = timetable.len(), "timetable rebuilt");

        if !verify_timetable(&timetable) {
            tracing::warn!(routines = st.routines.len(), "on-intervals overlap, pausing all routines");
            st.phase = GrandPhase::Errored;
            st.phase_since = Some(self.factory.now());
            st.overlap = Some(SbteError::ScheduleOverlap);
            st.next_start = None;
            st.next_end = None;
            let routines = st.routines.clone();
            let countdowns = st.countdowns.take_all();
            let listeners = st.listeners.matching(GrandPhase::Errored);
            drop(st);
            for routine in &routines {
                routine.pause();
            }
            for countdown in countdowns {
                countdown.stop();
            }
            dispatch(&listeners, GrandPhase::Errored);
            return;
        }

        let now = self.factory.now();
        let phases: Vec<Phase> = st
            .routines
            .iter()
            .enumerate()
            .map(|(i, routine)| {
                if Some(i) == reporter {
                    routine.phase()
                } else {
                    routine.settled_phase(now)
                }
            })
            .collect();
        let phase = grand_phase_of(&phases);
        let (next_start, next_end) = seek_next_state_change(&timetable, phase == GrandPhase::Ongoing);
        st.next_start = next_start;
        st.next_end = next_end;
        if phase == st.phase {
            return;
        }
        st.phase = phase;
        st.phase_since = Some(now);
        tracing::debug!(%phase, next_start = ?next_start, next_end = ?next_end, "grand phase changed");
        let listeners = st.listeners.matching(phase);
        drop(st);
        dispatch(&listeners, phase);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.shared.state.lock();
        f.debug_struct("Scheduler")
            .field("routines", &st.routines.len())
            .field("phase", &st.phase)
            .field("next_start", &st.next_start)
            .field("next_end", &st.next_end)
            .finish()
    }
}
