//! Schedule Simulator - randomized timing checks for routines and schedulers
//!
//! Simulates:
//! - Routines with random cycles, limits and end dates on a virtual host
//! - Short timer horizons, so far boundaries go through re-checks
//! - Relays of routines handing the grand phase to each other
//!
//! After every step a live routine is compared with the state a fresh
//! trigger computes for the same instant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sbte_core::{DateTime, Duration, FAST_PER_SLOW};
use sbte_routine::{
    status_at, GrandPhase, ManualTimerHost, Phase, Routine, RoutineConfig, RoutineDefinition,
    RoutineStatus, Scheduler, TimerHost,
};

/// Host start time of every simulation, a whole slow second
pub const START_MILLIS: i64 = 1_700_000_000_000;

/// Whole real seconds as fast time
pub fn real_secs(n: i64) -> Duration {
    Duration::from_fast_secs(n * FAST_PER_SLOW)
}

/// Shape of generated definitions
#[derive(Clone, Debug)]
pub struct DefinitionModel {
    /// Segments per cycle before padding
    pub max_segments: usize,
    /// Longest segment, whole real seconds
    pub max_segment_secs: i64,
    /// Anchor offset from the start, whole real seconds either way
    pub anchor_spread_secs: i64,
    /// Chance of an explicit limit
    pub limit_chance: f64,
    /// Chance of an end date
    pub until_chance: f64,
    /// Timer horizon of the live routines
    pub horizon: StdDuration,
}

impl Default for DefinitionModel {
    fn default() -> Self {
        DefinitionModel {
            max_segments: 4,
            max_segment_secs: 5,
            anchor_spread_secs: 20,
            limit_chance: 0.3,
            until_chance: 0.3,
            horizon: StdDuration::from_secs(3),
        }
    }
}

impl DefinitionModel {
    /// Mostly zero-length and one-second segments
    pub fn instants() -> Self {
        DefinitionModel {
            max_segment_secs: 1,
            ..Default::default()
        }
    }

    /// Long segments with a one-second horizon
    pub fn far_boundaries() -> Self {
        DefinitionModel {
            max_segment_secs: 30,
            anchor_spread_secs: 60,
            horizon: StdDuration::from_secs(1),
            ..Default::default()
        }
    }
}

/// A generated routine, in whole real seconds relative to the start
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedRoutine {
    pub anchor_offset_secs: i64,
    pub segments: Vec<i64>,
    pub limit: Option<u64>,
    pub until_offset_secs: Option<i64>,
}

impl GeneratedRoutine {
    pub fn definition(&self, start: DateTime) -> RoutineDefinition {
        let cycle: Vec<String> = self.segments.iter().map(|s| format!("{s} -u")).collect();
        let mut definition = RoutineDefinition::default()
            .with_anchor(start + real_secs(self.anchor_offset_secs))
            .with_cycle(cycle.join("/"));
        if let Some(limit) = self.limit {
            definition = definition.with_limit(limit);
        }
        if let Some(until) = self.until_offset_secs {
            definition = definition.with_until(start + real_secs(until));
        }
        definition
    }
}

/// A live routine disagreeing with a fresh trigger
#[derive(Clone, Debug)]
pub struct Mismatch {
    pub routine: GeneratedRoutine,
    pub elapsed_secs: i64,
    pub live: RoutineStatus,
    pub expected: RoutineStatus,
}

/// Simulation statistics
#[derive(Debug, Default)]
pub struct SimulationResult {
    pub runs: u64,
    /// Comparisons made
    pub checks: u64,
    /// Phase changes delivered to listeners
    pub transitions: u64,
    /// Runs that ended STOPPED
    pub stopped: u64,
    /// Longest delay ever handed to the host
    pub max_delay_millis: i64,
    pub mismatches: Vec<Mismatch>,
}

impl SimulationResult {
    pub fn new() -> Self {
        SimulationResult::default()
    }

    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Outcome of a relay run
#[derive(Debug, Default)]
pub struct RelayResult {
    /// Grand phase after every step
    pub samples: Vec<(i64, GrandPhase)>,
    /// Grand phase changes delivered to listeners, in order
    pub log: Vec<GrandPhase>,
}

impl RelayResult {
    pub fn errored(&self) -> bool {
        self.samples.iter().any(|&(_, phase)| phase == GrandPhase::Errored)
    }

    pub fn transitions(&self) -> usize {
        self.log.len()
    }
}

/// Randomized routine simulator
pub struct ScheduleSimulator {
    model: DefinitionModel,
    rng: StdRng,
}

impl ScheduleSimulator {
    pub fn new(model: DefinitionModel, seed: u64) -> Self {
        ScheduleSimulator {
            model,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn model(&self) -> &DefinitionModel {
        &self.model
    }

    /// Draw a routine from the model
    pub fn generate(&mut self) -> GeneratedRoutine {
        let m = &self.model;
        let count = self.rng.gen_range(1..=m.max_segments);
        let segments = (0..count)
            .map(|_| self.rng.gen_range(0..=m.max_segment_secs))
            .collect();
        let anchor_offset_secs = self.rng.gen_range(-m.anchor_spread_secs..=m.anchor_spread_secs);
        let limit = self
            .rng
            .gen_bool(m.limit_chance)
            .then(|| self.rng.gen_range(1..=4));
        let until_offset_secs = self
            .rng
            .gen_bool(m.until_chance)
            .then(|| anchor_offset_secs + self.rng.gen_range(0..=4 * m.max_segment_secs));
        GeneratedRoutine {
            anchor_offset_secs,
            segments,
            limit,
            until_offset_secs,
        }
    }

    /// Generate and run `runs` routines for `steps` random steps each
    pub fn run(&mut self, runs: usize, steps: usize) -> SimulationResult {
        let mut result = SimulationResult::new();
        for _ in 0..runs {
            let generated = self.generate();
            self.run_routine(&generated, steps, &mut result);
        }
        result
    }

    /// Run one routine, checking it against a fresh trigger after each step
    pub fn run_routine(&mut self, generated: &GeneratedRoutine, steps: usize, result: &mut SimulationResult) {
        let host = Arc::new(ManualTimerHost::new(START_MILLIS));
        let config = RoutineConfig {
            horizon: self.model.horizon,
            ..Default::default()
        };
        let start = DateTime::from_unix_millis(config.epoch, START_MILLIS);
        let routine = Routine::with_config(host.clone(), config, generated.definition(start));

        let transitions = Arc::new(AtomicU64::new(0));
        for phase in Phase::ALL {
            let transitions = transitions.clone();
            routine.subscribe(phase, move |_| {
                transitions.fetch_add(1, Ordering::Relaxed);
            });
        }
        transitions.store(0, Ordering::Relaxed);
        routine.trigger();

        let mut elapsed_secs = 0;
        for _ in 0..steps {
            Self::check(&routine, generated, elapsed_secs, result);
            if let Some(&delay) = host.pending_delays().iter().max() {
                result.max_delay_millis = result.max_delay_millis.max(delay);
            }
            let step = self.rng.gen_range(0..=self.model.max_segment_secs.max(1));
            host.advance(StdDuration::from_secs(step as u64));
            elapsed_secs += step;
        }
        Self::check(&routine, generated, elapsed_secs, result);

        result.runs += 1;
        result.transitions += transitions.load(Ordering::Relaxed);
        if routine.phase() == Phase::Stopped {
            result.stopped += 1;
        }
    }

    fn check(routine: &Routine, generated: &GeneratedRoutine, elapsed_secs: i64, result: &mut SimulationResult) {
        let Some(resolved) = routine.resolved() else {
            return;
        };
        let live = routine.status();
        let expected = status_at(&resolved, routine.factory().now());
        result.checks += 1;
        let agrees = live.phase == expected.phase
            && live.phase_end == expected.phase_end
            && live.next_phase_start == expected.next_phase_start
            && (live.phase == Phase::Stopped
                || (live.executions == expected.executions
                    && live.cycle_pointer == expected.cycle_pointer));
        if !agrees {
            result.mismatches.push(Mismatch {
                routine: generated.clone(),
                elapsed_secs,
                live,
                expected,
            });
        }
    }

    /// Run `count` routines that take turns, each on for `slot_secs` real
    /// seconds, starting `lead_secs` after the start
    pub fn run_relay(&mut self, count: usize, slot_secs: i64, lead_secs: i64, steps: usize) -> RelayResult {
        let host: Arc<ManualTimerHost> = Arc::new(ManualTimerHost::new(START_MILLIS));
        let config = RoutineConfig {
            horizon: self.model.horizon,
            ..Default::default()
        };
        let start = DateTime::from_unix_millis(config.epoch, START_MILLIS);
        let scheduler = Scheduler::with_config(host.clone() as Arc<dyn TimerHost>, config);
        let off_secs = slot_secs * (count as i64 - 1);
        scheduler.load_routines((0..count).map(|i| {
            RoutineDefinition::default()
                .with_anchor(start + real_secs(lead_secs + i as i64 * slot_secs))
                .with_cycle(format!("{slot_secs} -u/{off_secs} -u"))
        }));

        let log = Arc::new(Mutex::new(Vec::new()));
        for phase in GrandPhase::ALL {
            let log = log.clone();
            scheduler.subscribe(phase, move |p| log.lock().push(p));
        }
        log.lock().clear();
        scheduler.trigger_all();

        let mut result = RelayResult::default();
        let mut elapsed_secs = 0;
        result.samples.push((elapsed_secs, scheduler.phase()));
        for _ in 0..steps {
            let step = self.rng.gen_range(1..=slot_secs.max(1));
            host.advance(StdDuration::from_secs(step as u64));
            elapsed_secs += step;
            result.samples.push((elapsed_secs, scheduler.phase()));
        }
        result.log = std::mem::take(&mut *log.lock());
        result
    }
}

/// Predefined simulation scenarios
pub mod scenarios {
    use super::*;

    /// Default model, fixed seed
    pub fn baseline() -> ScheduleSimulator {
        ScheduleSimulator::new(DefinitionModel::default(), 7)
    }

    /// Zero-length segments everywhere
    pub fn instants() -> ScheduleSimulator {
        ScheduleSimulator::new(DefinitionModel::instants(), 11)
    }

    /// Boundaries well beyond the horizon
    pub fn far_boundaries() -> ScheduleSimulator {
        ScheduleSimulator::new(DefinitionModel::far_boundaries(), 13)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_deterministic() {
        let mut a = ScheduleSimulator::new(DefinitionModel::default(), 42);
        let mut b = ScheduleSimulator::new(DefinitionModel::default(), 42);
        for _ in 0..20 {
            assert_eq!(a.generate(), b.generate());
        }
    }

    #[test]
    fn test_generated_definition() {
        let generated = GeneratedRoutine {
            anchor_offset_secs: -3,
            segments: vec![2, 1],
            limit: Some(2),
            until_offset_secs: None,
        };
        let start = DateTime::from_unix_millis(sbte_core::Epoch::MAIN, START_MILLIS);
        let definition = generated.definition(start);
        assert_eq!(definition.cycle.as_deref(), Some("2 -u/1 -u"));
        assert_eq!(definition.limit.as_deref(), Some("2"));
        assert!(definition.until.is_none());
    }

    #[test]
    fn test_baseline() {
        let mut sim = scenarios::baseline();
        let result = sim.run(50, 20);
        assert_eq!(result.runs, 50);
        assert!(result.is_clean(), "{:#?}", result.mismatches.first());
        assert!(result.max_delay_millis <= 3_000);
    }
}
