//! End-to-end behaviour of durations, dates, routines and schedulers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use proptest::prelude::*;
use sbte_core::{DateFields, DateTime, DateTimeFactory, Duration, Epoch, FixedClock, TimeSystem, FAST_PER_SLOW};
use sbte_routine::{
    GrandPhase, ManualTimerHost, Phase, Routine, RoutineDefinition, Scheduler, TimerHost, TokioTimerHost,
};
use sbte_test::{real_secs, START_MILLIS};

fn host() -> Arc<ManualTimerHost> {
    Arc::new(ManualTimerHost::new(START_MILLIS))
}

proptest! {
    #[test]
    fn prop_slow_seconds_round_trip(n in -10_000_000i64..10_000_000) {
        let d = Duration::from_slow_secs(n as f64).unwrap();
        prop_assert_eq!(d.as_slow_secs(), n);
        prop_assert_eq!(d.as_fast_secs(), n * FAST_PER_SLOW);
    }

    #[test]
    fn prop_fast_breakdown_sums_back(n in 0i64..10_000_000_000) {
        let d = Duration::from_fast_secs(n);
        prop_assert_eq!(d.fast_breakdown().total(), n);
    }
}

#[test]
fn test_hour_only_defaults_to_today() {
    let factory = DateTimeFactory::new(Epoch::MAIN, Arc::new(FixedClock::new(START_MILLIS)));
    let fields = DateFields {
        hour: Some(9),
        ..Default::default()
    };
    let now = factory.now().slow_fields();
    let at = factory.from_fields(TimeSystem::Slow, fields).unwrap().slow_fields();
    assert_eq!(&at[..3], &now[..3]);
    assert_eq!(&at[3..], &[9, 0, 0]);

    let now = factory.now().fast_date().as_array();
    let at = factory.from_fields(TimeSystem::Fast, fields).unwrap().fast_date().as_array();
    assert_eq!(&at[..3], &now[..3]);
    assert_eq!(&at[3..], &[9, 0, 0]);
}

#[test]
fn test_trigger_twice_is_identical() {
    let host = host();
    let routine = Routine::new(host.clone(), "C[10s/5s] L[7]");
    routine.trigger();
    let first = routine.status();
    routine.trigger();
    assert_eq!(routine.status(), first);
}

#[test]
fn test_cycle_pointer_positions() {
    let host = host();
    let now = DateTime::from_unix_millis(Epoch::MAIN, START_MILLIS);
    let secs = Duration::from_fast_secs;

    // 37s in: third cycle, on segment [30s, 40s)
    let routine = Routine::new(
        host.clone(),
        RoutineDefinition::default().with_anchor(now - secs(37)).with_cycle("10s/5s"),
    );
    routine.trigger();
    let status = routine.status();
    assert_eq!(status.phase, Phase::Ongoing);
    assert_eq!(status.cycles, 3);
    assert_eq!(status.cycle_pointer, Some(0));
    assert_eq!(status.next_phase_start, Some(now - secs(37) + secs(40)));

    // 42s in: third cycle, off segment [40s, 45s)
    let routine = Routine::new(
        host,
        RoutineDefinition::default().with_anchor(now - secs(42)).with_cycle("10s/5s"),
    );
    routine.trigger();
    let status = routine.status();
    assert_eq!(status.phase, Phase::Waiting);
    assert_eq!(status.cycles, 3);
    assert_eq!(status.cycle_pointer, Some(1));
    assert_eq!(status.next_phase_start, Some(now - secs(42) + secs(45)));
}

#[test]
fn test_overlap_reaches_errored() {
    let host = host();
    let scheduler = Scheduler::new(host.clone());
    let start = DateTime::from_unix_millis(Epoch::MAIN, START_MILLIS);
    scheduler.load_routines([
        RoutineDefinition::default()
            .with_anchor(start + real_secs(5))
            .with_cycle("3 -u/3 -u"),
        RoutineDefinition::default()
            .with_anchor(start + real_secs(1))
            .with_cycle("1 -u/5 -u"),
    ]);
    let errored = Arc::new(AtomicUsize::new(0));
    let counter = errored.clone();
    scheduler.subscribe(GrandPhase::Errored, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    scheduler.trigger_all();
    // [5s, 8s) and [1s, 2s) do not meet
    assert_eq!(scheduler.phase(), GrandPhase::Waiting);
    assert!(scheduler.verify());

    // once [1s, 2s) runs, its successor [7s, 8s) is visible
    host.advance(StdDuration::from_secs(1));
    assert!(!scheduler.verify());
    assert_eq!(scheduler.phase(), GrandPhase::Errored);
    assert_eq!(errored.load(Ordering::SeqCst), 1);
    assert_eq!(host.pending(), 0);

    host.advance(StdDuration::from_secs(10));
    assert_eq!(scheduler.phase(), GrandPhase::Errored);
    assert_eq!(errored.load(Ordering::SeqCst), 1);
}

#[test]
fn test_single_execution_stops() {
    let host = host();
    let start = DateTime::from_unix_millis(Epoch::MAIN, START_MILLIS);
    let routine = Routine::new(
        host.clone(),
        RoutineDefinition::default().with_anchor(start + real_secs(2)).with_limit(1),
    );
    routine.trigger();
    assert_eq!(routine.phase(), Phase::Waiting);
    host.advance(StdDuration::from_secs(2));
    assert_eq!(routine.phase(), Phase::Stopped);
    assert_eq!(routine.next_phase_start(), None);
    assert_eq!(routine.armed_timers(), 0);
    host.advance(StdDuration::from_secs(86_400 * 3));
    assert_eq!(routine.next_phase_start(), None);
    assert_eq!(host.pending(), 0);
}

#[test]
fn test_alpha_epoch_routine() {
    let host = host();
    let routine = Routine::with_config(host, sbte_routine::RoutineConfig::alpha(), "C[1h/1h]");
    routine.trigger();
    assert_eq!(routine.factory().epoch(), Epoch::ALPHA);
    assert_eq!(routine.phase(), Phase::Ongoing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_host_drives_routine() {
    let host: Arc<dyn TimerHost> = Arc::new(TokioTimerHost::current());
    // 36 fast seconds = 0.5 real seconds
    let routine = Routine::new(host, "C[36s/36s] L[2]");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for phase in Phase::ALL {
        let tx = tx.clone();
        routine.subscribe(phase, move |p| {
            let _ = tx.send(p);
        });
    }
    assert_eq!(rx.recv().await, Some(Phase::Waiting));

    routine.trigger();
    let mut seen = Vec::new();
    while let Ok(Some(phase)) = tokio::time::timeout(StdDuration::from_secs(5), rx.recv()).await {
        seen.push(phase);
        if phase == Phase::Stopped {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![Phase::Ongoing, Phase::Waiting, Phase::Ongoing, Phase::Stopped]
    );
    assert_eq!(routine.armed_timers(), 0);
}
