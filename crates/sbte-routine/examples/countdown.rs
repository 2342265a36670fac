//! Routine Countdown Example
//!
//! Runs two alternating routines under a scheduler on the tokio host and
//! counts down to each grand boundary. Set `RUST_LOG=sbte_routine=debug` to
//! see the timers being armed.

use std::sync::Arc;
use std::time::Duration;

use sbte_core::{Duration as FastDuration, FAST_PER_SLOW};
use sbte_routine::{GrandPhase, Phase, Routine, RoutineDefinition, Scheduler, TimerHost, TokioTimerHost};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    println!("=== SBTE Routine Countdown ===\n");

    let host: Arc<dyn TimerHost> = Arc::new(TokioTimerHost::current());

    // 1. A single routine: 3 real seconds on, 2 off, three times
    println!("1. Single routine");
    let routine = Routine::new(host.clone(), "C[3 -u/2 -u] L[3]");
    for phase in Phase::ALL {
        routine.subscribe(phase, |p| println!("   routine -> {p}"));
    }
    routine.trigger();
    println!("   now:  {}", routine.factory().now());
    println!("   next: {:?}", routine.next_phase_start());
    routine.start_countdown(|tick| {
        println!("   {}s left ({})", tick.remaining_secs, tick.phase);
    });
    tokio::time::sleep(Duration::from_secs(4)).await;
    routine.pause();

    // 2. Two routines taking turns
    println!("\n2. Scheduler");
    let scheduler = Scheduler::new(host.clone());
    let now = routine.factory().now();
    let second = FastDuration::from_fast_secs(FAST_PER_SLOW);
    scheduler.load_routines([
        RoutineDefinition::default()
            .with_anchor(now + second)
            .with_cycle("2 -u/2 -u")
            .with_limit(2),
        RoutineDefinition::default()
            .with_anchor(now + second * 3)
            .with_cycle("2 -u/2 -u")
            .with_limit(2),
    ]);
    for phase in GrandPhase::ALL {
        scheduler.subscribe(phase, |p| println!("   grand -> {p}"));
    }
    scheduler.trigger_all();
    println!("   next start: {:?}", scheduler.next_start());
    println!("   next end:   {:?}", scheduler.next_end());

    while scheduler.phase() != GrandPhase::Stopped && scheduler.phase() != GrandPhase::Errored {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = parking_lot::Mutex::new(Some(tx));
        let started = scheduler.start_countdown(move |tick| {
            println!("   {}s to next grand boundary ({})", tick.remaining_secs, tick.phase);
            if tick.is_final() {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            }
        });
        if started.is_none() {
            break;
        }
        let _ = rx.await;
        // let the boundary itself fire
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    println!("\n   final grand phase: {}", scheduler.phase());
}
