//! Benchmarks for SBTE text parsing

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sbte_core::{DateFields, DateTimeFactory, Duration, Epoch, FixedClock, TimeSystem};
use sbte_routine::RoutineDefinition;

const NOW_MILLIS: i64 = 1_700_000_000_000;

fn factory() -> DateTimeFactory {
    DateTimeFactory::new(Epoch::MAIN, Arc::new(FixedClock::new(NOW_MILLIS)))
}

fn bench_duration_parse(c: &mut Criterion) {
    c.bench_function("duration_parse", |b| {
        b.iter(|| Duration::parse(black_box("2y 3mo 1d 4h 5m 6s")))
    });
}

fn bench_duration_parse_slow(c: &mut Criterion) {
    c.bench_function("duration_parse_slow", |b| {
        b.iter(|| Duration::parse(black_box("1d 2h 30m -u")))
    });
}

fn bench_date_resolve(c: &mut Criterion) {
    let factory = factory();

    c.bench_function("date_resolve", |b| {
        b.iter(|| factory.resolve(black_box("Y189 Late Spring D27 18:05:00"), None, DateFields::default()))
    });
}

fn bench_date_resolve_slow_fields(c: &mut Criterion) {
    let factory = factory();
    let fields = DateFields {
        hour: Some(14),
        ..Default::default()
    };

    c.bench_function("date_resolve_slow_fields", |b| {
        b.iter(|| factory.from_fields(TimeSystem::Slow, black_box(fields)))
    });
}

fn bench_definition_resolve(c: &mut Criterion) {
    let factory = factory();
    let definition = RoutineDefinition::parse("A[Y300 M2 D1] C[1h/30m|2h/30m] L[10] U[Y301]");

    c.bench_function("definition_resolve", |b| {
        b.iter(|| black_box(&definition).resolve(&factory))
    });
}

criterion_group!(
    benches,
    bench_duration_parse,
    bench_duration_parse_slow,
    bench_date_resolve,
    bench_date_resolve_slow_fields,
    bench_definition_resolve,
);
criterion_main!(benches);
