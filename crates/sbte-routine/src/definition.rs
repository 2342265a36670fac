//! Routine definitions
//!
//! A definition is a single string of bracketed tokens, in any order:
//!
//! - `A[<date>]` anchor the cycle is measured from (default: now)
//! - `C[<d>/<d>/...]` alternating on/off durations, `/` or `|` separated
//!   (default `0/0`, a single instant). Bare numbers are seconds in the
//!   anchor's system.
//! - `L[<n>]` number of on-intervals to run (default and `0`: unbounded)
//! - `U[<date>]` no on-interval starts at or after this date
//!
//! Dates are resolved when the routine is triggered, so a relative anchor
//! such as `A[14:00:00]` follows "now". Malformed tokens fall back to their
//! defaults and are reported through [`ResolvedDefinition::issues`].

use lazy_static::lazy_static;
use regex::Regex;
use sbte_core::parse::{self, token_regex};
use sbte_core::{
    DateFields, DateTime, DateTimeFactory, Duration, SbteError, TimeSystem, FAST_PER_SLOW,
    MAX_UNIX_SLOW_SECONDS,
};

lazy_static! {
    static ref ANCHOR: Regex = token_regex(r"(?:\s|^)A\[(.*?)\]");
    static ref CYCLE: Regex = token_regex(r"(?:\s|^)C\[(.*?)\]");
    static ref LIMIT: Regex = token_regex(r"(?:\s|^)L\[(.*?)\]");
    static ref UNTIL: Regex = token_regex(r"(?:\s|^)U\[(.*?)\]");
}

/// Longest segment: the width of the representable range
const MAX_SEGMENT_FAST_SECS: i64 = 2 * MAX_UNIX_SLOW_SECONDS * FAST_PER_SLOW;

fn capture(regex: &Regex, text: &str) -> Option<String> {
    parse::capture_text(regex, text).map(str::to_string)
}

/// Where a date comes from
#[derive(Clone, Debug, PartialEq)]
pub enum DateSource {
    /// Date expression, resolved against "now" at trigger time
    Text(String),
    /// A fixed point in time
    At(DateTime),
}

impl DateSource {
    fn system(&self) -> TimeSystem {
        match self {
            DateSource::Text(text) => parse::locale_of(text).unwrap_or_default(),
            DateSource::At(_) => TimeSystem::Fast,
        }
    }

    fn resolve(&self, factory: &DateTimeFactory) -> Result<DateTime, SbteError> {
        match self {
            DateSource::Text(text) => factory.resolve(text, None, DateFields::default()),
            DateSource::At(at) => Ok(*at),
        }
    }
}

impl From<DateTime> for DateSource {
    fn from(at: DateTime) -> Self {
        DateSource::At(at)
    }
}

impl From<&str> for DateSource {
    fn from(text: &str) -> Self {
        DateSource::Text(text.to_string())
    }
}

impl From<String> for DateSource {
    fn from(text: String) -> Self {
        DateSource::Text(text)
    }
}

/// Unresolved routine definition
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoutineDefinition {
    pub anchor: Option<DateSource>,
    pub cycle: Option<String>,
    pub limit: Option<String>,
    pub until: Option<DateSource>,
}

impl RoutineDefinition {
    /// Read the bracketed tokens of a definition string. Missing tokens stay
    /// unset; nothing is validated until [`resolve`](Self::resolve).
    pub fn parse(text: &str) -> Self {
        RoutineDefinition {
            anchor: capture(&ANCHOR, text).map(DateSource::Text),
            cycle: capture(&CYCLE, text),
            limit: capture(&LIMIT, text),
            until: capture(&UNTIL, text).map(DateSource::Text),
        }
    }

    pub fn with_anchor(mut self, anchor: impl Into<DateSource>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }

    pub fn with_cycle(mut self, cycle: impl Into<String>) -> Self {
        self.cycle = Some(cycle.into());
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit.to_string());
        self
    }

    pub fn with_until(mut self, until: impl Into<DateSource>) -> Self {
        self.until = Some(until.into());
        self
    }

    /// Resolve dates against the factory's "now" and parse the cycle
    pub fn resolve(&self, factory: &DateTimeFactory) -> ResolvedDefinition {
        let mut issues = Vec::new();

        let anchor = match &self.anchor {
            Some(source) => source.resolve(factory).unwrap_or_else(|e| {
                issues.push(malformed(format!("anchor: {e}")));
                factory.now()
            }),
            None => factory.now(),
        };
        let system = self
            .anchor
            .as_ref()
            .map(DateSource::system)
            .unwrap_or_default();

        let cycle = parse_cycle(self.cycle.as_deref().unwrap_or("0/0"), system, &mut issues);

        let limit = match self.limit.as_deref().map(str::trim) {
            None => None,
            Some(text) => match text.parse::<u64>() {
                Ok(0) => None,
                Ok(n) => Some(n),
                Err(_) => {
                    issues.push(malformed(format!("limit `{text}`")));
                    None
                }
            },
        };

        let until = self.until.as_ref().and_then(|source| {
            source
                .resolve(factory)
                .map_err(|e| issues.push(malformed(format!("until: {e}"))))
                .ok()
        });

        for issue in &issues {
            tracing::warn!(%issue, "routine definition fell back to a default");
        }

        ResolvedDefinition::new(anchor, cycle, limit, until, issues)
    }
}

impl From<&str> for RoutineDefinition {
    fn from(text: &str) -> Self {
        RoutineDefinition::parse(text)
    }
}

impl From<String> for RoutineDefinition {
    fn from(text: String) -> Self {
        RoutineDefinition::parse(&text)
    }
}

fn malformed(detail: String) -> SbteError {
    SbteError::MalformedDefinition(detail)
}

fn parse_cycle(text: &str, system: TimeSystem, issues: &mut Vec<SbteError>) -> Vec<Duration> {
    let mut cycle: Vec<Duration> = text
        .split(['/', '|'])
        .map(|entry| parse_segment(entry.trim(), system, issues))
        .collect();
    if cycle.len() % 2 == 1 {
        cycle.push(Duration::ZERO);
    }
    cycle
}

fn parse_segment(entry: &str, system: TimeSystem, issues: &mut Vec<SbteError>) -> Duration {
    if entry.is_empty() {
        return Duration::ZERO;
    }
    let parsed = match parse::numeric(entry) {
        Some(seconds) => Duration::from_secs_in(system, seconds).ok(),
        None if is_duration(entry) => Duration::try_parse(entry).ok().flatten(),
        None => None,
    };
    match parsed {
        Some(d) if (0..=MAX_SEGMENT_FAST_SECS).contains(&d.as_fast_secs()) => d,
        _ => {
            issues.push(malformed(format!("cycle segment `{entry}`")));
            Duration::ZERO
        }
    }
}

fn is_duration(entry: &str) -> bool {
    parse::numeric(parse::strip_locale(entry)).is_some()
        || !parse::is_empty(&parse::duration_tokens(entry))
}

/// A definition with its dates and durations fixed
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedDefinition {
    pub anchor: DateTime,
    /// Even length; even indices are on, odd indices off
    pub cycle: Vec<Duration>,
    /// Explicit limit, `None` if unbounded
    pub limit: Option<u64>,
    pub until: Option<DateTime>,
    cycle_length: Duration,
    on_length: Duration,
    issues: Vec<SbteError>,
}

impl ResolvedDefinition {
    pub fn new(
        anchor: DateTime,
        cycle: Vec<Duration>,
        limit: Option<u64>,
        until: Option<DateTime>,
        issues: Vec<SbteError>,
    ) -> Self {
        let mut cycle = cycle;
        if cycle.is_empty() || cycle.len() % 2 == 1 {
            cycle.push(Duration::ZERO);
        }
        let cycle_length = cycle.iter().copied().sum();
        let on_length = cycle.iter().step_by(2).copied().sum();
        ResolvedDefinition {
            anchor,
            cycle,
            limit,
            until,
            cycle_length,
            on_length,
            issues,
        }
    }

    /// Sum of every segment
    #[inline]
    pub fn cycle_length(&self) -> Duration {
        self.cycle_length
    }

    /// Sum of the on segments
    #[inline]
    pub fn on_length(&self) -> Duration {
        self.on_length
    }

    /// On/off pairs per cycle
    #[inline]
    pub fn pairs(&self) -> u64 {
        (self.cycle.len() / 2) as u64
    }

    /// A cycle shorter than one fast second runs a single on-interval
    #[inline]
    pub fn execute_once(&self) -> bool {
        self.cycle_length.as_fast_secs() < 1
    }

    /// Limit in force: the explicit one, or 1 for a single-instant cycle
    pub fn effective_limit(&self) -> Option<u64> {
        match self.limit {
            None if self.execute_once() => Some(1),
            limit => limit,
        }
    }

    /// Limit expressed in whole cycles, rounded up
    pub fn cycle_limit(&self) -> Option<u64> {
        self.effective_limit().map(|l| l.div_ceil(self.pairs()))
    }

    /// Segment at `index`, wrapping around the cycle
    #[inline]
    pub fn segment(&self, index: usize) -> Duration {
        self.cycle[index % self.cycle.len()]
    }

    /// Would the routine stop after the on-interval at `pointer`, which ends
    /// at `on_end` and was execution number `executions`?
    pub fn ends_after(&self, executions: u64, on_end: DateTime, pointer: usize) -> bool {
        self.execute_once()
            || self.effective_limit().is_some_and(|l| executions >= l)
            || self
                .until
                .is_some_and(|until| on_end + self.segment(pointer + 1) >= until)
    }

    /// Problems found while resolving; each was replaced by its default
    pub fn issues(&self) -> &[SbteError] {
        &self.issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbte_core::{Epoch, FixedClock, FAST_PER_SLOW};
    use std::sync::Arc;

    const NOW_MILLIS: i64 = 1_700_000_000_000;

    fn factory() -> DateTimeFactory {
        DateTimeFactory::new(Epoch::MAIN, Arc::new(FixedClock::new(NOW_MILLIS)))
    }

    #[test]
    fn test_parse_tokens_any_order() {
        let def = RoutineDefinition::parse("L[3] C[10s/5s] U[Y400] A[Y300 D2]");
        assert_eq!(def.anchor, Some(DateSource::Text("Y300 D2".into())));
        assert_eq!(def.cycle.as_deref(), Some("10s/5s"));
        assert_eq!(def.limit.as_deref(), Some("3"));
        assert_eq!(def.until, Some(DateSource::Text("Y400".into())));
    }

    #[test]
    fn test_defaults() {
        let f = factory();
        let resolved = RoutineDefinition::parse("").resolve(&f);
        assert_eq!(resolved.anchor, f.now());
        assert_eq!(resolved.cycle, vec![Duration::ZERO, Duration::ZERO]);
        assert!(resolved.execute_once());
        assert_eq!(resolved.effective_limit(), Some(1));
        assert_eq!(resolved.until, None);
        assert!(resolved.issues().is_empty());
    }

    #[test]
    fn test_cycle_lengths() {
        let resolved = RoutineDefinition::parse("C[1h|30m/2h]").resolve(&factory());
        assert_eq!(resolved.cycle.len(), 4);
        assert_eq!(resolved.cycle_length().as_fast_secs(), 3 * 3_600 + 1_800);
        assert_eq!(resolved.on_length().as_fast_secs(), 3 * 3_600);
        assert_eq!(resolved.pairs(), 2);
        assert!(!resolved.execute_once());
    }

    #[test]
    fn test_bare_numbers_follow_anchor_system() {
        let fast = RoutineDefinition::parse("A[Y300] C[10/5]").resolve(&factory());
        assert_eq!(fast.cycle[0].as_fast_secs(), 10);

        let slow = RoutineDefinition::parse("A[Y2024 -u] C[10/5]").resolve(&factory());
        assert_eq!(slow.cycle[0].as_fast_secs(), 10 * FAST_PER_SLOW);
        assert_eq!(slow.cycle[1].as_fast_secs(), 5 * FAST_PER_SLOW);

        // an explicit marker on the segment wins
        let mixed = RoutineDefinition::parse("A[Y300] C[10 -u/5]").resolve(&factory());
        assert_eq!(mixed.cycle[0].as_fast_secs(), 10 * FAST_PER_SLOW);
        assert!(mixed.issues().is_empty());
    }

    #[test]
    fn test_limit() {
        let f = factory();
        assert_eq!(RoutineDefinition::parse("C[1s/1s] L[0]").resolve(&f).limit, None);
        let resolved = RoutineDefinition::parse("C[1s/1s/1s/1s] L[3]").resolve(&f);
        assert_eq!(resolved.limit, Some(3));
        assert_eq!(resolved.cycle_limit(), Some(2));
        let explicit_once = RoutineDefinition::parse("L[4]").resolve(&f);
        assert_eq!(explicit_once.effective_limit(), Some(4));
    }

    #[test]
    fn test_oversized_values_fall_back() {
        let f = factory();
        let resolved = RoutineDefinition::parse("C[1000000000000y/1s]").resolve(&f);
        assert_eq!(resolved.cycle[0], Duration::ZERO);
        assert_eq!(resolved.cycle[1].as_fast_secs(), 1);
        assert_eq!(resolved.issues().len(), 1);

        // fits an i64 but is longer than any span between two instants
        let resolved = RoutineDefinition::parse("C[200000000000y/1s]").resolve(&f);
        assert_eq!(resolved.cycle[0], Duration::ZERO);

        let resolved = RoutineDefinition::parse("A[Y30000000000] U[Y30000000000]").resolve(&f);
        assert_eq!(resolved.anchor, f.now());
        assert_eq!(resolved.until, None);
        assert_eq!(resolved.issues().len(), 2);
    }

    #[test]
    fn test_malformed_tokens_fall_back() {
        let resolved = RoutineDefinition::parse("C[abc/5s] L[many]").resolve(&factory());
        assert_eq!(resolved.cycle[0], Duration::ZERO);
        assert_eq!(resolved.cycle[1].as_fast_secs(), 5);
        assert_eq!(resolved.limit, None);
        assert_eq!(resolved.issues().len(), 2);
        assert!(matches!(resolved.issues()[0], SbteError::MalformedDefinition(_)));
    }

    #[test]
    fn test_negative_segment_rejected() {
        let resolved = RoutineDefinition::parse("C[-5/5]").resolve(&factory());
        assert_eq!(resolved.cycle[0], Duration::ZERO);
        assert_eq!(resolved.issues().len(), 1);
    }

    #[test]
    fn test_builder() {
        let f = factory();
        let anchor = f.now();
        let resolved = RoutineDefinition::default()
            .with_anchor(anchor)
            .with_cycle("10s/5s")
            .with_limit(2)
            .resolve(&f);
        assert_eq!(resolved.anchor, anchor);
        assert_eq!(resolved.limit, Some(2));
        assert_eq!(resolved.cycle_length().as_fast_secs(), 15);
    }

    #[test]
    fn test_ends_after() {
        let f = factory();
        let anchor = f.now();
        let resolved = RoutineDefinition::default()
            .with_anchor(anchor)
            .with_cycle("10s/5s")
            .with_until(anchor + Duration::from_fast_secs(27))
            .resolve(&f);
        // next start at 15 < 27
        assert!(!resolved.ends_after(1, anchor + Duration::from_fast_secs(10), 0));
        // next start at 30 >= 27
        assert!(resolved.ends_after(2, anchor + Duration::from_fast_secs(25), 0));
    }
}
