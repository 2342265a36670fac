//! Elapsed time on the dual clock
//!
//! A [`Duration`] stores a single canonical count of fast seconds. The fast and
//! slow breakdowns are views computed from it, so they can never disagree with
//! the stored value or with each other.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use crate::error::{check_number, SbteError, SbteResult};
use crate::parse;
use crate::units::{
    TimeSystem, TimeUnit, FAST_PER_SLOW, SECONDS_PER_DAY, SECONDS_PER_HOUR, SECONDS_PER_MINUTE,
    SECONDS_PER_MONTH, SECONDS_PER_YEAR,
};

/// Signed elapsed time, in whole fast seconds
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(i64);

/// Per-unit magnitudes used to build a [`Duration`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DurationFields {
    pub years: i64,
    pub months: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl DurationFields {
    pub fn seconds(seconds: i64) -> Self {
        DurationFields {
            seconds,
            ..Default::default()
        }
    }

    fn from_tokens(tokens: &parse::UnitTokens) -> Self {
        let v = |unit: TimeUnit| parse::get(tokens, unit).unwrap_or(0);
        DurationFields {
            years: v(TimeUnit::Year),
            months: v(TimeUnit::Month),
            days: v(TimeUnit::Day),
            hours: v(TimeUnit::Hour),
            minutes: v(TimeUnit::Minute),
            seconds: v(TimeUnit::Second),
        }
    }
}

/// Fast-system breakdown
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FastBreakdown {
    /// Floored; the only field that can be negative
    pub years: i64,
    /// 0..12
    pub months: i64,
    /// 0..31
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl FastBreakdown {
    /// Values in [`TimeUnit`] order
    pub fn as_array(&self) -> [i64; 6] {
        [
            self.years,
            self.months,
            self.days,
            self.hours,
            self.minutes,
            self.seconds,
        ]
    }

    /// Weighted sum back to fast seconds
    pub fn total(&self) -> i64 {
        self.years
            .saturating_mul(SECONDS_PER_YEAR)
            .saturating_add(self.months * SECONDS_PER_MONTH)
            .saturating_add(self.days * SECONDS_PER_DAY)
            .saturating_add(self.hours * SECONDS_PER_HOUR)
            .saturating_add(self.minutes * SECONDS_PER_MINUTE)
            .saturating_add(self.seconds)
    }
}

/// Slow-system breakdown
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlowBreakdown {
    /// Floored; the only field that can be negative
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    /// Fast ticks left over below one slow second, 0..72
    pub fast_ticks: i64,
}

impl SlowBreakdown {
    /// Whole slow seconds (remainder dropped)
    pub fn total_seconds(&self) -> i64 {
        self.days * SECONDS_PER_DAY
            + self.hours * SECONDS_PER_HOUR
            + self.minutes * SECONDS_PER_MINUTE
            + self.seconds
    }

    /// Weighted sum back to fast seconds
    pub fn total(&self) -> i64 {
        self.total_seconds()
            .saturating_mul(FAST_PER_SLOW)
            .saturating_add(self.fast_ticks)
    }
}

impl Duration {
    pub const ZERO: Duration = Duration(0);

    #[inline]
    pub const fn from_fast_secs(fast_seconds: i64) -> Self {
        Duration(fast_seconds)
    }

    /// A bare number is slow seconds
    pub fn from_slow_secs(slow_seconds: f64) -> SbteResult<Self> {
        Self::from_secs_in(TimeSystem::Slow, slow_seconds)
    }

    /// Seconds counted in the given system, floored to a whole fast second
    pub fn from_secs_in(system: TimeSystem, seconds: f64) -> SbteResult<Self> {
        let seconds = check_number(seconds)?;
        let fast = match system {
            TimeSystem::Fast => seconds,
            TimeSystem::Slow => seconds * FAST_PER_SLOW as f64,
        }
        .floor();
        // i64::MAX as f64 rounds up to 2^63, which is already out of range
        if fast < i64::MIN as f64 || fast >= i64::MAX as f64 {
            return Err(SbteError::InvalidNumber(format!("{seconds} seconds")));
        }
        Ok(Duration(fast as i64))
    }

    /// Weighted sum of explicit magnitudes.
    /// Slow time has no month or year, so those magnitudes are dropped there.
    /// Fails with [`SbteError::InvalidNumber`] if the sum leaves the `i64` range.
    pub fn from_fields(system: TimeSystem, fields: DurationFields) -> SbteResult<Self> {
        let weighted = |value: i64, unit: i64, acc: i64| {
            value.checked_mul(unit).and_then(|v| v.checked_add(acc))
        };
        let day_and_finer = Some(fields.seconds)
            .and_then(|acc| weighted(fields.minutes, SECONDS_PER_MINUTE, acc))
            .and_then(|acc| weighted(fields.hours, SECONDS_PER_HOUR, acc))
            .and_then(|acc| weighted(fields.days, SECONDS_PER_DAY, acc));
        let total = match system {
            TimeSystem::Fast => day_and_finer
                .and_then(|acc| weighted(fields.months, SECONDS_PER_MONTH, acc))
                .and_then(|acc| weighted(fields.years, SECONDS_PER_YEAR, acc)),
            TimeSystem::Slow => day_and_finer.and_then(|acc| acc.checked_mul(FAST_PER_SLOW)),
        };
        total
            .map(Duration)
            .ok_or_else(|| SbteError::InvalidNumber(format!("{fields:?} overflows")))
    }

    /// Parse a duration expression such as `"2y 3mo 1d 3h 2m 50s"` or
    /// `"1h 30m -u"`. A wholly numeric text is slow seconds, and a number
    /// followed by a locale marker is seconds of that system. Text without
    /// any token, or too large to represent, is zero.
    pub fn parse(text: &str) -> Self {
        Self::parse_or(text, None)
    }

    /// Parse, falling back to explicit magnitudes when no token matches or
    /// the text does not fit. The trailing locale marker picks the system;
    /// fast by default.
    pub fn parse_or(text: &str, fallback: Option<(TimeSystem, DurationFields)>) -> Self {
        let fallback_value = || match fallback {
            Some((system, fields)) => {
                let system = parse::locale_of(text).unwrap_or(system);
                Self::from_fields(system, fields).unwrap_or(Duration::ZERO)
            }
            None => Duration::ZERO,
        };
        match Self::try_parse(text) {
            Ok(Some(duration)) => duration,
            Ok(None) => fallback_value(),
            Err(e) => {
                tracing::warn!(%e, "duration fell back to its default");
                fallback_value()
            }
        }
    }

    /// Parse strictly. `Ok(None)` if the text holds no duration at all,
    /// [`SbteError::MalformedDefinition`] if it holds one too large to
    /// represent.
    pub fn try_parse(text: &str) -> SbteResult<Option<Self>> {
        let too_large =
            |e: SbteError| SbteError::MalformedDefinition(format!("duration `{}`: {e}", text.trim()));
        if let Some(seconds) = parse::numeric(text) {
            return Self::from_secs_in(TimeSystem::Slow, seconds).map(Some).map_err(too_large);
        }
        let locale = parse::locale_of(text);
        if let (Some(system), Some(seconds)) = (locale, parse::numeric(parse::strip_locale(text))) {
            return Self::from_secs_in(system, seconds).map(Some).map_err(too_large);
        }
        let tokens = parse::duration_tokens(text);
        if parse::has_overflow(text) {
            return Err(too_large(SbteError::InvalidNumber("token magnitude".to_string())));
        }
        if parse::is_empty(&tokens) {
            return Ok(None);
        }
        Self::from_fields(locale.unwrap_or_default(), DurationFields::from_tokens(&tokens))
            .map(Some)
            .map_err(too_large)
    }

    #[inline]
    pub const fn as_fast_secs(self) -> i64 {
        self.0
    }

    /// Whole slow seconds, floored
    #[inline]
    pub fn as_slow_secs(self) -> i64 {
        self.0.div_euclid(FAST_PER_SLOW)
    }

    /// Slow seconds with the fractional remainder
    #[inline]
    pub fn as_slow_secs_f64(self) -> f64 {
        self.0 as f64 / FAST_PER_SLOW as f64
    }

    /// Real milliseconds, rounded up so a timer armed for it never fires early
    pub fn as_slow_millis_ceil(self) -> i64 {
        let millis = self.0 as i128 * 1000;
        let ratio = FAST_PER_SLOW as i128;
        let ceil = millis.div_euclid(ratio) + i128::from(millis.rem_euclid(ratio) != 0);
        i64::try_from(ceil).unwrap_or(i64::MAX)
    }

    pub fn fast_breakdown(self) -> FastBreakdown {
        let total = self.0;
        let rest = total.rem_euclid(SECONDS_PER_YEAR);
        FastBreakdown {
            years: total.div_euclid(SECONDS_PER_YEAR),
            months: rest / SECONDS_PER_MONTH,
            days: rest % SECONDS_PER_MONTH / SECONDS_PER_DAY,
            hours: rest % SECONDS_PER_DAY / SECONDS_PER_HOUR,
            minutes: rest % SECONDS_PER_HOUR / SECONDS_PER_MINUTE,
            seconds: rest % SECONDS_PER_MINUTE,
        }
    }

    pub fn slow_breakdown(self) -> SlowBreakdown {
        let seconds = self.0.div_euclid(FAST_PER_SLOW);
        let rest = seconds.rem_euclid(SECONDS_PER_DAY);
        SlowBreakdown {
            days: seconds.div_euclid(SECONDS_PER_DAY),
            hours: rest / SECONDS_PER_HOUR,
            minutes: rest % SECONDS_PER_HOUR / SECONDS_PER_MINUTE,
            seconds: rest % SECONDS_PER_MINUTE,
            fast_ticks: self.0.rem_euclid(FAST_PER_SLOW),
        }
    }

    /// Add whole units of fast time
    pub fn add_fast_time(&mut self, unit: TimeUnit, amount: i64) -> &mut Self {
        let step = amount.saturating_mul(TimeSystem::Fast.fast_seconds(unit));
        *self = Duration(self.0.saturating_add(step));
        self
    }

    /// Add whole units of slow time. Year and month are not slow units and
    /// leave the value untouched.
    pub fn add_slow_time(&mut self, unit: TimeUnit, amount: i64) -> &mut Self {
        if TimeSystem::Slow.supports(unit) {
            let step = amount.saturating_mul(TimeSystem::Slow.fast_seconds(unit));
            *self = Duration(self.0.saturating_add(step));
        }
        self
    }

    /// `2y 3mo 1d 04:05:06`; zero-valued day/month/year parts are left out
    pub fn fast_string(self) -> String {
        let b = self.fast_breakdown();
        let mut parts = Vec::with_capacity(4);
        if b.years != 0 {
            parts.push(format!("{}y", b.years));
        }
        if b.months != 0 {
            parts.push(format!("{}mo", b.months));
        }
        if b.days != 0 {
            parts.push(format!("{}d", b.days));
        }
        parts.push(format_clock(b.hours, b.minutes, b.seconds, 0));
        parts.join(" ")
    }

    /// `1d 02:03:04 [+5/72s]`; the bracket only appears for a non-zero remainder
    pub fn slow_string(self) -> String {
        let b = self.slow_breakdown();
        let clock = format_clock(b.hours, b.minutes, b.seconds, b.fast_ticks);
        if b.days != 0 {
            format!("{}d {}", b.days, clock)
        } else {
            clock
        }
    }
}

fn format_clock(hours: i64, minutes: i64, seconds: i64, fast_ticks: i64) -> String {
    if fast_ticks != 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02} [+{fast_ticks}/{FAST_PER_SLOW}s]")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

impl Add for Duration {
    type Output = Duration;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Duration {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Duration {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Duration) -> Self::Output {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Duration {
    #[inline]
    fn sub_assign(&mut self, rhs: Duration) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Neg for Duration {
    type Output = Duration;

    #[inline]
    fn neg(self) -> Self::Output {
        Duration(self.0.saturating_neg())
    }
}

impl Mul<i64> for Duration {
    type Output = Duration;

    #[inline]
    fn mul(self, rhs: i64) -> Self::Output {
        Duration(self.0.saturating_mul(rhs))
    }
}

impl Sum for Duration {
    fn sum<I: Iterator<Item = Duration>>(iter: I) -> Self {
        iter.fold(Duration::ZERO, Add::add)
    }
}

impl From<Duration> for i64 {
    fn from(d: Duration) -> Self {
        d.0
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({}f)", self.0)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (slow), {} (fast)", self.slow_string(), self.fast_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SbteError;
    use proptest::prelude::*;

    #[test]
    fn test_bare_number_is_slow_seconds() {
        let d = Duration::parse("10");
        assert_eq!(d.as_fast_secs(), 720);
        assert_eq!(d.as_slow_secs(), 10);
        assert_eq!(Duration::from_slow_secs(1.5).unwrap().as_fast_secs(), 108);
    }

    #[test]
    fn test_bare_number_with_locale() {
        assert_eq!(Duration::parse("10 -s").as_fast_secs(), 10);
        assert_eq!(Duration::parse("10 -u").as_fast_secs(), 720);
        assert_eq!(Duration::parse("S").as_fast_secs(), 0);
    }

    #[test]
    fn test_parse_fast_tokens() {
        let d = Duration::parse("1y 2mo 3d 4h 5m 6s");
        let expected = SECONDS_PER_YEAR + 2 * SECONDS_PER_MONTH + 3 * SECONDS_PER_DAY + 4 * 3600 + 5 * 60 + 6;
        assert_eq!(d.as_fast_secs(), expected);
        assert_eq!(
            d.fast_breakdown().as_array(),
            [1, 2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn test_parse_slow_tokens_drop_month_and_year() {
        let d = Duration::parse("2y 1mo 1h 30m -u");
        assert_eq!(d.as_fast_secs(), 5400 * 72);
        let b = d.slow_breakdown();
        assert_eq!((b.days, b.hours, b.minutes, b.seconds, b.fast_ticks), (0, 1, 30, 0, 0));
    }

    #[test]
    fn test_parse_without_tokens() {
        assert_eq!(Duration::parse("nothing here"), Duration::ZERO);
        let fallback = Some((TimeSystem::Fast, DurationFields::seconds(42)));
        assert_eq!(Duration::parse_or("", fallback).as_fast_secs(), 42);
        // locale marker still applies to the explicit fields
        assert_eq!(Duration::parse_or("-u", fallback).as_fast_secs(), 42 * 72);
        // tokens win over explicit fields
        assert_eq!(Duration::parse_or("3s", fallback).as_fast_secs(), 3);
    }

    #[test]
    fn test_invalid_number() {
        assert!(matches!(
            Duration::from_slow_secs(f64::NAN),
            Err(SbteError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_oversized_tokens_fall_back() {
        assert_eq!(Duration::parse("1000000000000y"), Duration::ZERO);
        assert_eq!(Duration::parse("99999999999999999999s"), Duration::ZERO);
        assert_eq!(Duration::parse("1e300"), Duration::ZERO);
        assert!(matches!(
            Duration::try_parse("1000000000000y 3s"),
            Err(SbteError::MalformedDefinition(_))
        ));
        let fallback = Some((TimeSystem::Fast, DurationFields::seconds(42)));
        assert_eq!(Duration::parse_or("1000000000000y", fallback).as_fast_secs(), 42);
        // the largest year count that still fits
        let years = i64::MAX / SECONDS_PER_YEAR;
        let d = Duration::parse(&format!("{years}y"));
        assert_eq!(d.as_fast_secs(), years * SECONDS_PER_YEAR);
    }

    #[test]
    fn test_from_fields_overflow() {
        let fields = DurationFields {
            days: i64::MAX / SECONDS_PER_DAY,
            ..Default::default()
        };
        assert!(Duration::from_fields(TimeSystem::Fast, fields).is_ok());
        assert!(matches!(
            Duration::from_fields(TimeSystem::Slow, fields),
            Err(SbteError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_try_parse() {
        assert_eq!(Duration::try_parse("abc"), Ok(None));
        assert_eq!(Duration::try_parse("2m"), Ok(Some(Duration::from_fast_secs(120))));
    }

    #[test]
    fn test_arithmetic_saturates() {
        let max = Duration::from_fast_secs(i64::MAX);
        assert_eq!(max + Duration::from_fast_secs(1), max);
        assert_eq!(max * 2, max);
        assert_eq!(-Duration::from_fast_secs(i64::MIN), max);
        let mut d = max;
        d.add_fast_time(TimeUnit::Year, i64::MAX);
        assert_eq!(d, max);
        assert_eq!(max.as_slow_millis_ceil(), i64::MAX);
    }

    #[test]
    fn test_add_time() {
        let mut d = Duration::ZERO;
        d.add_fast_time(TimeUnit::Month, 2).add_fast_time(TimeUnit::Second, 5);
        assert_eq!(d.as_fast_secs(), 2 * SECONDS_PER_MONTH + 5);

        let mut d = Duration::ZERO;
        d.add_slow_time(TimeUnit::Hour, 1);
        assert_eq!(d.as_fast_secs(), 3600 * 72);

        // not a slow unit: no-op
        d.add_slow_time(TimeUnit::Year, 3);
        assert_eq!(d.as_fast_secs(), 3600 * 72);
    }

    #[test]
    fn test_negative_breakdown() {
        let d = Duration::from_fast_secs(-1);
        let f = d.fast_breakdown();
        assert_eq!(f.years, -1);
        assert_eq!(f.months, 11);
        assert_eq!(f.days, 30);
        assert_eq!(f.total(), -1);

        let s = d.slow_breakdown();
        assert_eq!(s.days, -1);
        assert_eq!(s.fast_ticks, 71);
        assert_eq!(s.total(), -1);
    }

    #[test]
    fn test_strings() {
        let d = Duration::parse("1y 2d 3h 4m 5s");
        assert_eq!(d.fast_string(), "1y 2d 03:04:05");
        assert_eq!(Duration::from_fast_secs(77).slow_string(), "00:00:01 [+5/72s]");
        assert_eq!(Duration::parse("1d 2h -u").slow_string(), "1d 02:00:00");
        assert_eq!(Duration::ZERO.fast_string(), "00:00:00");
        assert_eq!(
            Duration::parse("60").to_string(),
            "00:01:00 (slow), 01:12:00 (fast)"
        );
    }

    #[test]
    fn test_millis_ceil() {
        assert_eq!(Duration::from_fast_secs(72).as_slow_millis_ceil(), 1000);
        // 10 fast seconds = 138.88..ms
        assert_eq!(Duration::from_fast_secs(10).as_slow_millis_ceil(), 139);
        assert_eq!(Duration::ZERO.as_slow_millis_ceil(), 0);
    }

    proptest! {
        #[test]
        fn prop_slow_seconds_roundtrip(n in -10_000_000_000i64..10_000_000_000i64) {
            let d = Duration::from_slow_secs(n as f64).unwrap();
            prop_assert_eq!(d.slow_breakdown().total_seconds(), n);
            prop_assert_eq!(d.slow_breakdown().fast_ticks, 0);
            prop_assert_eq!(d.as_fast_secs(), n * FAST_PER_SLOW);
        }

        #[test]
        fn prop_breakdowns_reconstruct(total in i64::MIN / 4..i64::MAX / 4) {
            let d = Duration::from_fast_secs(total);
            prop_assert_eq!(d.fast_breakdown().total(), total);
            prop_assert_eq!(d.slow_breakdown().total(), total);
        }

        #[test]
        fn prop_fields_roundtrip(
            years in 0i64..1000,
            months in 0i64..12,
            days in 0i64..31,
            hours in 0i64..24,
            minutes in 0i64..60,
            seconds in 0i64..60,
        ) {
            let fields = DurationFields { years, months, days, hours, minutes, seconds };
            let d = Duration::from_fields(TimeSystem::Fast, fields).unwrap();
            prop_assert_eq!(d.fast_breakdown().as_array(), [years, months, days, hours, minutes, seconds]);
        }
    }
}
