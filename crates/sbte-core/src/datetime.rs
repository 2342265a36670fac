//! Points in time on the dual clock
//!
//! A [`DateTime`] is an [`Epoch`] plus a [`Duration`] offset from it in fast
//! seconds. The fast calendar, the slow (Gregorian, UTC) calendar and the four
//! timestamps are derived in [`DateTime::set_time`]; every setter funnels
//! through it, so derived fields are never updated piecemeal.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Sub};
use std::sync::Arc;

use chrono::{Datelike, Local, NaiveDate, TimeZone, Timelike, Utc};

use crate::clock::{Clock, SystemClock};
use crate::duration::{Duration, DurationFields};
use crate::error::{check_number, SbteError, SbteResult};
use crate::parse::{self, UnitTokens};
use crate::units::{
    Epoch, TimeSystem, TimeUnit, MAX_UNIX_SLOW_SECONDS, SECONDS_PER_DAY, SECONDS_PER_HOUR,
    SECONDS_PER_MINUTE,
};

/// Fast calendar fields. Year and day are 1-based, month is 0-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FastDate {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub hour: i64,
    pub minute: i64,
    pub second: i64,
}

impl FastDate {
    /// Values in [`TimeUnit`] order
    pub fn as_array(&self) -> [i64; 6] {
        [self.year, self.month, self.day, self.hour, self.minute, self.second]
    }
}

/// Optional calendar fields for building a [`DateTime`].
/// Month is 0-based; year and day are 1-based in both systems.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DateFields {
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub day: Option<i64>,
    pub hour: Option<i64>,
    pub minute: Option<i64>,
    pub second: Option<i64>,
}

impl DateFields {
    fn as_tokens(&self) -> UnitTokens {
        [self.year, self.month, self.day, self.hour, self.minute, self.second]
    }
}

/// A point in time, readable in both systems
#[derive(Clone, Copy)]
pub struct DateTime {
    epoch: Epoch,
    offset: Duration,
    fast: FastDate,
    slow: chrono::DateTime<Utc>,
}

impl DateTime {
    /// Offset from the epoch in fast seconds
    pub fn from_offset(epoch: Epoch, offset: Duration) -> Self {
        let mut dt = DateTime {
            epoch,
            offset,
            fast: FastDate {
                year: 1,
                month: 0,
                day: 1,
                hour: 0,
                minute: 0,
                second: 0,
            },
            slow: chrono::DateTime::<Utc>::default(),
        };
        dt.set_time(offset);
        dt
    }

    /// A real-world instant (millisecond precision)
    pub fn from_slow_instant(epoch: Epoch, instant: chrono::DateTime<Utc>) -> Self {
        Self::from_unix_millis(epoch, instant.timestamp_millis())
    }

    pub fn from_unix_millis(epoch: Epoch, unix_millis: i64) -> Self {
        Self::from_offset(
            epoch,
            Duration::from_fast_secs(epoch.fast_offset_of_millis(unix_millis)),
        )
    }

    /// A bare number is Unix time in slow seconds
    pub fn from_unix_seconds(epoch: Epoch, unix_seconds: f64) -> SbteResult<Self> {
        let unix_seconds = check_in_range(check_number(unix_seconds)?)?;
        let offset = Duration::from_slow_secs(unix_seconds - epoch.slow_seconds as f64)?;
        Ok(Self::from_offset(epoch, offset))
    }

    /// Parse a date expression against a known "now".
    ///
    /// Accepts a Unix timestamp in slow seconds, or the date grammar
    /// `Y<n> M<n>|<month name> D<n> H:M:S [-u|-s]`.
    pub fn parse_at(epoch: Epoch, text: &str, now_millis: i64) -> SbteResult<Self> {
        if let Some(unix_seconds) = parse::numeric(text) {
            return Self::from_unix_seconds(epoch, unix_seconds);
        }
        Self::resolve_at(epoch, text, None, DateFields::default(), now_millis)
    }

    /// Combine explicit fields and a date expression.
    ///
    /// Fields are scanned coarsest to finest. The first one given, explicitly
    /// or in the text, is the most significant unit. Missing fields up to and
    /// including it take the value of "now" in the same system; missing
    /// fields after it take their lowest legal value. Explicit fields win over
    /// text tokens.
    pub fn resolve_at(
        epoch: Epoch,
        text: &str,
        system: Option<TimeSystem>,
        explicit: DateFields,
        now_millis: i64,
    ) -> SbteResult<Self> {
        let system = parse::locale_of(text).or(system).unwrap_or_default();
        let parsed = parse::date_tokens(text, system);
        let given = explicit.as_tokens();
        let now = Self::from_unix_millis(epoch, now_millis);
        let current = match system {
            TimeSystem::Fast => now.fast.as_array(),
            TimeSystem::Slow => now.slow_fields(),
        };

        let mut fields = [0i64; 6];
        let mut seen_msu = false;
        for unit in TimeUnit::ALL {
            let i = unit.index();
            let value = given[i].or(parsed[i]);
            if !seen_msu && value.is_some() {
                seen_msu = true;
                fields[i] = value.unwrap_or(current[i]);
            } else if !seen_msu {
                fields[i] = current[i];
            } else {
                fields[i] = value.unwrap_or(unit.lower_bound());
            }
        }

        match system {
            TimeSystem::Fast => {
                let offset = Duration::from_fields(
                    TimeSystem::Fast,
                    DurationFields {
                        years: fields[0].saturating_sub(1),
                        months: fields[1],
                        days: fields[2].saturating_sub(1),
                        hours: fields[3],
                        minutes: fields[4],
                        seconds: fields[5],
                    },
                )?;
                if !epoch.contains_offset(offset.as_fast_secs()) {
                    return Err(SbteError::InvalidNumber(format!("fast date `{}`", text.trim())));
                }
                Ok(Self::from_offset(epoch, offset))
            }
            TimeSystem::Slow => {
                let unix_seconds = slow_fields_to_unix_seconds(fields)?;
                Ok(Self::from_unix_millis(epoch, unix_seconds * 1000))
            }
        }
    }

    /// Recompute every derived field from a new offset. Offsets beyond the
    /// representable range are clamped to its ends.
    pub fn set_time(&mut self, offset: Duration) {
        let (min, max) = self.epoch.offset_range();
        let fast_offset = offset.as_fast_secs();
        let offset = if (min..=max).contains(&fast_offset) {
            offset
        } else {
            tracing::warn!(fast_offset, "instant outside the representable range, clamping");
            Duration::from_fast_secs(fast_offset.clamp(min, max))
        };
        self.offset = offset;
        let b = offset.fast_breakdown();
        self.fast = FastDate {
            year: b.years + 1,
            month: b.months,
            day: b.days + 1,
            hour: b.hours,
            minute: b.minutes,
            second: b.seconds,
        };
        let millis = self.epoch.millis_of_fast_offset(offset.as_fast_secs());
        self.slow = Utc.timestamp_millis_opt(millis).single().unwrap_or_default();
    }

    /// Set the offset from the epoch, in fast seconds
    pub fn set_fast_offset(&mut self, fast_seconds: i64) {
        self.set_time(Duration::from_fast_secs(fast_seconds));
    }

    /// Set from a Unix time in slow seconds
    pub fn set_unix_slow_seconds(&mut self, unix_seconds: f64) -> SbteResult<()> {
        let unix_seconds = check_in_range(check_number(unix_seconds)?)?;
        self.set_time(Duration::from_slow_secs(
            unix_seconds - self.epoch.slow_seconds as f64,
        )?);
        Ok(())
    }

    pub fn add_fast_seconds(&mut self, fast_seconds: i64) {
        self.set_time(self.offset + Duration::from_fast_secs(fast_seconds));
    }

    /// Replace one fast calendar field (year and day 1-based, month 0-based)
    pub fn set_by_fast_unit(&mut self, unit: TimeUnit, value: i64) {
        let current = self.fast.as_array()[unit.index()];
        let mut offset = self.offset;
        offset.add_fast_time(unit, value.saturating_sub(current));
        self.set_time(offset);
    }

    /// Replace one slow calendar field. Out-of-range values roll over into
    /// the neighbouring fields, e.g. month 12 is January of the next year.
    pub fn set_by_slow_unit(&mut self, unit: TimeUnit, value: i64) -> SbteResult<()> {
        let mut fields = self.slow_fields();
        fields[unit.index()] = value;
        let sub_second = self.slow.timestamp_millis().rem_euclid(1000);
        let unix_seconds = slow_fields_to_unix_seconds(fields)?;
        let millis = unix_seconds * 1000 + sub_second;
        self.set_time(Duration::from_fast_secs(self.epoch.fast_offset_of_millis(millis)));
        Ok(())
    }

    #[inline]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Offset from the epoch
    #[inline]
    pub fn offset(&self) -> Duration {
        self.offset
    }

    #[inline]
    pub fn fast_date(&self) -> FastDate {
        self.fast
    }

    /// The real-world instant
    #[inline]
    pub fn slow_date(&self) -> chrono::DateTime<Utc> {
        self.slow
    }

    /// Slow calendar fields in [`TimeUnit`] order, month 0-based
    pub fn slow_fields(&self) -> [i64; 6] {
        [
            i64::from(self.slow.year()),
            i64::from(self.slow.month0()),
            i64::from(self.slow.day()),
            i64::from(self.slow.hour()),
            i64::from(self.slow.minute()),
            i64::from(self.slow.second()),
        ]
    }

    /// Fast seconds since the epoch
    #[inline]
    pub fn fast_offset(&self) -> i64 {
        self.offset.as_fast_secs()
    }

    /// Slow seconds since the epoch, floored
    #[inline]
    pub fn slow_offset(&self) -> i64 {
        self.offset.as_slow_secs()
    }

    /// Fast seconds since the Unix epoch
    #[inline]
    pub fn unix_fast(&self) -> i64 {
        self.epoch.fast_seconds + self.fast_offset()
    }

    /// Slow seconds since the Unix epoch, floored
    #[inline]
    pub fn unix_slow(&self) -> i64 {
        self.epoch.slow_seconds + self.slow_offset()
    }

    /// Unix milliseconds of this instant
    #[inline]
    pub fn unix_millis(&self) -> i64 {
        self.epoch.millis_of_fast_offset(self.fast_offset())
    }

    pub fn fast_ordinal_day(&self) -> String {
        ordinal(self.fast.day)
    }

    pub fn slow_ordinal_day(&self) -> String {
        ordinal(i64::from(self.slow.day()))
    }

    pub fn fast_month_name(&self) -> &'static str {
        month_name(TimeSystem::Fast.full_month_names(), self.fast.month)
    }

    pub fn fast_month_short(&self) -> &'static str {
        month_name(TimeSystem::Fast.short_month_names(), self.fast.month)
    }

    pub fn slow_month_name(&self) -> &'static str {
        month_name(TimeSystem::Slow.full_month_names(), i64::from(self.slow.month0()))
    }

    pub fn slow_month_short(&self) -> &'static str {
        month_name(TimeSystem::Slow.short_month_names(), i64::from(self.slow.month0()))
    }

    /// The instant in the host's local time zone
    pub fn local_date(&self) -> chrono::DateTime<Local> {
        self.slow.with_timezone(&Local)
    }

    pub fn local_ordinal_day(&self) -> String {
        ordinal(i64::from(self.local_date().day()))
    }

    pub fn local_month_name(&self) -> &'static str {
        month_name(TimeSystem::Slow.full_month_names(), i64::from(self.local_date().month0()))
    }

    pub fn local_month_short(&self) -> &'static str {
        month_name(TimeSystem::Slow.short_month_names(), i64::from(self.local_date().month0()))
    }

    /// e.g. `27th Late Spring Y189`
    pub fn fast_date_string(&self) -> String {
        format!(
            "{} {} Y{}",
            self.fast_ordinal_day(),
            self.fast_month_name(),
            self.fast.year
        )
    }

    /// 12-hour clock, e.g. `06:05 PM`
    pub fn fast_time_string(&self) -> String {
        let meridiem = if self.fast.hour < 12 { "AM" } else { "PM" };
        let hour = match self.fast.hour % 12 {
            0 => 12,
            h => h,
        };
        format!("{:02}:{:02} {}", hour, self.fast.minute, meridiem)
    }
}

/// Gregorian fields (month 0-based, day 1-based) to Unix seconds, with
/// out-of-range fields rolling into their neighbours
fn slow_fields_to_unix_seconds(fields: [i64; 6]) -> SbteResult<i64> {
    let overflow = || SbteError::InvalidNumber(format!("slow date {fields:?}"));
    let year = fields[0]
        .checked_add(fields[1].div_euclid(12))
        .ok_or_else(overflow)?;
    let month = fields[1].rem_euclid(12) as u32 + 1;
    let first_of_month = i32::try_from(year)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, month, 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| SbteError::InvalidNumber(format!("year {year}")))?;
    let weighted = |acc: i64, value: i64, unit: i64| {
        value.checked_mul(unit).and_then(|v| v.checked_add(acc))
    };
    let unix_seconds = Some(first_of_month.and_utc().timestamp())
        .and_then(|acc| weighted(acc, fields[2].checked_sub(1)?, SECONDS_PER_DAY))
        .and_then(|acc| weighted(acc, fields[3], SECONDS_PER_HOUR))
        .and_then(|acc| weighted(acc, fields[4], SECONDS_PER_MINUTE))
        .and_then(|acc| acc.checked_add(fields[5]))
        .ok_or_else(overflow)?;
    if unix_seconds.abs() > MAX_UNIX_SLOW_SECONDS {
        return Err(overflow());
    }
    Ok(unix_seconds)
}

fn check_in_range(unix_seconds: f64) -> SbteResult<f64> {
    if unix_seconds.abs() > MAX_UNIX_SLOW_SECONDS as f64 {
        return Err(SbteError::InvalidNumber(format!("unix time {unix_seconds}")));
    }
    Ok(unix_seconds)
}

fn month_name(names: &'static [&'static str; 12], month: i64) -> &'static str {
    names[month.rem_euclid(12) as usize]
}

/// `1st`, `2nd`, `3rd`, `11th`, `22nd`
pub fn ordinal(n: i64) -> String {
    let suffix = match (n % 100, n % 10) {
        (11..=13, _) => "th",
        (_, 1) => "st",
        (_, 2) => "nd",
        (_, 3) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

impl PartialEq for DateTime {
    fn eq(&self, other: &Self) -> bool {
        self.unix_fast() == other.unix_fast()
    }
}

impl Eq for DateTime {}

impl PartialOrd for DateTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DateTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.unix_fast().cmp(&other.unix_fast())
    }
}

impl Hash for DateTime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unix_fast().hash(state);
    }
}

impl Add<Duration> for DateTime {
    type Output = DateTime;

    fn add(self, rhs: Duration) -> Self::Output {
        DateTime::from_offset(self.epoch, self.offset + rhs)
    }
}

impl Sub<Duration> for DateTime {
    type Output = DateTime;

    fn sub(self, rhs: Duration) -> Self::Output {
        DateTime::from_offset(self.epoch, self.offset - rhs)
    }
}

impl Sub<DateTime> for DateTime {
    type Output = Duration;

    fn sub(self, rhs: DateTime) -> Self::Output {
        Duration::from_fast_secs(self.unix_fast() - rhs.unix_fast())
    }
}

impl fmt::Debug for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DateTime({} | {})",
            self.slow.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self
        )
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.fast_date_string(), self.fast_time_string())
    }
}

/// Builds [`DateTime`]s for one epoch, reading "now" from a [`Clock`]
#[derive(Clone)]
pub struct DateTimeFactory {
    epoch: Epoch,
    clock: Arc<dyn Clock>,
}

impl DateTimeFactory {
    pub fn new(epoch: Epoch, clock: Arc<dyn Clock>) -> Self {
        DateTimeFactory { epoch, clock }
    }

    /// Factory on the operating system clock
    pub fn system(epoch: Epoch) -> Self {
        Self::new(epoch, Arc::new(SystemClock))
    }

    #[inline]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    #[inline]
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn now(&self) -> DateTime {
        DateTime::from_unix_millis(self.epoch, self.now_millis())
    }

    pub fn from_offset(&self, offset: Duration) -> DateTime {
        DateTime::from_offset(self.epoch, offset)
    }

    pub fn from_unix_seconds(&self, unix_seconds: f64) -> SbteResult<DateTime> {
        DateTime::from_unix_seconds(self.epoch, unix_seconds)
    }

    pub fn from_slow_instant(&self, instant: chrono::DateTime<Utc>) -> DateTime {
        DateTime::from_slow_instant(self.epoch, instant)
    }

    pub fn parse(&self, text: &str) -> SbteResult<DateTime> {
        DateTime::parse_at(self.epoch, text, self.now_millis())
    }

    pub fn from_fields(&self, system: TimeSystem, fields: DateFields) -> SbteResult<DateTime> {
        DateTime::resolve_at(self.epoch, "", Some(system), fields, self.now_millis())
    }

    pub fn resolve(
        &self,
        text: &str,
        system: Option<TimeSystem>,
        fields: DateFields,
    ) -> SbteResult<DateTime> {
        DateTime::resolve_at(self.epoch, text, system, fields, self.now_millis())
    }
}

impl Default for DateTimeFactory {
    fn default() -> Self {
        Self::system(Epoch::MAIN)
    }
}

impl fmt::Debug for DateTimeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DateTimeFactory")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
