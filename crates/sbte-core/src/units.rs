//! Unit configuration for the two clocks
//!
//! SBTE relates two time scales by a fixed integer ratio:
//! - Fast time: the in-universe clock, six units, fixed 31-day months and 372-day years
//! - Slow time: the real-world clock, four units (day and finer) plus a
//!   sub-second remainder counted in fast ticks
//!
//! One slow second is exactly [`FAST_PER_SLOW`] fast seconds.

use crate::error::SbteError;

/// Fast seconds per slow second
pub const FAST_PER_SLOW: i64 = 72;

pub const SECONDS_PER_MINUTE: i64 = 60;
pub const SECONDS_PER_HOUR: i64 = 3_600;
pub const SECONDS_PER_DAY: i64 = 86_400;
/// 31 days, calendar-insensitive
pub const SECONDS_PER_MONTH: i64 = 2_678_400;
/// 12 months of 31 days
pub const SECONDS_PER_YEAR: i64 = 32_140_800;

/// Unix slow seconds bounding every representable instant, either side of
/// 1970 (about 250,000 years, inside the Gregorian calendar's range)
pub const MAX_UNIX_SLOW_SECONDS: i64 = 8_000_000_000_000;

/// Time units, coarsest to finest
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TimeUnit {
    Year = 0,
    Month = 1,
    Day = 2,
    Hour = 3,
    Minute = 4,
    Second = 5,
}

impl TimeUnit {
    /// All units, coarsest first
    pub const ALL: [TimeUnit; 6] = [
        TimeUnit::Year,
        TimeUnit::Month,
        TimeUnit::Day,
        TimeUnit::Hour,
        TimeUnit::Minute,
        TimeUnit::Second,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Length of one unit in seconds of its own system
    pub fn seconds(self) -> i64 {
        match self {
            TimeUnit::Year => SECONDS_PER_YEAR,
            TimeUnit::Month => SECONDS_PER_MONTH,
            TimeUnit::Day => SECONDS_PER_DAY,
            TimeUnit::Hour => SECONDS_PER_HOUR,
            TimeUnit::Minute => SECONDS_PER_MINUTE,
            TimeUnit::Second => 1,
        }
    }

    /// Smallest legal calendar value of this field
    pub fn lower_bound(self) -> i64 {
        match self {
            TimeUnit::Day => 1,
            _ => 0,
        }
    }
}

impl TryFrom<usize> for TimeUnit {
    type Error = SbteError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        TimeUnit::ALL
            .get(index)
            .copied()
            .ok_or(SbteError::InvalidUnitIndex(index))
    }
}

/// Which clock a value is expressed in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TimeSystem {
    /// In-universe time
    #[default]
    Fast,
    /// Real-world time
    Slow,
}

impl TimeSystem {
    /// Does this system know the unit?
    /// Slow time has no fixed-length month or year.
    pub fn supports(self, unit: TimeUnit) -> bool {
        match self {
            TimeSystem::Fast => true,
            TimeSystem::Slow => unit >= TimeUnit::Day,
        }
    }

    /// Fast seconds in one unit of this system
    pub fn fast_seconds(self, unit: TimeUnit) -> i64 {
        match self {
            TimeSystem::Fast => unit.seconds(),
            TimeSystem::Slow => unit.seconds() * FAST_PER_SLOW,
        }
    }

    /// Full month names used when reading and writing dates of this system
    pub fn full_month_names(self) -> &'static [&'static str; 12] {
        match self {
            TimeSystem::Fast => &FAST_MONTHS_FULL,
            TimeSystem::Slow => &SLOW_MONTHS_FULL,
        }
    }

    /// Abbreviated month names for this system
    pub fn short_month_names(self) -> &'static [&'static str; 12] {
        match self {
            TimeSystem::Fast => &FAST_MONTHS_SHORT,
            TimeSystem::Slow => &SLOW_MONTHS_SHORT,
        }
    }
}

/// Anchor mapping fast-time zero onto a slow (Unix) instant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Epoch {
    /// Unix timestamp of fast-time zero, slow seconds
    pub slow_seconds: i64,
    /// Same instant in fast seconds since the Unix epoch
    pub fast_seconds: i64,
}

impl Epoch {
    /// Main network epoch
    pub const MAIN: Epoch = Epoch::from_slow_seconds(1_560_275_700);

    /// Alpha network epoch, shifted 2.45 real days earlier
    pub const ALPHA: Epoch = Epoch::from_slow_seconds(1_560_275_700 - 211_680);

    pub const fn from_slow_seconds(slow_seconds: i64) -> Self {
        Epoch {
            slow_seconds,
            fast_seconds: slow_seconds * FAST_PER_SLOW,
        }
    }

    /// Fast seconds since this epoch for a Unix time in milliseconds (floored)
    pub fn fast_offset_of_millis(&self, unix_millis: i64) -> i64 {
        let since = unix_millis as i128 - self.slow_seconds as i128 * 1000;
        saturate((since * FAST_PER_SLOW as i128).div_euclid(1000))
    }

    /// Unix milliseconds for a fast offset from this epoch (floored)
    pub fn millis_of_fast_offset(&self, fast_offset: i64) -> i64 {
        let millis = (fast_offset as i128 * 1000).div_euclid(FAST_PER_SLOW as i128);
        saturate(millis + self.slow_seconds as i128 * 1000)
    }

    /// Smallest and largest fast offsets of a representable instant
    pub fn offset_range(&self) -> (i64, i64) {
        (
            (-MAX_UNIX_SLOW_SECONDS - self.slow_seconds) * FAST_PER_SLOW,
            (MAX_UNIX_SLOW_SECONDS - self.slow_seconds) * FAST_PER_SLOW,
        )
    }

    /// Is the instant at `fast_offset` representable?
    pub fn contains_offset(&self, fast_offset: i64) -> bool {
        let (min, max) = self.offset_range();
        (min..=max).contains(&fast_offset)
    }
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

impl Default for Epoch {
    fn default() -> Self {
        Epoch::MAIN
    }
}

pub const SLOW_MONTHS_FULL: [&str; 12] = [
    "January", "February", "March", "April", "May", "June",
    "July", "August", "September", "October", "November", "December",
];

pub const SLOW_MONTHS_SHORT: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

pub const FAST_MONTHS_FULL: [&str; 12] = [
    "Early Spring", "Spring", "Late Spring", "Early Summer", "Summer", "Late Summer",
    "Early Autumn", "Autumn", "Late Autumn", "Early Winter", "Winter", "Late Winter",
];

pub const FAST_MONTHS_SHORT: [&str; 12] = [
    "ESP", "SP", "LSP", "ESU", "SU", "LSU", "EAU", "AU", "LAU", "EWI", "WI", "LWI",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios_are_consistent() {
        assert_eq!(SECONDS_PER_MONTH, 31 * SECONDS_PER_DAY);
        assert_eq!(SECONDS_PER_YEAR, 12 * SECONDS_PER_MONTH);
        assert_eq!(SECONDS_PER_YEAR, 372 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_unit_index_roundtrip() {
        for unit in TimeUnit::ALL {
            assert_eq!(TimeUnit::try_from(unit.index()), Ok(unit));
        }
        assert_eq!(TimeUnit::try_from(6), Err(SbteError::InvalidUnitIndex(6)));
    }

    #[test]
    fn test_slow_system_units() {
        assert!(!TimeSystem::Slow.supports(TimeUnit::Year));
        assert!(!TimeSystem::Slow.supports(TimeUnit::Month));
        assert!(TimeSystem::Slow.supports(TimeUnit::Day));
        assert_eq!(TimeSystem::Slow.fast_seconds(TimeUnit::Minute), 60 * 72);
    }

    #[test]
    fn test_epoch_conversions() {
        let epoch = Epoch::MAIN;
        assert_eq!(epoch.fast_seconds, 1_560_275_700 * 72);
        assert_eq!(epoch.fast_offset_of_millis(1_560_275_700_000), 0);
        assert_eq!(epoch.fast_offset_of_millis(1_560_275_701_000), 72);
        // 500ms is 36 fast seconds
        assert_eq!(epoch.fast_offset_of_millis(1_560_275_700_500), 36);
        // floored below zero
        assert_eq!(epoch.fast_offset_of_millis(1_560_275_699_999), -1);
        assert_eq!(epoch.millis_of_fast_offset(72), 1_560_275_701_000);
        assert_eq!(Epoch::ALPHA.slow_seconds, epoch.slow_seconds - 211_680);
    }

    #[test]
    fn test_epoch_conversions_saturate() {
        let epoch = Epoch::MAIN;
        assert_eq!(epoch.millis_of_fast_offset(i64::MAX), i64::MAX);
        assert_eq!(epoch.millis_of_fast_offset(i64::MIN), i64::MIN);
        assert_eq!(epoch.fast_offset_of_millis(i64::MAX), i64::MAX);
    }

    #[test]
    fn test_offset_range() {
        let epoch = Epoch::MAIN;
        let (min, max) = epoch.offset_range();
        assert!(epoch.contains_offset(0));
        assert!(epoch.contains_offset(max));
        assert!(!epoch.contains_offset(max + 1));
        assert!(!epoch.contains_offset(min - 1));
        assert_eq!(epoch.millis_of_fast_offset(max), MAX_UNIX_SLOW_SECONDS * 1000);
    }
}
