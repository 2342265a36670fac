//! Routine configuration

use std::time::Duration;

use sbte_core::Epoch;

/// Longest delay handed to a timer host in one piece (one real day).
/// Boundaries further away are approached by re-checking at this interval.
pub const HORIZON_CAP: Duration = Duration::from_millis(86_400_000);

/// Configuration shared by routines and schedulers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutineConfig {
    /// Fast-time zero for every date a routine reads or builds
    pub epoch: Epoch,
    /// Longest timer delay; see [`HORIZON_CAP`]
    pub horizon: Duration,
    /// Countdown tick period
    pub countdown_interval: Duration,
}

impl Default for RoutineConfig {
    fn default() -> Self {
        RoutineConfig {
            epoch: Epoch::MAIN,
            horizon: HORIZON_CAP,
            countdown_interval: Duration::from_secs(1),
        }
    }
}

impl RoutineConfig {
    /// Configuration for the alpha network
    pub fn alpha() -> Self {
        RoutineConfig {
            epoch: Epoch::ALPHA,
            ..Default::default()
        }
    }

    /// Horizon in whole milliseconds, at least 1
    pub(crate) fn horizon_millis(&self) -> i64 {
        (self.horizon.as_millis() as i64).max(1)
    }

    /// Countdown period in whole milliseconds, at least 1
    pub(crate) fn countdown_millis(&self) -> i64 {
        (self.countdown_interval.as_millis() as i64).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let config = RoutineConfig::default();
        assert_eq!(config.epoch, Epoch::MAIN);
        assert_eq!(config.horizon_millis(), 86_400_000);
        assert_eq!(config.countdown_millis(), 1_000);
        assert_eq!(RoutineConfig::alpha().epoch, Epoch::ALPHA);
    }

    #[test]
    fn test_zero_periods_are_clamped() {
        let config = RoutineConfig {
            horizon: Duration::ZERO,
            countdown_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.horizon_millis(), 1);
        assert_eq!(config.countdown_millis(), 1);
    }
}
