//! Phase values reported to listeners
//!
//! Discriminants are stable and may be stored or sent across boundaries.

use std::fmt;

/// Phase of a single routine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    /// Between on-intervals, or before the anchor
    Waiting = 0,
    /// Inside an on-interval
    Ongoing = 1,
    /// No further phase changes
    Stopped = 2,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Waiting, Phase::Ongoing, Phase::Stopped];

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Phase::ALL.get(value as usize).copied()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Waiting => "WAITING",
            Phase::Ongoing => "ONGOING",
            Phase::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Combined phase of a scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum GrandPhase {
    Waiting = 0,
    /// Exactly one child is ongoing
    Ongoing = 1,
    /// Every child has stopped
    Stopped = 2,
    /// Two children's on-intervals overlap. Terminal.
    Errored = 3,
}

impl GrandPhase {
    pub const ALL: [GrandPhase; 4] = [
        GrandPhase::Waiting,
        GrandPhase::Ongoing,
        GrandPhase::Stopped,
        GrandPhase::Errored,
    ];

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        GrandPhase::ALL.get(value as usize).copied()
    }
}

impl From<Phase> for GrandPhase {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Waiting => GrandPhase::Waiting,
            Phase::Ongoing => GrandPhase::Ongoing,
            Phase::Stopped => GrandPhase::Stopped,
        }
    }
}

impl fmt::Display for GrandPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrandPhase::Errored => f.write_str("ERRORED"),
            GrandPhase::Waiting => Phase::Waiting.fmt(f),
            GrandPhase::Ongoing => Phase::Ongoing.fmt(f),
            GrandPhase::Stopped => Phase::Stopped.fmt(f),
        }
    }
}
