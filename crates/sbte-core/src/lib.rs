//! SBTE Core - Dual clock units, durations and dates
//!
//! This crate defines the time primitives used throughout SBTE:
//! - Unit configuration for the fast and slow clocks (FAST_PER_SLOW = 72)
//! - Duration with derived fast and slow breakdowns
//! - DateTime with fast and Gregorian calendar views
//! - Text grammars for durations and dates
//! - Clock sources

pub mod clock;
pub mod datetime;
pub mod duration;
pub mod error;
pub mod parse;
pub mod units;

pub use clock::*;
pub use datetime::*;
pub use duration::*;
pub use error::*;
pub use units::*;
