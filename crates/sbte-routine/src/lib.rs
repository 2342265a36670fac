//! SBTE Routine - Recurring on/off routines on the dual clock
//!
//! This crate turns definition strings into live state machines:
//! - Definition mini-language (`A[..] C[..] L[..] U[..]`)
//! - Routines with closed-form triggering and self re-arming timers
//! - Schedulers that keep several routines mutually exclusive
//! - Countdowns to the next boundary
//! - Timer hosts: a virtual one for tests and simulation, a tokio one for
//!   real programs

pub mod config;
pub mod countdown;
pub mod definition;
pub mod host;
pub mod phase;
pub mod registry;
pub mod routine;
pub mod scheduler;

pub use config::*;
pub use countdown::{CountdownCallback, CountdownId, CountdownTick};
pub use definition::*;
pub use host::*;
pub use phase::*;
pub use registry::{ListenerId, ListenerSet};
pub use routine::*;
pub use scheduler::*;
