//! Brainwrite Simulator
//!
//! Drives the coordinator the way a room of people would and checks that
//! its guarantees hold:
//!
//! - [`run_session`]: one seeded board played to completion, with some
//!   writers walking away mid-turn
//! - [`run_stress`]: many boards at once, with join storms, lease races and
//!   concurrent writes

#![warn(missing_docs)]

pub mod report;
pub mod session;
pub mod stress;

pub use report::{SessionReport, SessionStats, StressReport, Violation};
pub use session::{run_session, SessionConfig};
pub use stress::{run_stress, StressConfig};

/// Version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
