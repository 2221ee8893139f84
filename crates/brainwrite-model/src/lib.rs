//! Brainwrite Model
//!
//! Entities shared by every layer of the turn-based sheet coordinator.
//!
//! # Overview
//!
//! - **Board**: one ideation session, owning participants and sheets
//! - **Participant**: a joined identity, ordered by join sequence
//! - **Sheet**: the unit of rotation, guarded by a time-bounded lease
//! - **Contribution**: one row of entries written during one turn
//! - **Clock**: injected time source so lease expiry is testable
//!
//! # Example
//!
//! ```rust
//! use brainwrite_model::{Board, BoardSpec, BoardLayout};
//! use chrono::Utc;
//!
//! let spec = BoardSpec::new("owner", "Onboarding ideas").with_layout(BoardLayout::Team);
//! spec.validate().unwrap();
//!
//! let board = Board::from_spec(spec, Utc::now());
//! assert!(!board.is_started());
//! ```

#![warn(missing_docs)]

pub mod board;
pub mod clock;
pub mod error;
pub mod ids;
pub mod plan;
pub mod sheet;

// Re-exports
pub use board::{
    Board, BoardLayout, BoardSpec, Participant, DEFAULT_COLUMNS, MAX_COLUMNS, MAX_PARTICIPANTS,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoordinatorError, Entity};
pub use ids::{BoardId, Identity, SheetId};
pub use plan::{plan_start, rotated, StartRejection};
pub use sheet::{Contribution, LeaseState, LeaseToken, Sheet};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with boards and sheets
    pub use crate::{
        Board, BoardId, BoardLayout, BoardSpec, Clock, Contribution, CoordinatorError, Identity,
        LeaseState, LeaseToken, Participant, Sheet, SheetId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
