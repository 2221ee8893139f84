//! Brainwrite Coordinator
//!
//! Turn-based coordination of shared ideation sheets: participants join a
//! board, each sheet is written by one participant at a time under a
//! time-bounded lease, and sheets rotate until everyone has written on
//! every sheet.
//!
//! # Components
//!
//! - [`ParticipantRegistry`]: admission under a capacity ceiling
//! - [`LeaseManager`]: exclusive, expiring write access per sheet
//! - [`RotationScheduler`]: who writes next, or whether a sheet is done
//! - [`AbandonmentSweeper`]: reclaims sheets from absent writers
//! - [`BoardCoordinator`]: the facade tying them together
//!
//! # Example
//!
//! ```rust
//! use brainwrite_coordinator::{BoardCoordinator, CoordinatorConfig};
//! use brainwrite_model::{BoardSpec, Identity, SystemClock};
//! use brainwrite_store::MemoryStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = BoardCoordinator::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//!     CoordinatorConfig::default(),
//! )?;
//!
//! let board = coordinator.create_board(BoardSpec::new("ada", "Q3 ideas")).await?;
//! let ada = Identity::new("ada");
//! let bob = Identity::new("bob");
//! coordinator.join(board.id, &ada, "Ada").await?;
//! coordinator.join(board.id, &bob, "Bob").await?;
//!
//! let sheets = coordinator.start_board(board.id, &ada).await?;
//! let row = vec![Some("idea".to_string()), None, None];
//! coordinator.submit_contribution(sheets[0].id, &ada, 0, row).await?;
//! assert!(coordinator.lease().is_held_by_other(sheets[0].id, &ada).await?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod coordinator;
pub mod lease;
pub mod notify;
pub mod registry;
pub mod rotation;
pub mod sweeper;

// Re-exports
pub use config::{AbandonmentPolicy, ConfigError, CoordinatorConfig};
pub use coordinator::{BoardCoordinator, BoardSnapshot, SheetSnapshot};
pub use lease::LeaseManager;
pub use notify::{BoardEvent, BroadcastNotifier, NoopNotifier, Notifier, NotifyError};
pub use registry::ParticipantRegistry;
pub use rotation::{decide, next_free_row, NextHolder, RotationScheduler};
pub use sweeper::{AbandonmentSweeper, SweepHandle, SweepLoop, SweepReport};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a board
    pub use crate::{
        AbandonmentPolicy, BoardCoordinator, BoardEvent, CoordinatorConfig, NextHolder, Notifier,
        SweepReport,
    };
    pub use brainwrite_model::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
