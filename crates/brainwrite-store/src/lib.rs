//! Brainwrite Store
//!
//! Persistence seam for the sheet coordinator.
//!
//! # Overview
//!
//! - **BoardStore**: async trait with the atomic operations the coordinator
//!   relies on (capacity-checked admission, one-shot start, lease
//!   compare-and-swap, row upserts)
//! - **MemoryStore**: per-board locking, for tests and single-process use
//! - **SqliteStore**: file-backed, safe across processes sharing the file
//!
//! # Example
//!
//! ```rust
//! use brainwrite_model::{Board, BoardSpec};
//! use brainwrite_store::{BoardStore, MemoryStore};
//! use chrono::Utc;
//!
//! # async fn example() -> Result<(), brainwrite_store::StoreError> {
//! let store = MemoryStore::new();
//! let board = Board::from_spec(BoardSpec::new("owner", "Ideas"), Utc::now());
//! store.insert_board(board.clone(), Vec::new()).await?;
//! assert_eq!(store.participant_count(board.id).await?, 0);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

// Re-exports
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{AdmitRequest, Admission, BoardStore, StartOutcome};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
