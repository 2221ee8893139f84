//! The board store contract
//!
//! [`BoardStore`] is the only shared state the coordinator touches. Every
//! operation that decides something under contention (admitting a
//! participant, starting a board, moving a lease) is a single atomic store
//! call, so correctness holds across processes and not just threads.

use crate::error::StoreResult;
use async_trait::async_trait;
use brainwrite_model::{
    Board, BoardId, Contribution, Identity, LeaseState, Participant, Sheet, SheetId,
};
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Join request evaluated atomically against a board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmitRequest {
    /// Board to join
    pub board_id: BoardId,
    /// Caller identity
    pub identity: Identity,
    /// Name shown to others
    pub display_name: String,
    /// Join time
    pub joined_at: DateTime<Utc>,
}

/// Outcome of [`BoardStore::admit_participant`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// New participant inserted
    Admitted(Participant),
    /// Identity had already joined; nothing changed
    Existing(Participant),
    /// Capacity reached; nothing changed
    Full {
        /// Board capacity
        capacity: u8,
    },
    /// Board started and the identity is not on the roster
    Started,
}

/// Outcome of [`BoardStore::start_board`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Sheets now rotating, ordered by position
    Started(Vec<Sheet>),
    /// Board was started before
    AlreadyStarted,
    /// Roster below the board minimum
    NotEnoughParticipants {
        /// Minimum required by the board
        required: u8,
        /// Participants joined
        actual: usize,
    },
}

/// Transactional store for boards, participants, sheets and contributions
#[async_trait]
pub trait BoardStore: Send + Sync + Debug {
    /// Persist a new board together with any sheets it owns from creation
    async fn insert_board(&self, board: Board, sheets: Vec<Sheet>) -> StoreResult<()>;

    /// Load a board
    async fn board(&self, id: BoardId) -> StoreResult<Board>;

    /// Delete a board and everything it owns
    async fn delete_board(&self, id: BoardId) -> StoreResult<()>;

    /// Started boards that still have unfinished sheets
    async fn active_boards(&self) -> StoreResult<Vec<BoardId>>;

    /// Admit `request.identity`, atomically with the capacity check
    ///
    /// Two concurrent calls competing for the last slot must not both be
    /// admitted.
    async fn admit_participant(&self, request: AdmitRequest) -> StoreResult<Admission>;

    /// Participants in join order
    async fn participants(&self, board: BoardId) -> StoreResult<Vec<Participant>>;

    /// Number of joined participants
    async fn participant_count(&self, board: BoardId) -> StoreResult<usize>;

    /// Drop a participant and every row they wrote on the board
    ///
    /// Returns whether a participant was removed.
    async fn remove_participant(&self, board: BoardId, identity: &Identity) -> StoreResult<bool>;

    /// Freeze the roster and create the rotating sheets
    ///
    /// Runs [`brainwrite_model::plan_start`] against the roster inside the
    /// same transaction that marks the board started.
    async fn start_board(
        &self,
        board: BoardId,
        started_at: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> StoreResult<StartOutcome>;

    /// Sheets of a board ordered by position
    async fn sheets(&self, board: BoardId) -> StoreResult<Vec<Sheet>>;

    /// Load a sheet
    async fn sheet(&self, id: SheetId) -> StoreResult<Sheet>;

    /// Replace the lease iff the sheet is still at `expected_version`
    ///
    /// Returns the updated sheet, or `None` when another writer got there
    /// first or the sheet is already finished.
    async fn swap_lease(
        &self,
        sheet: SheetId,
        expected_version: u64,
        next: LeaseState,
    ) -> StoreResult<Option<Sheet>>;

    /// Insert or overwrite the row at `(sheet, row)`
    ///
    /// Fails with a conflict when the row belongs to a different author or
    /// the author already owns another row on the sheet.
    async fn upsert_contribution(&self, contribution: Contribution) -> StoreResult<Contribution>;

    /// Rows of a sheet ordered by row index
    async fn contributions(&self, sheet: SheetId) -> StoreResult<Vec<Contribution>>;
}
