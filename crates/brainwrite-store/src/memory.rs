//! In-process board store
//!
//! Each board lives behind its own mutex, so every operation on a board is
//! linearizable while unrelated boards never contend. A sheet index maps
//! sheet IDs back to their board.

use crate::error::{StoreError, StoreResult};
use crate::store::{AdmitRequest, Admission, BoardStore, StartOutcome};
use async_trait::async_trait;
use brainwrite_model::{
    plan_start, Board, BoardId, Contribution, Identity, LeaseState, Participant, Sheet, SheetId,
    StartRejection,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Everything owned by one board
#[derive(Debug)]
struct BoardRecord {
    board: Board,
    participants: Vec<Participant>,
    next_seq: u32,
    sheets: Vec<Sheet>,
    contributions: BTreeMap<(SheetId, u32), Contribution>,
}

impl BoardRecord {
    fn sheet_mut(&mut self, id: SheetId) -> StoreResult<&mut Sheet> {
        self.sheets
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::SheetNotFound(id))
    }
}

/// Board store held in memory
///
/// Suitable for tests, simulations and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Board records, one lock per board
    boards: DashMap<BoardId, Arc<Mutex<BoardRecord>>>,
    /// Reverse index: sheet -> board
    sheet_index: DashMap<SheetId, BoardId>,
    /// Fault injection switch
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `Unavailable` until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }

    fn record(&self, id: BoardId) -> StoreResult<Arc<Mutex<BoardRecord>>> {
        self.check_available()?;
        // Clone the Arc so the shard lock is released before the board lock
        self.boards
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StoreError::BoardNotFound(id))
    }

    fn record_for_sheet(&self, sheet: SheetId) -> StoreResult<Arc<Mutex<BoardRecord>>> {
        self.check_available()?;
        let board = self
            .sheet_index
            .get(&sheet)
            .map(|entry| *entry.value())
            .ok_or(StoreError::SheetNotFound(sheet))?;
        self.record(board).map_err(|err| match err {
            StoreError::BoardNotFound(_) => StoreError::SheetNotFound(sheet),
            other => other,
        })
    }
}

#[async_trait]
impl BoardStore for MemoryStore {
    async fn insert_board(&self, board: Board, sheets: Vec<Sheet>) -> StoreResult<()> {
        self.check_available()?;
        if self.boards.contains_key(&board.id) {
            return Err(StoreError::Conflict(format!("board {} exists", board.id)));
        }
        for sheet in &sheets {
            self.sheet_index.insert(sheet.id, board.id);
        }
        self.boards.insert(
            board.id,
            Arc::new(Mutex::new(BoardRecord {
                board,
                participants: Vec::new(),
                next_seq: 0,
                sheets,
                contributions: BTreeMap::new(),
            })),
        );
        Ok(())
    }

    async fn board(&self, id: BoardId) -> StoreResult<Board> {
        Ok(self.record(id)?.lock().board.clone())
    }

    async fn delete_board(&self, id: BoardId) -> StoreResult<()> {
        self.check_available()?;
        let (_, record) = self
            .boards
            .remove(&id)
            .ok_or(StoreError::BoardNotFound(id))?;
        for sheet in &record.lock().sheets {
            self.sheet_index.remove(&sheet.id);
        }
        Ok(())
    }

    async fn active_boards(&self) -> StoreResult<Vec<BoardId>> {
        self.check_available()?;
        let records: Vec<_> = self
            .boards
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut active: Vec<BoardId> = records
            .iter()
            .filter_map(|record| {
                let record = record.lock();
                let unfinished = record.sheets.iter().any(|s| !s.is_finished());
                (record.board.is_started() && unfinished).then_some(record.board.id)
            })
            .collect();
        active.sort();
        Ok(active)
    }

    async fn admit_participant(&self, request: AdmitRequest) -> StoreResult<Admission> {
        let record = self.record(request.board_id)?;
        let mut record = record.lock();

        if let Some(existing) = record
            .participants
            .iter()
            .find(|p| p.identity == request.identity)
        {
            return Ok(Admission::Existing(existing.clone()));
        }
        if record.board.is_started() {
            return Ok(Admission::Started);
        }
        if record.participants.len() >= usize::from(record.board.max_participants) {
            return Ok(Admission::Full {
                capacity: record.board.max_participants,
            });
        }

        let participant = Participant {
            board_id: request.board_id,
            identity: request.identity,
            display_name: request.display_name,
            seq: record.next_seq,
            joined_at: request.joined_at,
        };
        record.next_seq += 1;
        record.participants.push(participant.clone());
        Ok(Admission::Admitted(participant))
    }

    async fn participants(&self, board: BoardId) -> StoreResult<Vec<Participant>> {
        Ok(self.record(board)?.lock().participants.clone())
    }

    async fn participant_count(&self, board: BoardId) -> StoreResult<usize> {
        Ok(self.record(board)?.lock().participants.len())
    }

    async fn remove_participant(&self, board: BoardId, identity: &Identity) -> StoreResult<bool> {
        let record = self.record(board)?;
        let mut record = record.lock();

        let before = record.participants.len();
        record.participants.retain(|p| &p.identity != identity);
        let removed = record.participants.len() != before;

        record.contributions.retain(|_, c| &c.author != identity);
        Ok(removed)
    }

    async fn start_board(
        &self,
        board: BoardId,
        started_at: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> StoreResult<StartOutcome> {
        let record = self.record(board)?;
        let mut record = record.lock();

        let planned = match plan_start(
            &record.board,
            &record.participants,
            &record.sheets,
            lease_expires_at,
        ) {
            Ok(sheets) => sheets,
            Err(StartRejection::AlreadyStarted) => return Ok(StartOutcome::AlreadyStarted),
            Err(StartRejection::NotEnoughParticipants { required, actual }) => {
                return Ok(StartOutcome::NotEnoughParticipants { required, actual })
            }
            Err(StartRejection::MissingSheet) => {
                return Err(StoreError::Corrupt(format!("board {board} has no sheet")))
            }
        };

        for sheet in &planned {
            self.sheet_index.insert(sheet.id, board);
        }
        record.board.started_at = Some(started_at);
        record.sheets.clone_from(&planned);
        Ok(StartOutcome::Started(planned))
    }

    async fn sheets(&self, board: BoardId) -> StoreResult<Vec<Sheet>> {
        Ok(self.record(board)?.lock().sheets.clone())
    }

    async fn sheet(&self, id: SheetId) -> StoreResult<Sheet> {
        let record = self.record_for_sheet(id)?;
        let mut record = record.lock();
        Ok(record.sheet_mut(id)?.clone())
    }

    async fn swap_lease(
        &self,
        sheet: SheetId,
        expected_version: u64,
        next: LeaseState,
    ) -> StoreResult<Option<Sheet>> {
        let record = self.record_for_sheet(sheet)?;
        let mut record = record.lock();
        let current = record.sheet_mut(sheet)?;

        if current.lease_version != expected_version || current.is_finished() {
            return Ok(None);
        }
        current.lease = next;
        current.lease_version += 1;
        Ok(Some(current.clone()))
    }

    async fn upsert_contribution(&self, contribution: Contribution) -> StoreResult<Contribution> {
        let record = self.record_for_sheet(contribution.sheet_id)?;
        let mut record = record.lock();
        let key = (contribution.sheet_id, contribution.row);

        if let Some(existing) = record.contributions.get(&key) {
            if existing.author != contribution.author {
                return Err(StoreError::Conflict(format!(
                    "row {} belongs to {}",
                    contribution.row, existing.author
                )));
            }
        }
        let elsewhere = record.contributions.values().any(|c| {
            c.sheet_id == contribution.sheet_id
                && c.author == contribution.author
                && c.row != contribution.row
        });
        if elsewhere {
            return Err(StoreError::Conflict(format!(
                "{} already wrote on this sheet",
                contribution.author
            )));
        }

        let stored = match record.contributions.get(&key) {
            Some(existing) => Contribution {
                created_at: existing.created_at,
                ..contribution
            },
            None => contribution,
        };
        record.contributions.insert(key, stored.clone());
        Ok(stored)
    }

    async fn contributions(&self, sheet: SheetId) -> StoreResult<Vec<Contribution>> {
        let record = self.record_for_sheet(sheet)?;
        let record = record.lock();
        Ok(record
            .contributions
            .range((sheet, 0)..=(sheet, u32::MAX))
            .map(|(_, c)| c.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brainwrite_model::BoardSpec;
    use chrono::Duration;

    async fn board_with(store: &MemoryStore, names: &[&str]) -> Board {
        let board = Board::from_spec(BoardSpec::new("owner", "topic"), Utc::now());
        store.insert_board(board.clone(), Vec::new()).await.unwrap();
        for name in names {
            store
                .admit_participant(AdmitRequest {
                    board_id: board.id,
                    identity: Identity::new(*name),
                    display_name: (*name).to_string(),
                    joined_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        board
    }

    #[tokio::test]
    async fn admit_is_idempotent_and_capped() {
        let store = MemoryStore::new();
        let board = board_with(&store, &["a", "b", "c", "d", "e", "f"]).await;

        let again = store
            .admit_participant(AdmitRequest {
                board_id: board.id,
                identity: Identity::new("a"),
                display_name: "A again".to_string(),
                joined_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(matches!(again, Admission::Existing(p) if p.display_name == "a"));

        let seventh = store
            .admit_participant(AdmitRequest {
                board_id: board.id,
                identity: Identity::new("g"),
                display_name: "g".to_string(),
                joined_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(seventh, Admission::Full { capacity: 6 });
        assert_eq!(store.participant_count(board.id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn swap_lease_requires_matching_version() {
        let store = MemoryStore::new();
        let board = board_with(&store, &["a", "b"]).await;
        let now = Utc::now();

        let StartOutcome::Started(sheets) = store
            .start_board(board.id, now, now + Duration::minutes(5))
            .await
            .unwrap()
        else {
            panic!("board should start");
        };
        let sheet = &sheets[0];

        let stale = store
            .swap_lease(sheet.id, sheet.lease_version + 1, LeaseState::Unheld)
            .await
            .unwrap();
        assert!(stale.is_none());

        let swapped = store
            .swap_lease(sheet.id, sheet.lease_version, LeaseState::Unheld)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(swapped.lease, LeaseState::Unheld);
        assert_eq!(swapped.lease_version, sheet.lease_version + 1);
    }

    #[tokio::test]
    async fn start_is_one_shot() {
        let store = MemoryStore::new();
        let board = board_with(&store, &["a", "b"]).await;
        let now = Utc::now();

        assert!(matches!(
            store.start_board(board.id, now, now).await.unwrap(),
            StartOutcome::Started(_)
        ));
        assert_eq!(
            store.start_board(board.id, now, now).await.unwrap(),
            StartOutcome::AlreadyStarted
        );
    }

    #[tokio::test]
    async fn unavailable_switch_fails_calls() {
        let store = MemoryStore::new();
        let board = board_with(&store, &["a"]).await;

        store.set_unavailable(true);
        assert!(matches!(
            store.board(board.id).await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_unavailable(false);
        assert!(store.board(board.id).await.is_ok());
    }

    #[tokio::test]
    async fn delete_cascades_to_sheets() {
        let store = MemoryStore::new();
        let board = board_with(&store, &["a", "b"]).await;
        let now = Utc::now();
        store.start_board(board.id, now, now).await.unwrap();
        let sheets = store.sheets(board.id).await.unwrap();

        store.delete_board(board.id).await.unwrap();
        assert_eq!(
            store.sheet(sheets[0].id).await,
            Err(StoreError::SheetNotFound(sheets[0].id))
        );
    }
}
