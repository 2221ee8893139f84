//! Contract tests shared by every BoardStore implementation.
//!
//! Each tenet is written once against `Arc<dyn BoardStore>` and run for both
//! the in-memory store and the SQLite store.

use brainwrite_model::{
    Board, BoardId, BoardLayout, BoardSpec, Contribution, Identity, LeaseState,
};
use brainwrite_store::{
    AdmitRequest, Admission, BoardStore, MemoryStore, SqliteStore, StartOutcome, StoreError,
};
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn memory() -> Arc<dyn BoardStore> {
    Arc::new(MemoryStore::new())
}

fn sqlite(dir: &tempfile::TempDir) -> Arc<dyn BoardStore> {
    Arc::new(SqliteStore::open(dir.path().join("contract.db")).unwrap())
}

async fn new_board(store: &Arc<dyn BoardStore>, spec: BoardSpec) -> Board {
    let board = Board::from_spec(spec, Utc::now());
    let sheets = match board.layout {
        BoardLayout::Single => vec![brainwrite_model::Sheet::new(board.id, 0, Vec::new())],
        BoardLayout::Team => Vec::new(),
    };
    store.insert_board(board.clone(), sheets).await.unwrap();
    board
}

async fn admit(store: &Arc<dyn BoardStore>, board: BoardId, who: &str) -> Admission {
    store
        .admit_participant(AdmitRequest {
            board_id: board,
            identity: Identity::new(who),
            display_name: who.to_uppercase(),
            joined_at: Utc::now(),
        })
        .await
        .unwrap()
}

/// Tenet: concurrent joins never exceed capacity.
async fn join_storm_respects_capacity(store: Arc<dyn BoardStore>) {
    let board = new_board(&store, BoardSpec::new("owner", "storm")).await;

    let joins = (0..20).map(|i| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { admit(&store, board.id, &format!("p{i}")).await })
    });
    let outcomes = futures::future::join_all(joins).await;

    let admitted = outcomes
        .iter()
        .filter(|o| matches!(o.as_ref().unwrap(), Admission::Admitted(_)))
        .count();
    assert_eq!(admitted, 6);
    assert_eq!(store.participant_count(board.id).await.unwrap(), 6);

    // Join order is dense and unique
    let seqs: Vec<u32> = store
        .participants(board.id)
        .await
        .unwrap()
        .iter()
        .map(|p| p.seq)
        .collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
}

/// Tenet: exactly one of many racing swaps on the same version wins.
async fn lease_swap_has_single_winner(store: Arc<dyn BoardStore>) {
    let board = new_board(&store, BoardSpec::new("owner", "race")).await;
    admit(&store, board.id, "a").await;
    admit(&store, board.id, "b").await;
    let now = Utc::now();
    let StartOutcome::Started(sheets) = store
        .start_board(board.id, now, now - Duration::seconds(1))
        .await
        .unwrap()
    else {
        panic!("start failed");
    };
    let sheet = sheets[0].clone();

    let racers = (0..8).map(|i| {
        let store = Arc::clone(&store);
        let sheet = sheet.clone();
        tokio::spawn(async move {
            store
                .swap_lease(
                    sheet.id,
                    sheet.lease_version,
                    LeaseState::Held {
                        holder: Identity::new(format!("r{i}")),
                        expires_at: Utc::now() + Duration::minutes(5),
                    },
                )
                .await
                .unwrap()
        })
    });
    let results = futures::future::join_all(racers).await;
    let winners = results.iter().filter(|r| r.as_ref().unwrap().is_some()).count();
    assert_eq!(winners, 1);

    let current = store.sheet(sheet.id).await.unwrap();
    assert_eq!(current.lease_version, sheet.lease_version + 1);
}

/// Tenet: finished sheets never take another lease.
async fn finished_sheet_rejects_swaps(store: Arc<dyn BoardStore>) {
    let board = new_board(&store, BoardSpec::new("owner", "done")).await;
    admit(&store, board.id, "a").await;
    admit(&store, board.id, "b").await;
    let now = Utc::now();
    store.start_board(board.id, now, now).await.unwrap();
    let sheet = store.sheets(board.id).await.unwrap().remove(0);

    let finished = store
        .swap_lease(sheet.id, sheet.lease_version, LeaseState::Finished)
        .await
        .unwrap()
        .unwrap();
    assert!(finished.is_finished());

    let again = store
        .swap_lease(sheet.id, finished.lease_version, LeaseState::Unheld)
        .await
        .unwrap();
    assert!(again.is_none());
}

/// Tenet: rows are unique per (sheet, row) and per (sheet, author).
async fn contribution_rows_are_exclusive(store: Arc<dyn BoardStore>) {
    let board = new_board(&store, BoardSpec::new("owner", "rows")).await;
    admit(&store, board.id, "a").await;
    admit(&store, board.id, "b").await;
    let now = Utc::now();
    store.start_board(board.id, now, now).await.unwrap();
    let sheet = store.sheets(board.id).await.unwrap().remove(0);

    let make = |who: &str, row: u32, text: &str| {
        Contribution::new(sheet.id, Identity::new(who), row, vec![Some(text.to_string())], now)
    };

    store.upsert_contribution(make("a", 0, "first")).await.unwrap();
    // Same author rewrites own row
    let rewritten = store.upsert_contribution(make("a", 0, "edited")).await.unwrap();
    assert_eq!(rewritten.values, vec![Some("edited".to_string())]);

    assert!(matches!(
        store.upsert_contribution(make("b", 0, "steal")).await,
        Err(StoreError::Conflict(_))
    ));
    assert!(matches!(
        store.upsert_contribution(make("a", 1, "twice")).await,
        Err(StoreError::Conflict(_))
    ));

    store.upsert_contribution(make("b", 1, "second")).await.unwrap();
    let rows = store.contributions(sheet.id).await.unwrap();
    let authors: Vec<&str> = rows.iter().map(|c| c.author.as_str()).collect();
    assert_eq!(authors, vec!["a", "b"]);
}

/// Tenet: removing a participant drops their rows; deleting a board drops everything.
async fn removal_and_deletion_cascade(store: Arc<dyn BoardStore>) {
    let board = new_board(&store, BoardSpec::new("owner", "cascade")).await;
    admit(&store, board.id, "a").await;
    admit(&store, board.id, "b").await;
    let now = Utc::now();
    store.start_board(board.id, now, now).await.unwrap();
    let sheet = store.sheets(board.id).await.unwrap().remove(0);
    store
        .upsert_contribution(Contribution::new(sheet.id, Identity::new("b"), 1, vec![None], now))
        .await
        .unwrap();

    assert!(store.remove_participant(board.id, &Identity::new("b")).await.unwrap());
    assert!(!store.remove_participant(board.id, &Identity::new("b")).await.unwrap());
    assert!(store.contributions(sheet.id).await.unwrap().is_empty());
    assert_eq!(store.participant_count(board.id).await.unwrap(), 1);

    store.delete_board(board.id).await.unwrap();
    assert_eq!(store.board(board.id).await, Err(StoreError::BoardNotFound(board.id)));
    assert_eq!(store.sheet(sheet.id).await, Err(StoreError::SheetNotFound(sheet.id)));
}

/// Tenet: single-sheet boards keep their sheet id through start and show up as active.
async fn single_sheet_start_keeps_sheet(store: Arc<dyn BoardStore>) {
    let board = new_board(
        &store,
        BoardSpec::new("owner", "solo").with_layout(BoardLayout::Single),
    )
    .await;
    let created = store.sheets(board.id).await.unwrap();
    assert_eq!(created.len(), 1);
    assert!(store.active_boards().await.unwrap().is_empty());

    admit(&store, board.id, "a").await;
    let now = Utc::now();
    let StartOutcome::Started(sheets) = store.start_board(board.id, now, now).await.unwrap() else {
        panic!("start failed");
    };
    assert_eq!(sheets[0].id, created[0].id);
    assert_eq!(store.sheet(created[0].id).await.unwrap(), sheets[0]);
    assert_eq!(store.active_boards().await.unwrap(), vec![board.id]);
    assert_eq!(admit(&store, board.id, "late").await, Admission::Started);
}

macro_rules! contract {
    ($($name:ident),* $(,)?) => {
        mod memory_store {
            use super::*;
            $(
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $name() {
                    super::$name(memory()).await;
                }
            )*
        }

        mod sqlite_store {
            use super::*;
            $(
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $name() {
                    let dir = tempfile::tempdir().unwrap();
                    super::$name(sqlite(&dir)).await;
                }
            )*
        }
    };
}

contract!(
    join_storm_respects_capacity,
    lease_swap_has_single_winner,
    finished_sheet_rejects_swaps,
    contribution_rows_are_exclusive,
    removal_and_deletion_cascade,
    single_sheet_start_keeps_sheet,
);

/// Two store handles on one file behave like two processes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_handles_share_capacity_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let first: Arc<dyn BoardStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let second: Arc<dyn BoardStore> = Arc::new(SqliteStore::open(&path).unwrap());

    let board = new_board(&first, BoardSpec::new("owner", "shared").with_capacity(1, 2)).await;
    let a = admit(&first, board.id, "a");
    let b = admit(&second, board.id, "b");
    let c = admit(&second, board.id, "c");
    let (a, b, c) = tokio::join!(a, b, c);

    let admitted = [a, b, c]
        .iter()
        .filter(|o| matches!(o, Admission::Admitted(_)))
        .count();
    assert_eq!(admitted, 2);
}
