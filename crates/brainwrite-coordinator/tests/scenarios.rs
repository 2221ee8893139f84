//! End-to-end write rounds through the coordinator facade.
//!
//! Core guarantees exercised here:
//! - Starting a team board hands every participant a distinct first sheet.
//! - Each submission passes the sheet to the next writer in its fixed order
//!   and the board completes only when every sheet has gone all the way round.
//! - A participant who walks away does not block the round: once the lease
//!   expires, a sweep hands the sheet to the next writer.
//! - The same flows hold on the SQLite store.

use brainwrite_coordinator::{AbandonmentPolicy, CoordinatorConfig};
use brainwrite_model::{CoordinatorError, Identity, LeaseState};
use brainwrite_store::BoardStore;
use brainwrite_test_utils::{
    ids, row, setup_harness, setup_harness_with, setup_sqlite_harness, Harness, OWNER,
};
use pretty_assertions::assert_eq;
use std::collections::HashSet;

/// Tenet: the literal three-person round.
///
/// A, B and C each start on their own sheet. A's submission on the sheet A
/// holds passes it to B with a fresh lease; after every participant has
/// written on every sheet, and not before, the board is complete.
async fn three_person_round(h: Harness) {
    let (board, sheets) = h.started_team_board(&["a", "b", "c"]).await;
    let [a, b, c]: [Identity; 3] = ids(&["a", "b", "c"]).try_into().unwrap();

    assert_eq!(sheets.len(), 3);
    let first_holders: HashSet<_> = sheets.iter().filter_map(|s| s.lease.holder()).collect();
    assert_eq!(first_holders.len(), 3);

    let sheet_1 = sheets
        .iter()
        .find(|s| s.lease.holder() == Some(&a))
        .unwrap()
        .clone();

    h.advance_secs(10);
    h.coordinator
        .submit_contribution(sheet_1.id, &a, 0, row("a's idea"))
        .await
        .unwrap();

    let after = h.store.sheet(sheet_1.id).await.unwrap();
    match &after.lease {
        LeaseState::Held { holder, expires_at } => {
            assert_eq!(holder, &b);
            assert_eq!(*expires_at, h.now() + h.coordinator.config().lease_ttl());
        }
        other => panic!("expected b to hold the sheet, got {other:?}"),
    }

    h.coordinator
        .submit_contribution(sheet_1.id, &b, 1, row("b builds on it"))
        .await
        .unwrap();
    h.coordinator
        .submit_contribution(sheet_1.id, &c, 2, row("c wraps up"))
        .await
        .unwrap();
    assert!(h.store.sheet(sheet_1.id).await.unwrap().is_finished());
    assert!(!h.coordinator.is_board_complete(board.id).await.unwrap());

    // Remaining sheets follow their own orders
    for sheet in sheets.iter().filter(|s| s.id != sheet_1.id) {
        for (turn, writer) in sheet.rotation.iter().enumerate() {
            h.coordinator
                .submit_contribution(sheet.id, writer, turn as u32, row("more"))
                .await
                .unwrap();
        }
    }
    assert!(h.coordinator.is_board_complete(board.id).await.unwrap());

    let snapshot = h.coordinator.board_snapshot(board.id).await.unwrap();
    assert!(snapshot.is_complete());
    for sheet in &snapshot.sheets {
        let authors: HashSet<_> = sheet.contributions.iter().map(|c| &c.author).collect();
        assert_eq!(authors.len(), 3, "every participant writes once per sheet");
    }
}

/// Tenet: an abandoned lease is recoverable.
///
/// A holds a sheet and never submits. Once the lease has expired and a sweep
/// has run, B is no longer shut out and can take the sheet.
async fn abandoned_lease_is_recovered(h: Harness) {
    let (board, sheets) = h.started_team_board(&["a", "b", "c"]).await;
    let (a, b) = (Identity::new("a"), Identity::new("b"));
    let sheet_1 = sheets.iter().find(|s| s.lease.holder() == Some(&a)).unwrap();

    assert!(h.coordinator.lease().is_held_by_other(sheet_1.id, &b).await.unwrap());

    h.expire_leases();
    let report = h.coordinator.sweep(board.id).await.unwrap();
    assert!(report.reclaimed.contains(&sheet_1.id));

    assert!(!h.coordinator.lease().is_held_by_other(sheet_1.id, &b).await.unwrap());
    let token = h
        .coordinator
        .lease()
        .try_acquire(sheet_1.id, &b, h.coordinator.lease().ttl())
        .await
        .unwrap();
    assert_eq!(token.holder, b);
}

#[tokio::test]
async fn three_person_round_in_memory() {
    three_person_round(setup_harness()).await;
}

#[tokio::test]
async fn three_person_round_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    three_person_round(setup_sqlite_harness(
        dir.path().join("round.db"),
        CoordinatorConfig::default(),
    ))
    .await;
}

#[tokio::test]
async fn abandoned_lease_is_recovered_in_memory() {
    abandoned_lease_is_recovered(setup_harness()).await;
}

#[tokio::test]
async fn abandoned_lease_is_recovered_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    abandoned_lease_is_recovered(setup_sqlite_harness(
        dir.path().join("abandon.db"),
        CoordinatorConfig::default(),
    ))
    .await;
}

/// Tenet: with the blank policy, an absent writer still gets a row.
///
/// Rows stay aligned across sheets, and the sheet completes after exactly
/// one row per participant.
#[tokio::test]
async fn blank_policy_keeps_rows_aligned() {
    let h = setup_harness();
    let (board, sheets) = h.started_team_board(&["a", "b"]).await;
    let (a, b) = (Identity::new("a"), Identity::new("b"));
    let sheet_a = sheets.iter().find(|s| s.lease.holder() == Some(&a)).unwrap();

    // b writes on time, a never does
    let sheet_b = sheets.iter().find(|s| s.lease.holder() == Some(&b)).unwrap();
    h.coordinator
        .submit_contribution(sheet_b.id, &b, 0, row("b first"))
        .await
        .unwrap();

    h.expire_leases();
    // Submit sweeps first, so b takes over a's sheet at row 1
    h.coordinator
        .submit_contribution(sheet_a.id, &b, 1, row("b second"))
        .await
        .unwrap();

    let snapshot = h.coordinator.board_snapshot(board.id).await.unwrap();
    let rows = &snapshot
        .sheets
        .iter()
        .find(|s| s.sheet.id == sheet_a.id)
        .unwrap()
        .contributions;
    assert_eq!(rows.len(), 2);
    assert!(rows[0].blank);
    assert_eq!(rows[0].author, a);
    assert_eq!(rows[0].row, 0);
    assert_eq!(rows[1].author, b);
    assert!(snapshot.sheets.iter().find(|s| s.sheet.id == sheet_a.id).unwrap().sheet.is_finished());
}

/// Tenet: with the purge policy, an absent writer leaves the rotation.
///
/// Sheets that would have gone to the purged participant skip them, sheets
/// they still hold move on in the same sweep, and the board still completes.
#[tokio::test]
async fn purge_policy_shrinks_rotation() {
    let h = setup_harness_with(
        CoordinatorConfig::default().with_abandonment_policy(AbandonmentPolicy::Purge),
    );
    let (board, sheets) = h.started_team_board(&["a", "b", "c"]).await;
    let [a, b, c]: [Identity; 3] = ids(&["a", "b", "c"]).try_into().unwrap();
    let submit = |sheet: usize, who: &Identity, row_index: u32| {
        let coordinator = h.coordinator.clone();
        let (sheet, who) = (sheets[sheet].id, who.clone());
        async move {
            coordinator
                .submit_contribution(sheet, &who, row_index, row("idea"))
                .await
        }
    };

    // b and c take their first turn; a never shows up
    h.advance_secs(200);
    submit(1, &b, 0).await.unwrap();
    submit(2, &c, 0).await.unwrap();

    // a's first lease has lapsed, the one on sheet 2 has not. Once a is
    // purged that live lease goes to b in the same sweep
    h.advance_secs(150);
    let report = h.coordinator.sweep(board.id).await.unwrap();
    assert_eq!(report.purged, vec![a.clone()]);
    assert_eq!(report.reclaimed, vec![sheets[0].id, sheets[2].id]);
    let sheet_2 = h.store.sheet(sheets[2].id).await.unwrap();
    assert_eq!(sheet_2.lease.holder(), Some(&b));

    let roster: Vec<Identity> = h
        .coordinator
        .registry()
        .participants(board.id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.identity)
        .collect();
    assert_eq!(roster, vec![b.clone(), c.clone()]);

    submit(2, &b, 1).await.unwrap();
    submit(1, &c, 1).await.unwrap();
    submit(0, &b, 0).await.unwrap();
    assert!(!h.coordinator.is_board_complete(board.id).await.unwrap());
    submit(0, &c, 1).await.unwrap();
    assert!(h.coordinator.is_board_complete(board.id).await.unwrap());

    let snapshot = h.coordinator.board_snapshot(board.id).await.unwrap();
    for sheet in &snapshot.sheets {
        assert!(sheet.contributions.iter().all(|row| row.author != a));
    }

    // a cannot come back into a started board
    assert_eq!(
        h.coordinator.join(board.id, &a, "A").await,
        Err(CoordinatorError::AlreadyStarted)
    );
}

/// Tenet: events follow the round.
#[tokio::test]
async fn events_track_the_round() {
    let h = setup_harness();
    let (board, sheets) = h.started_team_board(&["a", "b"]).await;
    for turn in 0..2 {
        for sheet in &sheets {
            let writer = &sheet.rotation[turn];
            h.coordinator
                .submit_contribution(sheet.id, writer, turn as u32, row("x"))
                .await
                .unwrap();
        }
    }
    assert!(h.coordinator.is_board_complete(board.id).await.unwrap());
    assert_eq!(
        h.events.kinds(),
        vec![
            "participant_joined",
            "participant_joined",
            "round_started",
            "sheet_rotated",
            "sheet_rotated",
            "sheet_completed",
            "sheet_completed",
            "board_completed",
        ]
    );
}

/// Tenet: a broken notifier never breaks a write.
#[tokio::test]
async fn notifier_failures_are_not_propagated() {
    let h = setup_harness();
    h.events.set_failing(true);
    let (_, sheets) = h.started_team_board(&["a", "b"]).await;
    let a = Identity::new("a");

    let written = h
        .coordinator
        .submit_contribution(sheets[0].id, &a, 0, row("still saved"))
        .await
        .unwrap();
    assert_eq!(written.author, a);
    assert!(!h.events.events().is_empty());
}

/// Tenet: the owner's rights and the single-sheet layout.
#[tokio::test]
async fn single_sheet_board_rotates_through_everyone() {
    let h = setup_harness();
    let board = h
        .board_with(&["a", "b", "c"], brainwrite_model::BoardLayout::Single)
        .await;
    let sheets = h
        .coordinator
        .start_board(board.id, &Identity::new(OWNER))
        .await
        .unwrap();
    assert_eq!(sheets.len(), 1);
    let sheet = &sheets[0];
    assert_eq!(sheet.rotation, ids(&["a", "b", "c"]));

    for (turn, writer) in sheet.rotation.iter().enumerate() {
        h.coordinator
            .submit_contribution(sheet.id, writer, turn as u32, row("shared"))
            .await
            .unwrap();
    }
    assert!(h.coordinator.is_board_complete(board.id).await.unwrap());
}

/// Tenet: store outages surface as retryable errors.
#[tokio::test]
async fn store_outage_is_retryable() {
    let h = setup_harness();
    let (_, sheets) = h.started_team_board(&["a", "b"]).await;
    let memory = h.memory.clone().unwrap();

    memory.set_unavailable(true);
    let err = h
        .coordinator
        .submit_contribution(sheets[0].id, &Identity::new("a"), 0, row("x"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.user_message(), "temporarily unavailable, please try again");

    memory.set_unavailable(false);
    assert!(h
        .coordinator
        .submit_contribution(sheets[0].id, &Identity::new("a"), 0, row("x"))
        .await
        .is_ok());
}
