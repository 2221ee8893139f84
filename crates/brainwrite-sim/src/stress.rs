//! Concurrency storms
//!
//! Each board is driven by its own task and every step fans out into
//! concurrent requests: a join storm, a lease race on a released sheet, then
//! full rounds where every holder writes at once while someone who already
//! wrote on the sheet tries to write again.

use crate::report::{StressReport, Violation};
use brainwrite_coordinator::{next_free_row, BoardCoordinator, CoordinatorConfig};
use brainwrite_model::{
    BoardId, BoardSpec, CoordinatorError, Identity, Sheet, SystemClock, DEFAULT_COLUMNS,
    MAX_PARTICIPANTS,
};
use brainwrite_store::{BoardStore, MemoryStore, SqliteStore};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Stress parameters
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Boards driven concurrently
    pub boards: usize,
    /// Join attempts per board
    pub joiners: usize,
    /// SQLite file to run against; in-memory when unset
    pub database: Option<PathBuf>,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            boards: 8,
            joiners: 20,
            database: None,
        }
    }
}

#[derive(Debug, Default)]
struct BoardOutcome {
    admitted: usize,
    rejected_full: usize,
    lease_races: usize,
    intrusions_denied: usize,
    completed: bool,
    violations: Vec<Violation>,
}

/// Run the storm
///
/// # Errors
/// Fails when the store cannot be opened or a board task panics.
pub async fn run_stress(config: &StressConfig) -> anyhow::Result<StressReport> {
    let store: Arc<dyn BoardStore> = match &config.database {
        Some(path) => Arc::new(SqliteStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    let coordinator = BoardCoordinator::new(
        store,
        Arc::new(SystemClock),
        CoordinatorConfig::default().with_sweep_before_submit(false),
    )?;

    let started = Instant::now();
    let tasks = (0..config.boards).map(|i| {
        let coordinator = coordinator.clone();
        let joiners = config.joiners;
        tokio::spawn(async move { storm_board(coordinator, i, joiners).await })
    });

    let mut report = StressReport {
        boards: config.boards,
        joiners: config.joiners,
        ..StressReport::default()
    };
    for outcome in join_all(tasks).await {
        let outcome = outcome?;
        report.admitted += outcome.admitted;
        report.rejected_full += outcome.rejected_full;
        report.lease_races += outcome.lease_races;
        report.intrusions_denied += outcome.intrusions_denied;
        report.completed_boards += usize::from(outcome.completed);
        report.violations.extend(outcome.violations);
    }
    report.elapsed_ms = started.elapsed().as_millis();
    Ok(report)
}

async fn storm_board(coordinator: BoardCoordinator, index: usize, joiners: usize) -> BoardOutcome {
    let mut outcome = BoardOutcome::default();
    if let Err(e) = drive_board(&coordinator, index, joiners, &mut outcome).await {
        outcome
            .violations
            .push(Violation::new("error", format!("board {index}: {e}")));
    }
    outcome
}

async fn drive_board(
    coordinator: &BoardCoordinator,
    index: usize,
    joiners: usize,
    outcome: &mut BoardOutcome,
) -> Result<(), CoordinatorError> {
    let owner = Identity::new(format!("owner-{index}"));
    let board = coordinator
        .create_board(BoardSpec::new(owner.clone(), format!("storm {index}")))
        .await?;

    join_storm(coordinator, board.id, joiners, outcome).await?;
    if outcome.admitted < 2 {
        // Not enough joiners to start a team board
        return Ok(());
    }

    let sheets = coordinator.start_board(board.id, &owner).await?;
    lease_race(coordinator, &sheets[0], outcome).await?;

    let turns = sheets.len();
    for _ in 0..turns {
        write_round(coordinator, board.id, outcome).await?;
    }

    outcome.completed = coordinator.is_board_complete(board.id).await?;
    if !outcome.completed {
        outcome.violations.push(Violation::new(
            "rotation",
            format!("board {} not complete after {turns} rounds", board.id),
        ));
    }
    Ok(())
}

async fn join_storm(
    coordinator: &BoardCoordinator,
    board: BoardId,
    joiners: usize,
    outcome: &mut BoardOutcome,
) -> Result<(), CoordinatorError> {
    let joins = (0..joiners).map(|j| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            let who = Identity::new(format!("{board}-j{j}"));
            coordinator.join(board, &who, &format!("Joiner {j}")).await
        })
    });

    for result in join_all(joins).await {
        match result {
            Ok(Ok(_)) => outcome.admitted += 1,
            Ok(Err(CoordinatorError::Full { .. })) => outcome.rejected_full += 1,
            Ok(Err(e)) => return Err(e),
            Err(e) => outcome
                .violations
                .push(Violation::new("panic", format!("join task failed: {e}"))),
        }
    }

    let count = coordinator.registry().count(board).await?;
    if count > usize::from(MAX_PARTICIPANTS) || count != outcome.admitted {
        outcome.violations.push(Violation::new(
            "capacity",
            format!("board {board} holds {count} participants, {} admissions reported", outcome.admitted),
        ));
    }
    Ok(())
}

async fn lease_race(
    coordinator: &BoardCoordinator,
    started: &Sheet,
    outcome: &mut BoardOutcome,
) -> Result<(), CoordinatorError> {
    let sheet = started.id;
    coordinator.lease().release(sheet).await?;

    let roster = coordinator.registry().participants(started.board_id).await?;
    let racers = roster.iter().map(|p| {
        let coordinator = coordinator.clone();
        let who = p.identity.clone();
        tokio::spawn(async move {
            let ttl = coordinator.lease().ttl();
            coordinator.lease().try_acquire(sheet, &who, ttl).await
        })
    });
    let winners = join_all(racers)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    outcome.lease_races += 1;
    if winners != 1 {
        outcome.violations.push(Violation::new(
            "exclusion",
            format!("{winners} writers acquired sheet {sheet} at once"),
        ));
    }

    // Give the sheet back to its first writer so the rounds stay aligned
    if let Some(first) = started.rotation.first() {
        coordinator.lease().release(sheet).await?;
        coordinator
            .lease()
            .try_acquire(sheet, first, coordinator.lease().ttl())
            .await?;
    }
    Ok(())
}

async fn write_round(
    coordinator: &BoardCoordinator,
    board: BoardId,
    outcome: &mut BoardOutcome,
) -> Result<(), CoordinatorError> {
    let snapshot = coordinator.board_snapshot(board).await?;
    let mut requests = Vec::new();

    for sheet in &snapshot.sheets {
        let Some(holder) = sheet.sheet.lease.holder().cloned() else {
            continue;
        };
        let row = next_free_row(&sheet.contributions);
        let values = vec![Some(format!("{holder} on {}", sheet.sheet.position)); usize::from(DEFAULT_COLUMNS)];
        requests.push((sheet.sheet.id, holder, row, values, false));

        if let Some(prior) = sheet.contributions.first() {
            let blank = vec![None; usize::from(DEFAULT_COLUMNS)];
            requests.push((sheet.sheet.id, prior.author.clone(), row, blank, true));
        }
    }

    let tasks = requests.into_iter().map(|(sheet, who, row, values, intruder)| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            let result = coordinator.submit_contribution(sheet, &who, row, values).await;
            (sheet, who, intruder, result)
        })
    });

    for joined in join_all(tasks).await {
        let Ok((sheet, who, intruder, result)) = joined else {
            outcome
                .violations
                .push(Violation::new("panic", "submit task failed"));
            continue;
        };
        match (intruder, result) {
            (false, Ok(_)) => {}
            (false, Err(e)) => outcome.violations.push(Violation::new(
                "submit",
                format!("holder {who} refused on {sheet}: {e}"),
            )),
            (true, Err(CoordinatorError::LeaseDenied { .. } | CoordinatorError::SheetFinished(_))) => {
                outcome.intrusions_denied += 1;
            }
            (true, Err(CoordinatorError::InvalidInput(_))) => {
                // Refused by the row checks
                outcome.intrusions_denied += 1;
            }
            (true, Ok(_)) => outcome.violations.push(Violation::new(
                "exclusion",
                format!("{who} wrote twice on {sheet}"),
            )),
            (true, Err(e)) => outcome.violations.push(Violation::new(
                "submit",
                format!("intruder {who} on {sheet} saw unexpected {e}"),
            )),
        }
    }
    Ok(())
}
