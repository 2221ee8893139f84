//! Seeded single-board sessions
//!
//! Drives one team board from join to completion against a manual clock.
//! At every step one holder either writes their row or walks away. Time only
//! moves when every open sheet is waiting on someone who walked away; then
//! the clock jumps past the lease TTL and a sweep reclaims those sheets.

use crate::report::{SessionReport, SessionStats, Violation};
use brainwrite_coordinator::{AbandonmentPolicy, BoardCoordinator, CoordinatorConfig};
use brainwrite_model::{
    BoardId, BoardSpec, Clock, CoordinatorError, Identity, ManualClock, SheetId, DEFAULT_COLUMNS,
};
use brainwrite_store::{BoardStore, MemoryStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;

/// Session parameters
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// RNG seed
    pub seed: u64,
    /// Participants to join (1..=6)
    pub participants: usize,
    /// Probability a holder walks away instead of writing
    pub abandon_rate: f64,
    /// Abandonment policy for the sweeper
    pub policy: AbandonmentPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            participants: 6,
            abandon_rate: 0.1,
            policy: AbandonmentPolicy::RecordBlank,
        }
    }
}

/// An open sheet and who it is waiting on
struct OpenSheet {
    id: SheetId,
    holder: Identity,
    rows: usize,
}

struct Session {
    coordinator: BoardCoordinator,
    store: Arc<dyn BoardStore>,
    clock: Arc<ManualClock>,
    board: BoardId,
    roster: Vec<Identity>,
    rng: StdRng,
    stats: SessionStats,
    violations: Vec<Violation>,
    /// Turns someone walked away from, by (sheet, holder)
    walked_away: HashSet<(SheetId, Identity)>,
    departed: HashSet<Identity>,
}

/// Run one seeded session
///
/// # Errors
/// Fails only when the board cannot be set up; broken guarantees are
/// reported as violations.
pub async fn run_session(config: &SessionConfig) -> anyhow::Result<SessionReport> {
    anyhow::ensure!(
        (1..=6).contains(&config.participants),
        "participants must be between 1 and 6"
    );
    anyhow::ensure!(
        (0.0..1.0).contains(&config.abandon_rate),
        "abandon rate must be in [0, 1)"
    );

    let store: Arc<dyn BoardStore> = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::starting_now());
    let coordinator = BoardCoordinator::new(
        Arc::clone(&store),
        clock.clone(),
        CoordinatorConfig::default()
            .with_abandonment_policy(config.policy)
            .with_sweep_before_submit(false),
    )?;

    let min = if config.participants == 1 { 1 } else { 2 };
    let board = coordinator
        .create_board(BoardSpec::new("facilitator", "simulated session").with_capacity(min, 6))
        .await?;
    let roster: Vec<Identity> = (0..config.participants)
        .map(|i| Identity::new(format!("p{i}")))
        .collect();
    for who in &roster {
        coordinator.join(board.id, who, who.as_str()).await?;
    }
    coordinator.start_board(board.id, &Identity::new("facilitator")).await?;

    let mut session = Session {
        coordinator,
        store,
        clock,
        board: board.id,
        roster,
        rng: StdRng::seed_from_u64(config.seed),
        stats: SessionStats::default(),
        violations: Vec::new(),
        walked_away: HashSet::new(),
        departed: HashSet::new(),
    };
    let complete = session.drive(config.abandon_rate).await?;
    session.check_final(config.policy).await?;

    Ok(SessionReport {
        seed: config.seed,
        participants: config.participants,
        abandon_rate: config.abandon_rate,
        policy: format!("{:?}", config.policy),
        complete,
        stats: session.stats,
        violations: session.violations,
    })
}

impl Session {
    async fn drive(&mut self, abandon_rate: f64) -> anyhow::Result<bool> {
        let n = self.roster.len();
        let max_steps = 4 * n * n + 16;

        for _ in 0..max_steps {
            self.stats.steps += 1;
            if self.coordinator.is_board_complete(self.board).await? {
                return Ok(true);
            }

            let open = self.open_sheets().await?;
            let actionable: Vec<&OpenSheet> = open
                .iter()
                .filter(|s| !self.walked_away.contains(&(s.id, s.holder.clone())))
                .filter(|s| !self.departed.contains(&s.holder))
                .collect();

            if actionable.is_empty() {
                self.wait_out_leases().await?;
                continue;
            }

            let pick = actionable[self.rng.random_range(0..actionable.len())];
            self.probe_intrusion(pick).await;

            if self.rng.random_bool(abandon_rate) {
                self.stats.abandoned_turns += 1;
                self.walked_away.insert((pick.id, pick.holder.clone()));
                continue;
            }

            let row = vec![Some(format!("idea from {}", pick.holder)); usize::from(DEFAULT_COLUMNS)];
            let free_row = self.free_row(pick.id).await?;
            match self
                .coordinator
                .submit_contribution(pick.id, &pick.holder, free_row, row)
                .await
            {
                Ok(_) => self.stats.submissions += 1,
                Err(e) => self.violations.push(Violation::new(
                    "submit",
                    format!("{} could not write on their own sheet {}: {e}", pick.holder, pick.id),
                )),
            }
        }

        let complete = self.coordinator.is_board_complete(self.board).await?;
        if !complete {
            self.violations.push(Violation::new(
                "stalled",
                format!("board not complete after {max_steps} steps"),
            ));
        }
        Ok(complete)
    }

    async fn open_sheets(&self) -> anyhow::Result<Vec<OpenSheet>> {
        let snapshot = self.coordinator.board_snapshot(self.board).await?;
        Ok(snapshot
            .sheets
            .into_iter()
            .filter_map(|s| {
                let holder = s.sheet.lease.holder()?.clone();
                Some(OpenSheet {
                    id: s.sheet.id,
                    holder,
                    rows: s.contributions.len(),
                })
            })
            .collect())
    }

    async fn free_row(&self, sheet: SheetId) -> anyhow::Result<u32> {
        let rows = self.store.contributions(sheet).await?;
        Ok(brainwrite_coordinator::next_free_row(&rows))
    }

    /// Someone who already wrote on the sheet tries to write again while it
    /// is held; it must be refused.
    async fn probe_intrusion(&mut self, sheet: &OpenSheet) {
        if sheet.rows == 0 {
            return;
        }
        let Ok(rows) = self.store.contributions(sheet.id).await else {
            return;
        };
        let Some(intruder) = rows
            .iter()
            .map(|c| c.author.clone())
            .find(|a| *a != sheet.holder && !self.departed.contains(a))
        else {
            return;
        };

        let values = vec![None; usize::from(DEFAULT_COLUMNS)];
        let row = brainwrite_coordinator::next_free_row(&rows);
        match self
            .coordinator
            .submit_contribution(sheet.id, &intruder, row, values)
            .await
        {
            Err(CoordinatorError::LeaseDenied { .. }) => self.stats.intrusions_denied += 1,
            other => self.violations.push(Violation::new(
                "exclusion",
                format!(
                    "{intruder} wrote on {} while {} held it: {other:?}",
                    sheet.id, sheet.holder
                ),
            )),
        }
    }

    async fn wait_out_leases(&mut self) -> anyhow::Result<()> {
        let ttl = self.coordinator.config().lease_ttl();
        self.clock.advance(ttl + chrono::Duration::seconds(1));

        let report = self.coordinator.sweep(self.board).await?;
        self.stats.sweeps += 1;
        self.stats.blanks += report.blanks as u64;
        self.stats.purged += report.purged.len() as u64;
        self.departed.extend(report.purged);
        self.walked_away.retain(|(sheet, _)| !report.reclaimed.contains(sheet));

        tracing::debug!(
            now = %self.clock.now(),
            reclaimed = report.reclaimed.len(),
            "waited out abandoned leases"
        );
        Ok(())
    }

    async fn check_final(&mut self, policy: AbandonmentPolicy) -> anyhow::Result<()> {
        let snapshot = self.coordinator.board_snapshot(self.board).await?;
        let present: HashSet<&Identity> = snapshot.participants.iter().map(|p| &p.identity).collect();
        let mut blanks = 0u64;

        for sheet in &snapshot.sheets {
            let mut authors = HashSet::new();
            let mut rows = HashSet::new();
            for c in &sheet.contributions {
                if !authors.insert(&c.author) {
                    self.violations.push(Violation::new(
                        "rotation",
                        format!("{} wrote twice on {}", c.author, sheet.sheet.id),
                    ));
                }
                if !rows.insert(c.row) || c.row as usize >= sheet.sheet.row_count() {
                    self.violations.push(Violation::new(
                        "rows",
                        format!("bad row {} on {}", c.row, sheet.sheet.id),
                    ));
                }
                blanks += u64::from(c.blank);
            }

            if !sheet.sheet.is_finished() {
                continue;
            }
            let expected: HashSet<&Identity> = match policy {
                AbandonmentPolicy::RecordBlank => self.roster.iter().collect(),
                AbandonmentPolicy::Purge => present.clone(),
            };
            if authors != expected {
                self.violations.push(Violation::new(
                    "coverage",
                    format!(
                        "sheet {} finished with {} of {} expected writers",
                        sheet.sheet.id,
                        authors.len(),
                        expected.len()
                    ),
                ));
            }
        }

        if policy == AbandonmentPolicy::RecordBlank && blanks != self.stats.blanks {
            self.violations.push(Violation::new(
                "blanks",
                format!("{blanks} blank rows stored, sweeps reported {}", self.stats.blanks),
            ));
        }
        Ok(())
    }
}
