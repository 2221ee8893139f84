//! Board coordinator
//!
//! The facade request handlers talk to. It owns no mutable state of its own:
//! every decision that matters under contention is delegated to an atomic
//! store operation, so any number of coordinators (in one process or many)
//! may serve the same boards.
//!
//! # Write round
//! 1. Participants join; the registry enforces capacity
//! 2. The owner or a participant starts the board; sheets are handed out
//! 3. Each submit renews the writer's lease, stores the row and passes the
//!    sheet to the next writer, or finishes it
//! 4. Expired leases are reclaimed by the sweeper

use crate::config::{ConfigError, CoordinatorConfig};
use crate::lease::LeaseManager;
use crate::notify::{publish_quietly, BoardEvent, NoopNotifier, Notifier};
use crate::registry::ParticipantRegistry;
use crate::rotation::{NextHolder, RotationScheduler};
use crate::sweeper::{board_finished, AbandonmentSweeper, SweepHandle, SweepLoop, SweepReport};
use brainwrite_model::{
    Board, BoardId, BoardLayout, BoardSpec, Clock, Contribution, CoordinatorError, Identity,
    LeaseState, Participant, Sheet, SheetId,
};
use brainwrite_store::{BoardStore, StartOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A sheet with the rows written on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetSnapshot {
    /// Sheet and its lease
    pub sheet: Sheet,
    /// Rows ordered by index
    pub contributions: Vec<Contribution>,
}

/// Everything needed to render a board's results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    /// Board metadata
    pub board: Board,
    /// Participants in join order
    pub participants: Vec<Participant>,
    /// Sheets ordered by position
    pub sheets: Vec<SheetSnapshot>,
}

impl BoardSnapshot {
    /// Every sheet has finished
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.sheets.is_empty() && self.sheets.iter().all(|s| s.sheet.is_finished())
    }
}

/// Turn-based sheet coordinator
#[derive(Debug, Clone)]
pub struct BoardCoordinator {
    config: CoordinatorConfig,
    store: Arc<dyn BoardStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    registry: ParticipantRegistry,
    lease: LeaseManager,
    rotation: RotationScheduler,
    sweeper: AbandonmentSweeper,
}

impl BoardCoordinator {
    /// Create coordinator over `store`
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if `config` fails validation.
    pub fn new(
        store: Arc<dyn BoardStore>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let notifier: Arc<dyn Notifier> = Arc::new(NoopNotifier);
        Ok(Self {
            registry: ParticipantRegistry::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                config.max_display_name_len,
            ),
            lease: LeaseManager::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                config.lease_ttl(),
                config.cas_attempts,
            ),
            rotation: RotationScheduler::new(Arc::clone(&store)),
            sweeper: Self::build_sweeper(&store, &clock, &notifier, &config),
            config,
            store,
            clock,
            notifier,
        })
    }

    /// With event notifier
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.sweeper = Self::build_sweeper(&self.store, &self.clock, &notifier, &self.config);
        self.notifier = notifier;
        self
    }

    fn build_sweeper(
        store: &Arc<dyn BoardStore>,
        clock: &Arc<dyn Clock>,
        notifier: &Arc<dyn Notifier>,
        config: &CoordinatorConfig,
    ) -> AbandonmentSweeper {
        AbandonmentSweeper::new(
            Arc::clone(store),
            Arc::clone(clock),
            Arc::clone(notifier),
            config.abandonment_policy,
            config.lease_ttl(),
        )
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Participant registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    /// Lease manager
    #[inline]
    #[must_use]
    pub fn lease(&self) -> &LeaseManager {
        &self.lease
    }

    /// Rotation scheduler
    #[inline]
    #[must_use]
    pub fn rotation(&self) -> &RotationScheduler {
        &self.rotation
    }

    /// Abandonment sweeper
    #[inline]
    #[must_use]
    pub fn sweeper(&self) -> &AbandonmentSweeper {
        &self.sweeper
    }

    /// Create a board
    ///
    /// Single-sheet boards get their sheet now; its turn order is fixed at
    /// start.
    ///
    /// # Errors
    /// Returns [`CoordinatorError::InvalidInput`] for out-of-range settings.
    pub async fn create_board(&self, spec: BoardSpec) -> Result<Board, CoordinatorError> {
        spec.validate()?;
        let board = Board::from_spec(spec, self.clock.now());
        let sheets = match board.layout {
            BoardLayout::Single => vec![Sheet::new(board.id, 0, Vec::new())],
            BoardLayout::Team => Vec::new(),
        };
        self.store.insert_board(board.clone(), sheets).await?;
        tracing::info!(board = %board.id, owner = %board.owner, layout = board.layout.as_str(), "board created");
        Ok(board)
    }

    /// Join `board`
    ///
    /// # Errors
    /// See [`ParticipantRegistry::join`].
    pub async fn join(
        &self,
        board: BoardId,
        identity: &Identity,
        display_name: &str,
    ) -> Result<Participant, CoordinatorError> {
        let (participant, admitted) = self.registry.admit(board, identity, display_name).await?;
        if admitted {
            publish_quietly(
                self.notifier.as_ref(),
                BoardEvent::ParticipantJoined {
                    board,
                    identity: participant.identity.clone(),
                    display_name: participant.display_name.clone(),
                },
            )
            .await;
        }
        Ok(participant)
    }

    /// Start the round on `board`
    ///
    /// Team boards get one sheet per participant, sheet `i` leased to
    /// participant `i`. Single-sheet boards lease their sheet to the first
    /// participant. One-shot: a second start fails.
    ///
    /// # Errors
    /// - [`CoordinatorError::Forbidden`] if `caller` is neither owner nor participant
    /// - [`CoordinatorError::AlreadyStarted`] on a second start
    /// - [`CoordinatorError::NotEnoughParticipants`] below the board minimum
    pub async fn start_board(
        &self,
        board: BoardId,
        caller: &Identity,
    ) -> Result<Vec<Sheet>, CoordinatorError> {
        let record = self.store.board(board).await?;
        if record.is_started() {
            return Err(CoordinatorError::AlreadyStarted);
        }
        if !record.is_owner(caller) && !self.is_participant(board, caller).await? {
            return Err(CoordinatorError::Forbidden {
                identity: caller.clone(),
                action: "start the board",
            });
        }

        let now = self.clock.now();
        match self
            .store
            .start_board(board, now, now + self.lease.ttl())
            .await?
        {
            StartOutcome::Started(sheets) => {
                tracing::info!(board = %board, sheets = sheets.len(), started_by = %caller, "round started");
                publish_quietly(
                    self.notifier.as_ref(),
                    BoardEvent::RoundStarted {
                        board,
                        sheets: sheets.len(),
                    },
                )
                .await;
                Ok(sheets)
            }
            StartOutcome::AlreadyStarted => Err(CoordinatorError::AlreadyStarted),
            StartOutcome::NotEnoughParticipants { required, actual } => {
                Err(CoordinatorError::NotEnoughParticipants { required, actual })
            }
        }
    }

    /// Write `values` as `identity`'s row on `sheet`, then pass the sheet on
    ///
    /// Takes (or renews) the lease first; the row is stored only while the
    /// lease is held. Afterwards the sheet goes to the next writer with a
    /// fresh lease, or finishes when everyone present has written.
    ///
    /// Resubmitting the same row is an upsert, so a caller may retry after a
    /// retryable failure without being refused for having written already.
    ///
    /// # Errors
    /// - [`CoordinatorError::NotAParticipant`] if `identity` never joined
    /// - [`CoordinatorError::BoardNotStarted`] before start
    /// - [`CoordinatorError::LeaseDenied`] while someone else is writing
    /// - [`CoordinatorError::SheetFinished`] on a complete sheet
    /// - [`CoordinatorError::InvalidInput`] for a malformed or conflicting row
    pub async fn submit_contribution(
        &self,
        sheet: SheetId,
        identity: &Identity,
        row: u32,
        values: Vec<Option<String>>,
    ) -> Result<Contribution, CoordinatorError> {
        let board_id = self.store.sheet(sheet).await?.board_id;
        if self.config.sweep_before_submit {
            self.sweeper.sweep(board_id).await?;
        }

        let board = self.store.board(board_id).await?;
        let participants = self.store.participants(board_id).await?;
        if !participants.iter().any(|p| p.identity == *identity) {
            return Err(CoordinatorError::NotAParticipant {
                board: board_id,
                identity: identity.clone(),
            });
        }
        if !board.is_started() {
            return Err(CoordinatorError::BoardNotStarted(board_id));
        }

        // Read after the started check so the rotation is in place
        let current = self.store.sheet(sheet).await?;
        LeaseManager::check_acquirable(&current, identity, self.clock.now())?;
        self.check_row(&board, &current, identity, row, &values).await?;

        let token = self
            .lease
            .try_acquire(sheet, identity, self.lease.ttl())
            .await?;
        let now = self.clock.now();
        let contribution = self
            .store
            .upsert_contribution(Contribution::new(sheet, identity.clone(), row, values, now))
            .await?;

        let next = self.rotation.next_holder(&current, &participants).await?;
        let updated = match self.lease.hand_off(&token, &next).await {
            Ok(updated) => updated,
            Err(e @ (CoordinatorError::LeaseDenied { .. } | CoordinatorError::SheetFinished(_))) => {
                // A concurrent resubmit of the same row passed the sheet on
                let stored = self.store.contributions(sheet).await?;
                if stored.iter().any(|c| c.author == *identity && c.row == row) {
                    tracing::debug!(sheet = %sheet, author = %identity, row, "sheet already handed off");
                    return Ok(contribution);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.announce_turn(&updated, &next).await?;

        Ok(contribution)
    }

    async fn check_row(
        &self,
        board: &Board,
        sheet: &Sheet,
        identity: &Identity,
        row: u32,
        values: &[Option<String>],
    ) -> Result<(), CoordinatorError> {
        if values.len() != usize::from(board.columns) {
            return Err(CoordinatorError::invalid(format!(
                "expected {} columns, got {}",
                board.columns,
                values.len()
            )));
        }
        if usize::try_from(row).map_or(true, |r| r >= sheet.row_count()) {
            return Err(CoordinatorError::invalid(format!(
                "row {row} is outside the sheet ({} rows)",
                sheet.row_count()
            )));
        }

        let existing = self.store.contributions(sheet.id).await?;
        if existing.iter().any(|c| c.row == row && c.author != *identity) {
            return Err(CoordinatorError::invalid(format!("row {row} is already taken")));
        }
        if let Some(own) = existing.iter().find(|c| c.author == *identity) {
            if own.row != row {
                return Err(CoordinatorError::invalid(
                    "you have already written on this sheet",
                ));
            }
            // Same row again: a retry after a failed hand-off
            tracing::debug!(sheet = %sheet.id, author = %identity, row, "rewriting own row");
        }
        Ok(())
    }

    async fn announce_turn(&self, sheet: &Sheet, next: &NextHolder) -> Result<(), CoordinatorError> {
        match (next, &sheet.lease) {
            (NextHolder::Participant(holder), LeaseState::Held { expires_at, .. }) => {
                tracing::info!(board = %sheet.board_id, sheet = %sheet.id, holder = %holder, "sheet rotated");
                publish_quietly(
                    self.notifier.as_ref(),
                    BoardEvent::SheetRotated {
                        board: sheet.board_id,
                        sheet: sheet.id,
                        holder: holder.clone(),
                        expires_at: *expires_at,
                    },
                )
                .await;
            }
            _ => {
                tracing::info!(board = %sheet.board_id, sheet = %sheet.id, "sheet complete");
                publish_quietly(
                    self.notifier.as_ref(),
                    BoardEvent::SheetCompleted {
                        board: sheet.board_id,
                        sheet: sheet.id,
                    },
                )
                .await;
                if board_finished(self.store.as_ref(), sheet.board_id).await? {
                    tracing::info!(board = %sheet.board_id, "board complete");
                    publish_quietly(
                        self.notifier.as_ref(),
                        BoardEvent::BoardCompleted {
                            board: sheet.board_id,
                        },
                    )
                    .await;
                }
            }
        }
        Ok(())
    }

    /// Every sheet on `board` is finished
    ///
    /// False for a board that has not started.
    ///
    /// # Errors
    /// Returns [`CoordinatorError::NotFound`] for an unknown board.
    pub async fn is_board_complete(&self, board: BoardId) -> Result<bool, CoordinatorError> {
        if !self.store.board(board).await?.is_started() {
            return Ok(false);
        }
        board_finished(self.store.as_ref(), board).await
    }

    /// Board, roster, sheets and rows in one read
    ///
    /// # Errors
    /// Returns [`CoordinatorError::NotFound`] for an unknown board.
    pub async fn board_snapshot(&self, board: BoardId) -> Result<BoardSnapshot, CoordinatorError> {
        let record = self.store.board(board).await?;
        let participants = self.store.participants(board).await?;
        let mut sheets = Vec::new();
        for sheet in self.store.sheets(board).await? {
            let contributions = self.store.contributions(sheet.id).await?;
            sheets.push(SheetSnapshot {
                sheet,
                contributions,
            });
        }
        Ok(BoardSnapshot {
            board: record,
            participants,
            sheets,
        })
    }

    /// Delete `board` and everything it owns
    ///
    /// # Errors
    /// Returns [`CoordinatorError::Forbidden`] unless `caller` owns the board.
    pub async fn delete_board(&self, board: BoardId, caller: &Identity) -> Result<(), CoordinatorError> {
        let record = self.store.board(board).await?;
        if !record.is_owner(caller) {
            return Err(CoordinatorError::Forbidden {
                identity: caller.clone(),
                action: "delete the board",
            });
        }
        self.store.delete_board(board).await?;
        tracing::info!(board = %board, "board deleted");
        Ok(())
    }

    /// Reclaim expired leases on `board` now
    ///
    /// # Errors
    /// See [`AbandonmentSweeper::sweep`].
    pub async fn sweep(&self, board: BoardId) -> Result<SweepReport, CoordinatorError> {
        self.sweeper.sweep(board).await
    }

    /// Start the background sweep at the configured interval
    #[must_use]
    pub fn spawn_sweep_loop(&self) -> SweepHandle {
        SweepLoop::spawn(self.sweeper.clone(), self.config.sweep_interval())
    }

    async fn is_participant(&self, board: BoardId, identity: &Identity) -> Result<bool, CoordinatorError> {
        Ok(self
            .store
            .participants(board)
            .await?
            .iter()
            .any(|p| p.identity == *identity))
    }
}
