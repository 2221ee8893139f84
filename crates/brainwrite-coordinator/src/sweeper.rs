//! Abandonment sweeper
//!
//! Reclaims sheets whose holder let the lease run out, and repairs sheets
//! left without a holder. The move to the next writer is one
//! compare-and-swap from the observed lease version. A blank row is recorded
//! before that swap and a purge only after it wins.

use crate::config::AbandonmentPolicy;
use crate::notify::{publish_quietly, BoardEvent, Notifier};
use crate::rotation::{next_free_row, NextHolder, RotationScheduler};
use brainwrite_model::{
    BoardId, Clock, Contribution, CoordinatorError, Identity, LeaseState, Sheet, SheetId,
};
use brainwrite_store::{BoardStore, StoreError};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What one sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Sheets taken back from an expired holder
    pub reclaimed: Vec<SheetId>,
    /// Unheld, unfinished sheets given a holder again
    pub repaired: Vec<SheetId>,
    /// Sheets finished by this sweep
    pub completed: Vec<SheetId>,
    /// Blank rows recorded
    pub blanks: usize,
    /// Participants removed under the purge policy
    pub purged: Vec<Identity>,
}

impl SweepReport {
    /// Sweep found nothing to do
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reclaimed.is_empty() && self.repaired.is_empty()
    }
}

/// Reclaims abandoned sheets
#[derive(Debug, Clone)]
pub struct AbandonmentSweeper {
    store: Arc<dyn BoardStore>,
    clock: Arc<dyn Clock>,
    rotation: RotationScheduler,
    notifier: Arc<dyn Notifier>,
    policy: AbandonmentPolicy,
    ttl: Duration,
}

impl AbandonmentSweeper {
    /// Create sweeper
    #[must_use]
    pub fn new(
        store: Arc<dyn BoardStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        policy: AbandonmentPolicy,
        ttl: Duration,
    ) -> Self {
        Self {
            rotation: RotationScheduler::new(Arc::clone(&store)),
            store,
            clock,
            notifier,
            policy,
            ttl,
        }
    }

    /// Active policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> AbandonmentPolicy {
        self.policy
    }

    /// Reclaim every expired or orphaned sheet of `board`
    ///
    /// A sheet whose lease moves while it is being swept is left alone; the
    /// writer that moved it is live.
    ///
    /// # Errors
    /// Returns [`CoordinatorError::NotFound`] for an unknown board and
    /// [`CoordinatorError::StoreUnavailable`] on store failure.
    pub async fn sweep(&self, board: BoardId) -> Result<SweepReport, CoordinatorError> {
        let mut report = SweepReport::default();
        if !self.store.board(board).await?.is_started() {
            return Ok(report);
        }

        for sheet in self.store.sheets(board).await? {
            let now = self.clock.now();
            let abandoned = match &sheet.lease {
                LeaseState::Finished => continue,
                LeaseState::Held { holder, expires_at } if *expires_at <= now => Some(holder.clone()),
                LeaseState::Held { .. } => continue,
                LeaseState::Unheld => None,
            };
            self.reclaim(&sheet, abandoned, &mut report).await?;
        }

        // Sheets a purged writer still holds, expired or not
        if !report.purged.is_empty() {
            for sheet in self.store.sheets(board).await? {
                let Some(holder) = sheet.lease.holder() else {
                    continue;
                };
                if report.purged.contains(holder) {
                    let holder = holder.clone();
                    self.reclaim(&sheet, Some(holder), &mut report).await?;
                }
            }
        }

        if !report.completed.is_empty() && board_finished(self.store.as_ref(), board).await? {
            tracing::info!(board = %board, "board complete");
            publish_quietly(self.notifier.as_ref(), BoardEvent::BoardCompleted { board }).await;
        }
        if !report.is_empty() {
            tracing::info!(
                board = %board,
                reclaimed = report.reclaimed.len(),
                repaired = report.repaired.len(),
                completed = report.completed.len(),
                "sweep finished"
            );
        }
        Ok(report)
    }

    async fn reclaim(
        &self,
        sheet: &Sheet,
        abandoned: Option<Identity>,
        report: &mut SweepReport,
    ) -> Result<(), CoordinatorError> {
        if let (Some(holder), AbandonmentPolicy::RecordBlank) = (&abandoned, self.policy) {
            // A failed write leaves the sheet untouched for the next sweep
            self.record_blank(sheet, holder, report).await?;
        }

        let mut participants = self.store.participants(sheet.board_id).await?;
        if self.policy == AbandonmentPolicy::Purge {
            if let Some(holder) = &abandoned {
                participants.retain(|p| p.identity != *holder);
            }
        }
        let next = self
            .rotation
            .next_holder_skipping(sheet, &participants, abandoned.as_ref())
            .await?;

        let now = self.clock.now();
        let state = match &next {
            NextHolder::Participant(holder) => LeaseState::Held {
                holder: holder.clone(),
                expires_at: now + self.ttl,
            },
            NextHolder::Complete => LeaseState::Finished,
        };
        if !sheet.lease.can_transition_to(&state) {
            tracing::debug!(sheet = %sheet.id, lease = ?sheet.lease, "nothing to reclaim");
            return Ok(());
        }
        let Some(updated) = self
            .store
            .swap_lease(sheet.id, sheet.lease_version, state)
            .await?
        else {
            tracing::debug!(sheet = %sheet.id, "sheet moved during sweep, skipping");
            return Ok(());
        };

        match abandoned {
            Some(holder) => {
                tracing::info!(sheet = %sheet.id, holder = %holder, policy = ?self.policy, "reclaimed expired lease");
                if self.policy == AbandonmentPolicy::Purge
                    && self.store.remove_participant(sheet.board_id, &holder).await?
                {
                    report.purged.push(holder);
                }
                report.reclaimed.push(sheet.id);
            }
            None => {
                tracing::info!(sheet = %sheet.id, "repaired unheld sheet");
                report.repaired.push(sheet.id);
            }
        }

        let event = match (&next, &updated.lease) {
            (NextHolder::Participant(holder), LeaseState::Held { expires_at, .. }) => {
                BoardEvent::SheetRotated {
                    board: sheet.board_id,
                    sheet: sheet.id,
                    holder: holder.clone(),
                    expires_at: *expires_at,
                }
            }
            _ => {
                report.completed.push(sheet.id);
                BoardEvent::SheetCompleted {
                    board: sheet.board_id,
                    sheet: sheet.id,
                }
            }
        };
        publish_quietly(self.notifier.as_ref(), event).await;
        Ok(())
    }

    async fn record_blank(
        &self,
        sheet: &Sheet,
        holder: &Identity,
        report: &mut SweepReport,
    ) -> Result<(), CoordinatorError> {
        let existing = self.store.contributions(sheet.id).await?;
        if existing.iter().any(|c| c.author == *holder) {
            return Ok(());
        }
        let columns = self.store.board(sheet.board_id).await?.columns;
        let blank = Contribution::blank(
            sheet.id,
            holder.clone(),
            next_free_row(&existing),
            columns,
            self.clock.now(),
        );
        match self.store.upsert_contribution(blank).await {
            Ok(_) => report.blanks += 1,
            // A late row from the holder, or another sweep's blank, won
            Err(StoreError::Conflict(reason)) => {
                tracing::debug!(sheet = %sheet.id, holder = %holder, reason = %reason, "blank row skipped");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

/// Every sheet of `board` is finished
pub(crate) async fn board_finished(
    store: &dyn BoardStore,
    board: BoardId,
) -> Result<bool, CoordinatorError> {
    let sheets = store.sheets(board).await?;
    Ok(!sheets.is_empty() && sheets.iter().all(Sheet::is_finished))
}

/// Periodic sweep over every active board
#[derive(Debug)]
pub struct SweepLoop;

impl SweepLoop {
    /// Spawn the loop on the current runtime
    ///
    /// The first sweep runs immediately. Failures are logged and retried on
    /// the next tick.
    #[must_use]
    pub fn spawn(
        sweeper: AbandonmentSweeper,
        interval: std::time::Duration,
    ) -> SweepHandle {
        let (shutdown, mut stop) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => sweep_all(&sweeper).await,
                }
            }
            tracing::debug!("sweep loop stopped");
        });
        SweepHandle {
            shutdown: Some(shutdown),
            task,
        }
    }
}

async fn sweep_all(sweeper: &AbandonmentSweeper) {
    let boards = match sweeper.store.active_boards().await {
        Ok(boards) => boards,
        Err(e) => {
            tracing::error!(error = %e, "sweep loop could not list boards");
            return;
        }
    };
    for board in boards {
        if let Err(e) = sweeper.sweep(board).await {
            tracing::warn!(board = %board, error = %e, "sweep failed");
        }
    }
}

/// Stops a running [`SweepLoop`]
#[derive(Debug)]
pub struct SweepHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Signal the loop and wait for it to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "sweep loop ended abnormally");
        }
    }

    /// Loop task has exited
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}
