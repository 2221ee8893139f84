//! Lease manager
//!
//! Grants, renews, transfers and clears the exclusive write lease on a
//! sheet. Every mutation is a compare-and-swap on the sheet's lease version;
//! a lost race is re-read and re-evaluated up to `cas_attempts` times.
//! Nothing here ever waits for a lease to become free.

use crate::rotation::NextHolder;
use brainwrite_model::{
    Clock, CoordinatorError, Identity, LeaseState, LeaseToken, Sheet, SheetId,
};
use brainwrite_store::BoardStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Grants and moves sheet leases
#[derive(Debug, Clone)]
pub struct LeaseManager {
    store: Arc<dyn BoardStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cas_attempts: u32,
}

impl LeaseManager {
    /// Create lease manager
    #[must_use]
    pub fn new(
        store: Arc<dyn BoardStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        cas_attempts: u32,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            cas_attempts: cas_attempts.max(1),
        }
    }

    /// Default write window
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Take or renew the lease on `sheet` for `identity`
    ///
    /// Succeeds when the sheet is unheld, already held by `identity`, or the
    /// current lease has expired. The new lease runs until `now + ttl`.
    ///
    /// # Errors
    /// - [`CoordinatorError::LeaseDenied`] while someone else holds a live lease
    /// - [`CoordinatorError::SheetFinished`] once the sheet is complete
    /// - [`CoordinatorError::StoreUnavailable`] when the version keeps moving
    pub async fn try_acquire(
        &self,
        sheet: SheetId,
        identity: &Identity,
        ttl: Duration,
    ) -> Result<LeaseToken, CoordinatorError> {
        for attempt in 1..=self.cas_attempts {
            let current = self.store.sheet(sheet).await?;
            let now = self.clock.now();
            Self::check_acquirable(&current, identity, now)?;

            let next = LeaseState::Held {
                holder: identity.clone(),
                expires_at: now + ttl,
            };
            if let Some(updated) = self.swap(&current, next).await? {
                tracing::debug!(sheet = %sheet, holder = %identity, version = updated.lease_version, "lease granted");
                return token_for(&updated);
            }
            tracing::debug!(sheet = %sheet, holder = %identity, attempt, "lease race lost, retrying");
        }
        self.contention(sheet, identity).await
    }

    /// Clear the holder of `sheet`
    ///
    /// Unconditional with respect to who holds it. A finished or already
    /// unheld sheet is returned unchanged.
    ///
    /// # Errors
    /// Returns [`CoordinatorError::NotFound`] for an unknown sheet.
    pub async fn release(&self, sheet: SheetId) -> Result<Sheet, CoordinatorError> {
        for _ in 0..self.cas_attempts {
            let current = self.store.sheet(sheet).await?;
            if !matches!(current.lease, LeaseState::Held { .. }) {
                return Ok(current);
            }
            if let Some(updated) = self.swap(&current, LeaseState::Unheld).await? {
                tracing::debug!(sheet = %sheet, "lease released");
                return Ok(updated);
            }
        }
        Err(CoordinatorError::StoreUnavailable(format!(
            "lease on sheet {sheet} kept changing during release"
        )))
    }

    /// Someone other than `identity` holds a live lease on `sheet`
    ///
    /// # Errors
    /// Returns [`CoordinatorError::NotFound`] for an unknown sheet.
    pub async fn is_held_by_other(
        &self,
        sheet: SheetId,
        identity: &Identity,
    ) -> Result<bool, CoordinatorError> {
        let current = self.store.sheet(sheet).await?;
        Ok(current.is_held_by_other_at(identity, self.clock.now()))
    }

    /// Pass the lease named by `token` to the next writer, or finish the sheet
    ///
    /// Succeeds while the token's holder still holds the sheet. A renewal by
    /// that same holder since the token was issued does not stop the
    /// hand-off; it is retried at the current version.
    ///
    /// # Errors
    /// - [`CoordinatorError::LeaseDenied`] if the lease moved to someone else
    /// - [`CoordinatorError::SheetFinished`] if the sheet finished meanwhile
    /// - [`CoordinatorError::StoreUnavailable`] if the lease was cleared or
    ///   keeps moving
    pub async fn hand_off(
        &self,
        token: &LeaseToken,
        next: &NextHolder,
    ) -> Result<Sheet, CoordinatorError> {
        for attempt in 1..=self.cas_attempts {
            let current = self.store.sheet(token.sheet_id).await?;
            if current.lease.holder() != Some(&token.holder) {
                Self::check_acquirable(&current, &token.holder, self.clock.now())?;
                return Err(CoordinatorError::StoreUnavailable(format!(
                    "lease on sheet {} changed before hand-off",
                    token.sheet_id
                )));
            }
            if current.lease_version != token.version {
                tracing::debug!(sheet = %token.sheet_id, holder = %token.holder, issued = token.version, current = current.lease_version, "lease renewed since grant");
            }

            let state = match next {
                NextHolder::Participant(holder) => LeaseState::Held {
                    holder: holder.clone(),
                    expires_at: self.clock.now() + self.ttl,
                },
                NextHolder::Complete => LeaseState::Finished,
            };
            if let Some(updated) = self.swap(&current, state).await? {
                tracing::debug!(sheet = %token.sheet_id, from = %token.holder, version = updated.lease_version, "lease handed off");
                return Ok(updated);
            }
            tracing::debug!(sheet = %token.sheet_id, holder = %token.holder, attempt, "hand-off race lost, retrying");
        }
        self.contention(token.sheet_id, &token.holder).await
    }

    /// Compare-and-swap from `current`, refusing moves the lease state
    /// machine does not allow
    async fn swap(&self, current: &Sheet, next: LeaseState) -> Result<Option<Sheet>, CoordinatorError> {
        if !current.lease.can_transition_to(&next) {
            if current.is_finished() {
                return Err(CoordinatorError::SheetFinished(current.id));
            }
            return Err(CoordinatorError::invalid(format!(
                "lease on sheet {} cannot move from {:?} to {next:?}",
                current.id, current.lease
            )));
        }
        Ok(self
            .store
            .swap_lease(current.id, current.lease_version, next)
            .await?)
    }

    /// `identity` may take the lease on `sheet` at `now`
    pub(crate) fn check_acquirable(
        sheet: &Sheet,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<(), CoordinatorError> {
        if sheet.is_acquirable_by(identity, now) {
            return Ok(());
        }
        match &sheet.lease {
            LeaseState::Held { holder, expires_at } => Err(CoordinatorError::LeaseDenied {
                sheet: sheet.id,
                holder: holder.clone(),
                expires_at: *expires_at,
            }),
            _ => Err(CoordinatorError::SheetFinished(sheet.id)),
        }
    }

    async fn contention<T>(&self, sheet: SheetId, identity: &Identity) -> Result<T, CoordinatorError> {
        let current = self.store.sheet(sheet).await?;
        Self::check_acquirable(&current, identity, self.clock.now())?;
        tracing::warn!(sheet = %sheet, holder = %identity, attempts = self.cas_attempts, "lease contention");
        Err(CoordinatorError::StoreUnavailable(format!(
            "lease on sheet {sheet} is contended"
        )))
    }
}

fn token_for(sheet: &Sheet) -> Result<LeaseToken, CoordinatorError> {
    match &sheet.lease {
        LeaseState::Held { holder, expires_at } => Ok(LeaseToken {
            sheet_id: sheet.id,
            holder: holder.clone(),
            expires_at: *expires_at,
            version: sheet.lease_version,
        }),
        _ => Err(CoordinatorError::StoreUnavailable(format!(
            "sheet {} returned without a holder after grant",
            sheet.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brainwrite_model::{Board, BoardSpec, ManualClock};
    use brainwrite_store::{AdmitRequest, MemoryStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        leases: LeaseManager,
        sheet: Sheet,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let board = Board::from_spec(BoardSpec::new("owner", "t"), clock.now());
        let board_id = board.id;
        store.insert_board(board, Vec::new()).await.unwrap();
        for who in ["a", "b"] {
            store
                .admit_participant(AdmitRequest {
                    board_id,
                    identity: Identity::new(who),
                    display_name: who.into(),
                    joined_at: clock.now(),
                })
                .await
                .unwrap();
        }
        let now = clock.now();
        store
            .start_board(board_id, now, now + Duration::minutes(5))
            .await
            .unwrap();
        let sheet = store.sheets(board_id).await.unwrap().remove(0);

        let leases = LeaseManager::new(store.clone(), clock.clone(), Duration::minutes(5), 4);
        Fixture {
            store,
            clock,
            leases,
            sheet,
        }
    }

    #[tokio::test]
    async fn live_lease_denies_others() {
        let f = fixture().await;
        let a = Identity::new("a");
        let b = Identity::new("b");

        assert!(f.leases.is_held_by_other(f.sheet.id, &b).await.unwrap());
        assert!(!f.leases.is_held_by_other(f.sheet.id, &a).await.unwrap());

        let err = f.leases.try_acquire(f.sheet.id, &b, f.leases.ttl()).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::LeaseDenied { ref holder, .. } if *holder == a));
    }

    #[tokio::test]
    async fn holder_renews_and_version_moves() {
        let f = fixture().await;
        let a = Identity::new("a");

        f.clock.advance(Duration::minutes(1));
        let token = f.leases.try_acquire(f.sheet.id, &a, f.leases.ttl()).await.unwrap();
        assert_eq!(token.version, f.sheet.lease_version + 1);
        assert_eq!(token.expires_at, f.clock.now() + Duration::minutes(5));
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken() {
        let f = fixture().await;
        let b = Identity::new("b");

        f.clock.advance(Duration::minutes(6));
        assert!(!f.leases.is_held_by_other(f.sheet.id, &b).await.unwrap());
        let token = f.leases.try_acquire(f.sheet.id, &b, Duration::seconds(30)).await.unwrap();
        assert_eq!(token.holder, b);
    }

    #[tokio::test]
    async fn release_then_acquire() {
        let f = fixture().await;
        let released = f.leases.release(f.sheet.id).await.unwrap();
        assert_eq!(released.lease, LeaseState::Unheld);

        // Releasing again changes nothing
        let again = f.leases.release(f.sheet.id).await.unwrap();
        assert_eq!(again.lease_version, released.lease_version);

        assert!(f
            .leases
            .try_acquire(f.sheet.id, &Identity::new("b"), f.leases.ttl())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn hand_off_requires_current_version() {
        let f = fixture().await;
        let a = Identity::new("a");
        let b = Identity::new("b");

        let token = f.leases.try_acquire(f.sheet.id, &a, f.leases.ttl()).await.unwrap();
        let moved = f
            .leases
            .hand_off(&token, &NextHolder::Participant(b.clone()))
            .await
            .unwrap();
        assert_eq!(moved.lease.holder(), Some(&b));

        // Stale token: b now holds a live lease
        let err = f.leases.hand_off(&token, &NextHolder::Complete).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::LeaseDenied { .. }));
    }

    #[tokio::test]
    async fn hand_off_follows_own_renewal() {
        let f = fixture().await;
        let a = Identity::new("a");
        let b = Identity::new("b");

        let first = f.leases.try_acquire(f.sheet.id, &a, f.leases.ttl()).await.unwrap();
        let renewed = f.leases.try_acquire(f.sheet.id, &a, f.leases.ttl()).await.unwrap();
        assert!(renewed.version > first.version);

        let moved = f
            .leases
            .hand_off(&first, &NextHolder::Participant(b.clone()))
            .await
            .unwrap();
        assert_eq!(moved.lease.holder(), Some(&b));
        assert_eq!(moved.lease_version, renewed.version + 1);
    }

    #[tokio::test]
    async fn disallowed_moves_leave_the_version_alone() {
        let f = fixture().await;
        let released = f.leases.release(f.sheet.id).await.unwrap();

        let err = f.leases.swap(&released, LeaseState::Unheld).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidInput(_)));

        let token = f
            .leases
            .try_acquire(f.sheet.id, &Identity::new("a"), f.leases.ttl())
            .await
            .unwrap();
        let finished = f.leases.hand_off(&token, &NextHolder::Complete).await.unwrap();
        let held = LeaseState::Held {
            holder: Identity::new("b"),
            expires_at: f.clock.now() + f.leases.ttl(),
        };
        assert_eq!(
            f.leases.swap(&finished, held).await,
            Err(CoordinatorError::SheetFinished(f.sheet.id))
        );
        assert_eq!(
            f.store.sheet(f.sheet.id).await.unwrap().lease_version,
            finished.lease_version
        );
    }

    #[tokio::test]
    async fn finished_sheet_is_never_acquired() {
        let f = fixture().await;
        let a = Identity::new("a");
        let token = f.leases.try_acquire(f.sheet.id, &a, f.leases.ttl()).await.unwrap();
        f.leases.hand_off(&token, &NextHolder::Complete).await.unwrap();

        assert_eq!(
            f.leases.try_acquire(f.sheet.id, &a, f.leases.ttl()).await,
            Err(CoordinatorError::SheetFinished(f.sheet.id))
        );
        let untouched = f.leases.release(f.sheet.id).await.unwrap();
        assert!(untouched.is_finished());
    }

    #[tokio::test]
    async fn unavailable_store_surfaces() {
        let f = fixture().await;
        f.store.set_unavailable(true);
        let err = f
            .leases
            .try_acquire(f.sheet.id, &Identity::new("a"), f.leases.ttl())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
