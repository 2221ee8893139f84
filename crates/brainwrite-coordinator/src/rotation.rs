//! Rotation scheduler
//!
//! A sheet's turn order is fixed when the board starts. The next writer is
//! always the first identity in that order who has neither written on the
//! sheet nor left the board, so a sheet completes after at most one turn per
//! participant and nobody is passed over twice.

use brainwrite_model::{Contribution, CoordinatorError, Identity, Participant, Sheet};
use brainwrite_store::BoardStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Who gets a sheet next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextHolder {
    /// Hand the sheet to this participant
    Participant(Identity),
    /// Everyone still present has written
    Complete,
}

impl NextHolder {
    /// Next writer, if any
    #[inline]
    #[must_use]
    pub fn participant(&self) -> Option<&Identity> {
        match self {
            NextHolder::Participant(id) => Some(id),
            NextHolder::Complete => None,
        }
    }
}

/// Pick the next writer from `order`
///
/// Identities missing from `present` count as already visited.
#[must_use]
pub fn decide(order: &[Identity], contributed: &[Identity], present: &[Identity]) -> NextHolder {
    order
        .iter()
        .find(|id| !contributed.contains(id) && present.contains(id))
        .map_or(NextHolder::Complete, |id| NextHolder::Participant(id.clone()))
}

/// Lowest row index nobody has written yet
#[must_use]
pub fn next_free_row(contributions: &[Contribution]) -> u32 {
    (0..)
        .find(|row| contributions.iter().all(|c| c.row != *row))
        .unwrap_or(0)
}

/// Decides the next writer of a sheet from stored contributions
#[derive(Debug, Clone)]
pub struct RotationScheduler {
    store: Arc<dyn BoardStore>,
}

impl RotationScheduler {
    /// Create scheduler over `store`
    #[must_use]
    pub fn new(store: Arc<dyn BoardStore>) -> Self {
        Self { store }
    }

    /// Next writer of `sheet` given the current roster
    ///
    /// # Errors
    /// Returns [`CoordinatorError::NotFound`] for an unknown sheet.
    pub async fn next_holder(
        &self,
        sheet: &Sheet,
        participants: &[Participant],
    ) -> Result<NextHolder, CoordinatorError> {
        self.next_holder_skipping(sheet, participants, None).await
    }

    /// Next writer, treating `skipped` as visited
    ///
    /// Used when reclaiming an abandoned lease: the absent holder's turn is
    /// over whether or not a row gets recorded for them.
    ///
    /// # Errors
    /// Returns [`CoordinatorError::NotFound`] for an unknown sheet.
    pub async fn next_holder_skipping(
        &self,
        sheet: &Sheet,
        participants: &[Participant],
        skipped: Option<&Identity>,
    ) -> Result<NextHolder, CoordinatorError> {
        let contributions = self.store.contributions(sheet.id).await?;
        let mut contributed: Vec<Identity> =
            contributions.into_iter().map(|c| c.author).collect();
        contributed.extend(skipped.cloned());
        let present: Vec<Identity> = participants.iter().map(|p| p.identity.clone()).collect();

        Ok(decide(&sheet.rotation, &contributed, &present))
    }
}
