//! Sheets, leases and contributions
//!
//! A sheet's lease moves through a small state machine:
//!
//! ```text
//! Unheld ──acquire──▶ Held(id, exp) ──release/expiry──▶ Unheld
//!                         │   ▲
//!                         │   └── hand-off to next holder
//!                         ▼
//!                      Finished (terminal)
//! ```
//!
//! Every change bumps [`Sheet::lease_version`], which is the key the store
//! compares before swapping in a new state.

use crate::ids::{BoardId, Identity, SheetId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lease state of a sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LeaseState {
    /// Nobody may write until the lease is acquired
    Unheld,
    /// `holder` may write until `expires_at`
    Held {
        /// Current writer
        holder: Identity,
        /// End of the write window
        expires_at: DateTime<Utc>,
    },
    /// Every participant has contributed
    Finished,
}

impl LeaseState {
    /// Holder, when held (expired or not)
    #[inline]
    #[must_use]
    pub fn holder(&self) -> Option<&Identity> {
        match self {
            LeaseState::Held { holder, .. } => Some(holder),
            _ => None,
        }
    }

    /// Whether a held lease has run out at `now`
    #[inline]
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self, LeaseState::Held { expires_at, .. } if *expires_at <= now)
    }

    /// Whether a transition is allowed
    ///
    /// `Held -> Held` covers both renewal by the same holder and the atomic
    /// hand-off to the next participant.
    #[must_use]
    pub fn can_transition_to(&self, next: &LeaseState) -> bool {
        match (self, next) {
            (LeaseState::Finished, _) => false,
            (LeaseState::Unheld, LeaseState::Unheld) => false,
            (LeaseState::Unheld | LeaseState::Held { .. }, _) => true,
        }
    }
}

/// Unit of rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    /// Sheet ID
    pub id: SheetId,
    /// Owning board
    pub board_id: BoardId,
    /// Index within the board (0-based)
    pub position: u8,
    /// Writers in turn order, fixed at start
    ///
    /// Empty until the board starts.
    pub rotation: Vec<Identity>,
    /// Current lease
    pub lease: LeaseState,
    /// Compare-and-swap key, bumped on every lease change
    pub lease_version: u64,
}

impl Sheet {
    /// Fresh, unheld sheet
    #[must_use]
    pub fn new(board_id: BoardId, position: u8, rotation: Vec<Identity>) -> Self {
        Self {
            id: SheetId::new(),
            board_id,
            position,
            rotation,
            lease: LeaseState::Unheld,
            lease_version: 0,
        }
    }

    /// Rows the sheet will have once complete
    #[inline]
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rotation.len()
    }

    /// Whether the sheet has gone all the way round
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.lease, LeaseState::Finished)
    }

    /// Holder with a live lease at `now`
    #[must_use]
    pub fn live_holder_at(&self, now: DateTime<Utc>) -> Option<&Identity> {
        match &self.lease {
            LeaseState::Held { holder, expires_at } if *expires_at > now => Some(holder),
            _ => None,
        }
    }

    /// Someone other than `identity` holds a live lease
    #[inline]
    #[must_use]
    pub fn is_held_by_other_at(&self, identity: &Identity, now: DateTime<Utc>) -> bool {
        self.live_holder_at(now).is_some_and(|holder| holder != identity)
    }

    /// `identity` may take (or keep) the lease at `now`
    #[inline]
    #[must_use]
    pub fn is_acquirable_by(&self, identity: &Identity, now: DateTime<Utc>) -> bool {
        !self.is_finished() && !self.is_held_by_other_at(identity, now)
    }
}

/// Proof of a granted lease
///
/// Carries the lease version observed at grant time; hand-off only succeeds
/// while the version is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseToken {
    /// Leased sheet
    pub sheet_id: SheetId,
    /// Writer
    pub holder: Identity,
    /// End of the write window
    pub expires_at: DateTime<Utc>,
    /// Version written by the grant
    pub version: u64,
}

/// One row written by one participant during one turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    /// Sheet written on
    pub sheet_id: SheetId,
    /// Writer
    pub author: Identity,
    /// Row index (0-based)
    pub row: u32,
    /// Entry per column, `None` when left blank
    pub values: Vec<Option<String>>,
    /// Written by the sweeper for an absent participant
    pub blank: bool,
    /// First write
    pub created_at: DateTime<Utc>,
    /// Last write
    pub updated_at: DateTime<Utc>,
}

impl Contribution {
    /// Row written by a participant
    #[must_use]
    pub fn new(
        sheet_id: SheetId,
        author: Identity,
        row: u32,
        values: Vec<Option<String>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sheet_id,
            author,
            row,
            values,
            blank: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Empty row recorded on behalf of someone who never returned
    #[must_use]
    pub fn blank(
        sheet_id: SheetId,
        author: Identity,
        row: u32,
        columns: u8,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            blank: true,
            ..Self::new(sheet_id, author, row, vec![None; usize::from(columns)], now)
        }
    }
}
