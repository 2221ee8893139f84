//! Start planning
//!
//! Turns a board's roster into its rotating sheets. Stores call this inside
//! the same transaction that flips the board to started, so the roster the
//! plan is computed from is the roster that gets frozen.
//!
//! Sheet `i` starts with participant `i` and visits the others in join
//! order, wrapping around. At turn `t` sheet `i` belongs to participant
//! `(i + t) mod n`, so every turn is a bijection between writers and sheets.

use crate::board::{Board, BoardLayout, Participant};
use crate::ids::Identity;
use crate::sheet::{LeaseState, Sheet};
use chrono::{DateTime, Utc};

/// Why a start plan could not be produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartRejection {
    /// Board was started before
    AlreadyStarted,
    /// Roster below the board minimum
    NotEnoughParticipants {
        /// Minimum required by the board
        required: u8,
        /// Participants joined
        actual: usize,
    },
    /// Single-sheet board lost its sheet
    MissingSheet,
}

/// `order` rotated left by `offset`
#[must_use]
pub fn rotated(order: &[Identity], offset: usize) -> Vec<Identity> {
    if order.is_empty() {
        return Vec::new();
    }
    let offset = offset % order.len();
    order[offset..].iter().chain(&order[..offset]).cloned().collect()
}

/// Compute the sheets to persist when `board` starts
///
/// `participants` must be in join order. For team boards the result holds
/// new sheets; for single-sheet boards it holds the existing sheet with its
/// rotation filled in. Every returned sheet is leased to its first writer
/// until `expires_at`.
///
/// # Errors
/// See [`StartRejection`].
pub fn plan_start(
    board: &Board,
    participants: &[Participant],
    existing: &[Sheet],
    expires_at: DateTime<Utc>,
) -> Result<Vec<Sheet>, StartRejection> {
    if board.is_started() {
        return Err(StartRejection::AlreadyStarted);
    }
    if participants.len() < usize::from(board.min_participants) || participants.is_empty() {
        return Err(StartRejection::NotEnoughParticipants {
            required: board.min_participants,
            actual: participants.len(),
        });
    }

    let order: Vec<Identity> = participants.iter().map(|p| p.identity.clone()).collect();

    match board.layout {
        BoardLayout::Team => Ok((0..order.len())
            .map(|i| {
                let rotation = rotated(&order, i);
                let first = rotation[0].clone();
                // position fits: order.len() <= MAX_PARTICIPANTS
                let mut sheet = Sheet::new(board.id, i as u8, rotation);
                sheet.lease = LeaseState::Held {
                    holder: first,
                    expires_at,
                };
                sheet.lease_version = 1;
                sheet
            })
            .collect()),
        BoardLayout::Single => {
            let mut sheet = existing.first().cloned().ok_or(StartRejection::MissingSheet)?;
            sheet.lease = LeaseState::Held {
                holder: order[0].clone(),
                expires_at,
            };
            sheet.rotation = order;
            sheet.lease_version += 1;
            Ok(vec![sheet])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardSpec;
    use std::collections::HashSet;

    fn roster(board: &Board, names: &[&str]) -> Vec<Participant> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| Participant {
                board_id: board.id,
                identity: Identity::new(*name),
                display_name: name.to_uppercase(),
                seq: i as u32,
                joined_at: board.created_at,
            })
            .collect()
    }

    #[test]
    fn rotated_wraps_around() {
        let order: Vec<Identity> = ["a", "b", "c"].into_iter().map(Identity::new).collect();
        let names: Vec<String> = rotated(&order, 1).iter().map(ToString::to_string).collect();
        assert_eq!(names, ["b", "c", "a"]);
        assert_eq!(rotated(&order, 3), order);
    }

    #[test]
    fn team_plan_assigns_distinct_first_writers() {
        let now = Utc::now();
        let board = Board::from_spec(BoardSpec::new("owner", "t"), now);
        let people = roster(&board, &["a", "b", "c"]);

        let sheets = plan_start(&board, &people, &[], now).unwrap();
        assert_eq!(sheets.len(), 3);

        let holders: HashSet<_> = sheets.iter().filter_map(|s| s.lease.holder()).collect();
        assert_eq!(holders.len(), 3);

        // Nobody starts on the sheet they finish
        for sheet in &sheets {
            assert_ne!(sheet.rotation.first(), sheet.rotation.last());
        }
    }

    #[test]
    fn every_turn_is_a_bijection() {
        let now = Utc::now();
        let board = Board::from_spec(BoardSpec::new("owner", "t"), now);
        let people = roster(&board, &["a", "b", "c", "d", "e", "f"]);
        let sheets = plan_start(&board, &people, &[], now).unwrap();

        for turn in 0..people.len() {
            let writers: HashSet<_> = sheets.iter().map(|s| &s.rotation[turn]).collect();
            assert_eq!(writers.len(), people.len(), "turn {turn} reuses a writer");
        }
    }

    #[test]
    fn plan_rejects_small_roster_and_restart() {
        let now = Utc::now();
        let mut board = Board::from_spec(BoardSpec::new("owner", "t"), now);
        let people = roster(&board, &["a"]);
        assert_eq!(
            plan_start(&board, &people, &[], now),
            Err(StartRejection::NotEnoughParticipants {
                required: 2,
                actual: 1
            })
        );

        board.started_at = Some(now);
        assert_eq!(
            plan_start(&board, &people, &[], now),
            Err(StartRejection::AlreadyStarted)
        );
    }

    #[test]
    fn single_plan_reuses_existing_sheet() {
        let now = Utc::now();
        let board = Board::from_spec(
            BoardSpec::new("owner", "t").with_layout(BoardLayout::Single),
            now,
        );
        let existing = Sheet::new(board.id, 0, Vec::new());
        let people = roster(&board, &["a", "b"]);

        let sheets = plan_start(&board, &people, std::slice::from_ref(&existing), now).unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].id, existing.id);
        assert_eq!(sheets[0].lease.holder(), Some(&Identity::new("a")));
        assert_eq!(sheets[0].lease_version, existing.lease_version + 1);
    }
}
