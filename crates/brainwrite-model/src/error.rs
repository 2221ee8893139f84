//! Error types for the coordinator
//!
//! Every failure crosses the coordinator boundary as a typed
//! [`CoordinatorError`]. Capacity, lease and ordering violations are expected
//! and recoverable; only [`CoordinatorError::StoreUnavailable`] is worth a
//! retry, and retrying is the caller's job.

use crate::ids::{BoardId, Identity, SheetId};
use chrono::{DateTime, Utc};
use std::fmt;

/// Entity referenced by a `NotFound` error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// Unknown board
    Board(BoardId),
    /// Unknown sheet
    Sheet(SheetId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Board(id) => write!(f, "board {id}"),
            Entity::Sheet(id) => write!(f, "sheet {id}"),
        }
    }
}

/// Main coordinator error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// Participant ceiling reached
    #[error("board is full (capacity: {capacity})")]
    Full {
        /// Configured capacity of the board
        capacity: u8,
    },

    /// Late join after the round started
    #[error("board has already started")]
    AlreadyStarted,

    /// Identity never joined the board
    #[error("{identity} is not a participant of board {board}")]
    NotAParticipant {
        /// Board the caller tried to act on
        board: BoardId,
        /// Caller identity
        identity: Identity,
    },

    /// Operation needs a started board
    #[error("board {0} has not started")]
    BoardNotStarted(BoardId),

    /// Someone else holds a live lease on the sheet
    #[error("sheet {sheet} is being written by {holder} until {expires_at}")]
    LeaseDenied {
        /// Contended sheet
        sheet: SheetId,
        /// Current holder
        holder: Identity,
        /// When the holder's lease runs out
        expires_at: DateTime<Utc>,
    },

    /// Unknown board or sheet
    #[error("{0} not found")]
    NotFound(Entity),

    /// Transient infrastructure failure
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Start requested below the minimum participant count
    #[error("not enough participants: need {required}, have {actual}")]
    NotEnoughParticipants {
        /// Minimum required by the board
        required: u8,
        /// Participants currently joined
        actual: usize,
    },

    /// Sheet already went round every participant
    #[error("sheet {0} is finished")]
    SheetFinished(SheetId),

    /// Malformed request data
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Caller lacks the role required for the operation
    #[error("{identity} may not {action}")]
    Forbidden {
        /// Caller identity
        identity: Identity,
        /// Attempted action
        action: &'static str,
    },
}

impl CoordinatorError {
    /// Check if error is retryable
    ///
    /// Only infrastructure failures qualify. Everything else is a decision
    /// the coordinator made and would make again.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Short message suitable for showing to the end user
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Full { .. } => "participant limit reached",
            Self::AlreadyStarted => "this session has already started",
            Self::NotAParticipant { .. } => "you have not joined this session",
            Self::BoardNotStarted(_) => "this session has not started yet",
            Self::LeaseDenied { .. } => "someone else is currently writing",
            Self::NotFound(_) => "this session no longer exists",
            Self::StoreUnavailable(_) => "temporarily unavailable, please try again",
            Self::NotEnoughParticipants { .. } => "waiting for more participants",
            Self::SheetFinished(_) => "this sheet is already complete",
            Self::InvalidInput(_) => "the submitted row is not valid",
            Self::Forbidden { .. } => "only the session owner can do this",
        }
    }

    /// Shorthand for invalid input
    #[inline]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_error_display() {
        let err = CoordinatorError::Full { capacity: 6 };
        assert!(err.to_string().contains("capacity: 6"));
    }

    #[test]
    fn coordinator_error_is_retryable() {
        assert!(CoordinatorError::StoreUnavailable("io".to_string()).is_retryable());
        assert!(!CoordinatorError::AlreadyStarted.is_retryable());
        assert!(!CoordinatorError::Full { capacity: 6 }.is_retryable());
    }

    #[test]
    fn user_messages_distinguish_denials() {
        let lease = CoordinatorError::LeaseDenied {
            sheet: SheetId::new(),
            holder: Identity::new("a"),
            expires_at: Utc::now(),
        };
        let full = CoordinatorError::Full { capacity: 6 };
        let outsider = CoordinatorError::NotAParticipant {
            board: BoardId::new(),
            identity: Identity::new("z"),
        };

        assert_eq!(lease.user_message(), "someone else is currently writing");
        assert_eq!(full.user_message(), "participant limit reached");
        assert_ne!(outsider.user_message(), lease.user_message());
    }
}
