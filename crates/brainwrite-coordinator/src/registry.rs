//! Participant registry
//!
//! Admission is a single store operation, so the capacity ceiling holds
//! under any number of concurrent joins.

use brainwrite_model::{BoardId, Clock, CoordinatorError, Identity, Participant};
use brainwrite_store::{AdmitRequest, Admission, BoardStore};
use std::sync::Arc;

/// Tracks who joined which board
#[derive(Debug, Clone)]
pub struct ParticipantRegistry {
    store: Arc<dyn BoardStore>,
    clock: Arc<dyn Clock>,
    max_display_name_len: usize,
}

impl ParticipantRegistry {
    /// Create registry over `store`
    #[must_use]
    pub fn new(store: Arc<dyn BoardStore>, clock: Arc<dyn Clock>, max_display_name_len: usize) -> Self {
        Self {
            store,
            clock,
            max_display_name_len,
        }
    }

    /// Join `board` as `identity`
    ///
    /// Idempotent: joining again returns the existing record, before or after
    /// the board starts.
    ///
    /// # Errors
    /// - [`CoordinatorError::InvalidInput`] for an empty or over-long name
    /// - [`CoordinatorError::Full`] when the board is at capacity
    /// - [`CoordinatorError::AlreadyStarted`] for newcomers after start
    pub async fn join(
        &self,
        board: BoardId,
        identity: &Identity,
        display_name: &str,
    ) -> Result<Participant, CoordinatorError> {
        self.admit(board, identity, display_name)
            .await
            .map(|(participant, _)| participant)
    }

    /// Join and report whether the participant is new
    pub(crate) async fn admit(
        &self,
        board: BoardId,
        identity: &Identity,
        display_name: &str,
    ) -> Result<(Participant, bool), CoordinatorError> {
        let display_name = self.check_display_name(display_name)?;
        if identity.as_str().trim().is_empty() {
            return Err(CoordinatorError::invalid("identity must not be empty"));
        }

        let request = AdmitRequest {
            board_id: board,
            identity: identity.clone(),
            display_name,
            joined_at: self.clock.now(),
        };

        match self.store.admit_participant(request).await? {
            Admission::Admitted(participant) => {
                tracing::info!(
                    board = %board,
                    identity = %identity,
                    seq = participant.seq,
                    "participant joined"
                );
                Ok((participant, true))
            }
            Admission::Existing(participant) => {
                tracing::debug!(board = %board, identity = %identity, "participant rejoined");
                Ok((participant, false))
            }
            Admission::Full { capacity } => {
                tracing::debug!(board = %board, identity = %identity, capacity, "join rejected: full");
                Err(CoordinatorError::Full { capacity })
            }
            Admission::Started => Err(CoordinatorError::AlreadyStarted),
        }
    }

    /// Number of participants
    ///
    /// # Errors
    /// Returns [`CoordinatorError::NotFound`] for an unknown board.
    pub async fn count(&self, board: BoardId) -> Result<usize, CoordinatorError> {
        Ok(self.store.participant_count(board).await?)
    }

    /// Whether the board has reached its capacity
    ///
    /// # Errors
    /// Returns [`CoordinatorError::NotFound`] for an unknown board.
    pub async fn is_full(&self, board: BoardId) -> Result<bool, CoordinatorError> {
        let capacity = self.store.board(board).await?.max_participants;
        let count = self.store.participant_count(board).await?;
        Ok(count >= usize::from(capacity))
    }

    /// Participants in join order
    ///
    /// # Errors
    /// Returns [`CoordinatorError::NotFound`] for an unknown board.
    pub async fn participants(&self, board: BoardId) -> Result<Vec<Participant>, CoordinatorError> {
        Ok(self.store.participants(board).await?)
    }

    fn check_display_name(&self, name: &str) -> Result<String, CoordinatorError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoordinatorError::invalid("display name must not be empty"));
        }
        if name.chars().count() > self.max_display_name_len {
            return Err(CoordinatorError::invalid(format!(
                "display name longer than {} characters",
                self.max_display_name_len
            )));
        }
        Ok(name.to_string())
    }
}
