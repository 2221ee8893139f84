//! Board event publishing
//!
//! The coordinator announces joins, round starts, rotations and completion
//! through a [`Notifier`]. Delivery is fire-and-forget: a failed publish is
//! logged and never fails the operation that triggered it.

use async_trait::async_trait;
use brainwrite_model::{BoardId, Identity, SheetId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tokio::sync::broadcast;

/// Something observers of a board may want to react to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BoardEvent {
    /// A new participant was admitted
    ParticipantJoined {
        /// Board joined
        board: BoardId,
        /// New participant
        identity: Identity,
        /// Name shown to others
        display_name: String,
    },
    /// Sheets were created and handed to their first writers
    RoundStarted {
        /// Started board
        board: BoardId,
        /// Number of sheets in rotation
        sheets: usize,
    },
    /// A sheet moved to its next writer
    SheetRotated {
        /// Owning board
        board: BoardId,
        /// Rotated sheet
        sheet: SheetId,
        /// New writer
        holder: Identity,
        /// End of the new writer's window
        expires_at: DateTime<Utc>,
    },
    /// A sheet went round every participant
    SheetCompleted {
        /// Owning board
        board: BoardId,
        /// Finished sheet
        sheet: SheetId,
    },
    /// Every sheet on the board is finished
    BoardCompleted {
        /// Finished board
        board: BoardId,
    },
}

impl BoardEvent {
    /// Board the event belongs to
    #[must_use]
    pub fn board(&self) -> BoardId {
        match self {
            BoardEvent::ParticipantJoined { board, .. }
            | BoardEvent::RoundStarted { board, .. }
            | BoardEvent::SheetRotated { board, .. }
            | BoardEvent::SheetCompleted { board, .. }
            | BoardEvent::BoardCompleted { board } => *board,
        }
    }
}

/// Publish failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    /// Transport rejected the event
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound event sink
#[async_trait]
pub trait Notifier: Send + Sync + Debug {
    /// Publish one event
    async fn publish(&self, event: BoardEvent) -> Result<(), NotifyError>;
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn publish(&self, _event: BoardEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Fans events out to in-process subscribers
///
/// Slow subscribers lag and lose the oldest events; see
/// [`broadcast::error::RecvError::Lagged`].
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<BoardEvent>,
}

impl BroadcastNotifier {
    /// Create with a per-subscriber buffer of `capacity` events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New receiver seeing events published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.sender.subscribe()
    }

    /// Current subscriber count
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn publish(&self, event: BoardEvent) -> Result<(), NotifyError> {
        // No subscribers is not a failure
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Publish and log failures instead of returning them
pub(crate) async fn publish_quietly(notifier: &dyn Notifier, event: BoardEvent) {
    let board = event.board();
    if let Err(e) = notifier.publish(event).await {
        tracing::warn!(board = %board, error = %e, "board event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn publish(&self, _event: BoardEvent) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("socket closed".into()))
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let board = BoardId::new();

        notifier
            .publish(BoardEvent::BoardCompleted { board })
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), BoardEvent::BoardCompleted { board });
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_succeeds() {
        let notifier = BroadcastNotifier::default();
        assert_eq!(notifier.subscriber_count(), 0);
        let event = BoardEvent::RoundStarted {
            board: BoardId::new(),
            sheets: 3,
        };
        assert!(notifier.publish(event).await.is_ok());
    }

    #[tokio::test]
    async fn failed_publish_is_swallowed() {
        publish_quietly(&Failing, BoardEvent::BoardCompleted { board: BoardId::new() }).await;
    }

    #[test]
    fn events_serialize_with_tag() {
        let board = BoardId::new();
        let json = serde_json::to_value(BoardEvent::BoardCompleted { board }).unwrap();
        assert_eq!(json["event"], "board_completed");
    }
}
