//! Store error types

use brainwrite_model::{BoardId, CoordinatorError, Entity, SheetId};

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Unknown board
    #[error("board not found: {0}")]
    BoardNotFound(BoardId),

    /// Unknown sheet
    #[error("sheet not found: {0}")]
    SheetNotFound(SheetId),

    /// Write collides with an existing row
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backing store cannot be reached or refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Persisted data failed to decode
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => Self::Corrupt(err.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::BoardNotFound(id) => CoordinatorError::NotFound(Entity::Board(id)),
            StoreError::SheetNotFound(id) => CoordinatorError::NotFound(Entity::Sheet(id)),
            StoreError::Conflict(msg) => CoordinatorError::InvalidInput(msg),
            StoreError::Unavailable(msg) | StoreError::Corrupt(msg) => {
                CoordinatorError::StoreUnavailable(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_coordinator_taxonomy() {
        let id = BoardId::new();
        assert_eq!(
            CoordinatorError::from(StoreError::BoardNotFound(id)),
            CoordinatorError::NotFound(Entity::Board(id))
        );
        assert!(CoordinatorError::from(StoreError::Unavailable("busy".into())).is_retryable());
        assert!(matches!(
            CoordinatorError::from(StoreError::Conflict("row 0".into())),
            CoordinatorError::InvalidInput(_)
        ));
    }
}
