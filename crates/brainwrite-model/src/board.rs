//! Boards and participants
//!
//! A [`Board`] is one ideation session. Its layout decides how many sheets
//! it rotates: one per participant in team mode, a single shared sheet
//! otherwise.

use crate::error::CoordinatorError;
use crate::ids::{BoardId, Identity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard ceiling on participants per board
pub const MAX_PARTICIPANTS: u8 = 6;

/// Upper bound on entries per row
pub const MAX_COLUMNS: u8 = 10;

/// Entries per row unless the board says otherwise
pub const DEFAULT_COLUMNS: u8 = 3;

/// How many sheets a board rotates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardLayout {
    /// One sheet per participant, all rotating at once
    Team,
    /// One shared sheet passed around the group
    Single,
}

impl BoardLayout {
    /// Number of sheets for `participants` joined members
    #[inline]
    #[must_use]
    pub fn sheet_count(self, participants: usize) -> usize {
        match self {
            BoardLayout::Team => participants,
            BoardLayout::Single => 1,
        }
    }

    /// Smallest group that makes the layout meaningful
    #[inline]
    #[must_use]
    pub fn default_min_participants(self) -> u8 {
        match self {
            BoardLayout::Team => 2,
            BoardLayout::Single => 1,
        }
    }

    /// Stable name used in persistence
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BoardLayout::Team => "team",
            BoardLayout::Single => "single",
        }
    }

    /// Parse the persisted name
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "team" => Some(BoardLayout::Team),
            "single" => Some(BoardLayout::Single),
            _ => None,
        }
    }
}

/// Request to create a board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSpec {
    /// Creator of the board
    pub owner: Identity,
    /// Topic shown to participants
    pub title: String,
    /// Sheet layout
    pub layout: BoardLayout,
    /// Entries per row
    pub columns: u8,
    /// Participants needed before start
    pub min_participants: u8,
    /// Participant ceiling (at most [`MAX_PARTICIPANTS`])
    pub max_participants: u8,
}

impl BoardSpec {
    /// Team board with default capacity and columns
    #[must_use]
    pub fn new(owner: impl Into<Identity>, title: impl Into<String>) -> Self {
        let layout = BoardLayout::Team;
        Self {
            owner: owner.into(),
            title: title.into(),
            layout,
            columns: DEFAULT_COLUMNS,
            min_participants: layout.default_min_participants(),
            max_participants: MAX_PARTICIPANTS,
        }
    }

    /// With layout (resets the minimum to the layout default)
    #[inline]
    #[must_use]
    pub fn with_layout(mut self, layout: BoardLayout) -> Self {
        self.layout = layout;
        self.min_participants = layout.default_min_participants();
        self
    }

    /// With entries per row
    #[inline]
    #[must_use]
    pub fn with_columns(mut self, columns: u8) -> Self {
        self.columns = columns;
        self
    }

    /// With capacity bounds
    #[inline]
    #[must_use]
    pub fn with_capacity(mut self, min: u8, max: u8) -> Self {
        self.min_participants = min;
        self.max_participants = max;
        self
    }

    /// Check bounds before anything is persisted
    ///
    /// # Errors
    /// `InvalidInput` when the title is blank, the column count is outside
    /// `1..=MAX_COLUMNS`, or the capacity bounds are inconsistent.
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.title.trim().is_empty() {
            return Err(CoordinatorError::invalid("title must not be empty"));
        }
        if self.columns == 0 || self.columns > MAX_COLUMNS {
            return Err(CoordinatorError::invalid(format!(
                "columns must be between 1 and {MAX_COLUMNS}"
            )));
        }
        if self.max_participants == 0 || self.max_participants > MAX_PARTICIPANTS {
            return Err(CoordinatorError::invalid(format!(
                "max participants must be between 1 and {MAX_PARTICIPANTS}"
            )));
        }
        if self.min_participants == 0 || self.min_participants > self.max_participants {
            return Err(CoordinatorError::invalid(
                "min participants must be between 1 and max participants",
            ));
        }
        Ok(())
    }
}

/// One ideation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// Board ID
    pub id: BoardId,
    /// Creator
    pub owner: Identity,
    /// Topic
    pub title: String,
    /// Sheet layout
    pub layout: BoardLayout,
    /// Entries per row
    pub columns: u8,
    /// Participants needed before start
    pub min_participants: u8,
    /// Participant ceiling
    pub max_participants: u8,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Set once, when sheets start rotating
    pub started_at: Option<DateTime<Utc>>,
}

impl Board {
    /// Materialize a validated spec
    #[must_use]
    pub fn from_spec(spec: BoardSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            id: BoardId::new(),
            owner: spec.owner,
            title: spec.title,
            layout: spec.layout,
            columns: spec.columns,
            min_participants: spec.min_participants,
            max_participants: spec.max_participants,
            created_at,
            started_at: None,
        }
    }

    /// Whether sheets have started rotating
    #[inline]
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Whether `identity` created the board
    #[inline]
    #[must_use]
    pub fn is_owner(&self, identity: &Identity) -> bool {
        &self.owner == identity
    }
}

/// Joined member of a board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Board joined
    pub board_id: BoardId,
    /// Caller identity
    pub identity: Identity,
    /// Name shown to others
    pub display_name: String,
    /// Join order within the board (0-based, never reused)
    pub seq: u32,
    /// Join time
    pub joined_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_is_valid_team_board() {
        let spec = BoardSpec::new("owner", "Better onboarding");
        assert!(spec.validate().is_ok());
        assert_eq!(spec.layout, BoardLayout::Team);
        assert_eq!(spec.max_participants, MAX_PARTICIPANTS);
    }

    #[test]
    fn spec_rejects_capacity_above_ceiling() {
        let spec = BoardSpec::new("owner", "t").with_capacity(2, 7);
        assert!(matches!(
            spec.validate(),
            Err(CoordinatorError::InvalidInput(_))
        ));
    }

    #[test]
    fn spec_rejects_min_above_max() {
        let spec = BoardSpec::new("owner", "t").with_capacity(4, 3);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn spec_rejects_bad_columns_and_title() {
        assert!(BoardSpec::new("o", "t").with_columns(0).validate().is_err());
        assert!(BoardSpec::new("o", "t").with_columns(11).validate().is_err());
        assert!(BoardSpec::new("o", "   ").validate().is_err());
    }

    #[test]
    fn layout_decides_sheet_count() {
        assert_eq!(BoardLayout::Team.sheet_count(4), 4);
        assert_eq!(BoardLayout::Single.sheet_count(4), 1);
        assert_eq!(BoardLayout::parse(BoardLayout::Single.as_str()), Some(BoardLayout::Single));
    }
}
