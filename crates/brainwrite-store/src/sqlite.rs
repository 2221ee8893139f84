//! SQLite-backed board store
//!
//! Every call opens its own connection on a blocking task, so two
//! `SqliteStore` values on the same file behave like two server processes.
//! Decisions under contention run inside `BEGIN IMMEDIATE` transactions
//! (one writer at a time per database), and lease swaps are conditional
//! `UPDATE ... WHERE lease_version = ?` statements.

use crate::error::{StoreError, StoreResult};
use crate::store::{AdmitRequest, Admission, BoardStore, StartOutcome};
use async_trait::async_trait;
use brainwrite_model::{
    plan_start, Board, BoardId, BoardLayout, Contribution, Identity, LeaseState, Participant,
    Sheet, SheetId, StartRejection,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a connection waits for the write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS boards (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    title TEXT NOT NULL,
    layout TEXT NOT NULL,
    column_count INTEGER NOT NULL,
    min_participants INTEGER NOT NULL,
    max_participants INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    next_seq INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS participants (
    board_id TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
    identity TEXT NOT NULL,
    display_name TEXT NOT NULL,
    seq INTEGER NOT NULL,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (board_id, identity)
);
CREATE TABLE IF NOT EXISTS sheets (
    id TEXT PRIMARY KEY,
    board_id TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    rotation TEXT NOT NULL,
    holder TEXT,
    expires_at TEXT,
    finished INTEGER NOT NULL DEFAULT 0,
    lease_version INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS sheets_by_board ON sheets (board_id, position);
CREATE TABLE IF NOT EXISTS contributions (
    sheet_id TEXT NOT NULL REFERENCES sheets(id) ON DELETE CASCADE,
    author TEXT NOT NULL,
    row_index INTEGER NOT NULL,
    cells TEXT NOT NULL,
    blank INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (sheet_id, row_index),
    UNIQUE (sheet_id, author)
);
";

const BOARD_COLUMNS: &str = "id, owner, title, layout, column_count, min_participants, \
                             max_participants, created_at, started_at";
const PARTICIPANT_COLUMNS: &str = "board_id, identity, display_name, seq, joined_at";
const SHEET_COLUMNS: &str =
    "id, board_id, position, rotation, holder, expires_at, finished, lease_version";
const CONTRIBUTION_COLUMNS: &str =
    "sheet_id, author, row_index, cells, blank, created_at, updated_at";

/// Board store persisted in a SQLite file
#[derive(Debug, Clone)]
pub struct SqliteStore {
    /// Path to the database file
    path: PathBuf,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `path`
    ///
    /// # Errors
    /// `Unavailable` if the file cannot be opened or the schema applied.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = connect(&store.path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %store.path.display(), "sqlite store ready");
        Ok(store)
    }

    /// Database file location
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` on a fresh connection off the async executor
    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = connect(&path)?;
            op(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

fn connect(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

fn write_tx(conn: &mut Connection) -> StoreResult<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn parse_board_id(raw: &str) -> StoreResult<BoardId> {
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("bad board id {raw:?}")))
}

fn parse_sheet_id(raw: &str) -> StoreResult<SheetId> {
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("bad sheet id {raw:?}")))
}

/// Undecoded `boards` row
struct BoardRow {
    id: String,
    owner: String,
    title: String,
    layout: String,
    columns: u8,
    min_participants: u8,
    max_participants: u8,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
}

impl BoardRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            title: row.get(2)?,
            layout: row.get(3)?,
            columns: row.get(4)?,
            min_participants: row.get(5)?,
            max_participants: row.get(6)?,
            created_at: row.get(7)?,
            started_at: row.get(8)?,
        })
    }

    fn decode(self) -> StoreResult<Board> {
        let layout = BoardLayout::parse(&self.layout)
            .ok_or_else(|| StoreError::Corrupt(format!("bad layout {:?}", self.layout)))?;
        Ok(Board {
            id: parse_board_id(&self.id)?,
            owner: Identity::new(self.owner),
            title: self.title,
            layout,
            columns: self.columns,
            min_participants: self.min_participants,
            max_participants: self.max_participants,
            created_at: self.created_at,
            started_at: self.started_at,
        })
    }
}

/// Undecoded `participants` row
struct ParticipantRow {
    board_id: String,
    identity: String,
    display_name: String,
    seq: u32,
    joined_at: DateTime<Utc>,
}

impl ParticipantRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            board_id: row.get(0)?,
            identity: row.get(1)?,
            display_name: row.get(2)?,
            seq: row.get(3)?,
            joined_at: row.get(4)?,
        })
    }

    fn decode(self) -> StoreResult<Participant> {
        Ok(Participant {
            board_id: parse_board_id(&self.board_id)?,
            identity: Identity::new(self.identity),
            display_name: self.display_name,
            seq: self.seq,
            joined_at: self.joined_at,
        })
    }
}

/// Undecoded `sheets` row
struct SheetRow {
    id: String,
    board_id: String,
    position: u8,
    rotation: String,
    holder: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    finished: bool,
    lease_version: i64,
}

impl SheetRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            board_id: row.get(1)?,
            position: row.get(2)?,
            rotation: row.get(3)?,
            holder: row.get(4)?,
            expires_at: row.get(5)?,
            finished: row.get(6)?,
            lease_version: row.get(7)?,
        })
    }

    fn decode(self) -> StoreResult<Sheet> {
        let lease = match (self.finished, self.holder, self.expires_at) {
            (true, _, _) => LeaseState::Finished,
            (false, Some(holder), Some(expires_at)) => LeaseState::Held {
                holder: Identity::new(holder),
                expires_at,
            },
            (false, None, None) => LeaseState::Unheld,
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "sheet {} has half a lease",
                    self.id
                )))
            }
        };
        Ok(Sheet {
            id: parse_sheet_id(&self.id)?,
            board_id: parse_board_id(&self.board_id)?,
            position: self.position,
            rotation: serde_json::from_str(&self.rotation)?,
            lease,
            lease_version: u64::try_from(self.lease_version)
                .map_err(|_| StoreError::Corrupt("negative lease version".to_string()))?,
        })
    }
}

/// Undecoded `contributions` row
struct ContributionRow {
    sheet_id: String,
    author: String,
    row: u32,
    cells: String,
    blank: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ContributionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sheet_id: row.get(0)?,
            author: row.get(1)?,
            row: row.get(2)?,
            cells: row.get(3)?,
            blank: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn decode(self) -> StoreResult<Contribution> {
        Ok(Contribution {
            sheet_id: parse_sheet_id(&self.sheet_id)?,
            author: Identity::new(self.author),
            row: self.row,
            values: serde_json::from_str(&self.cells)?,
            blank: self.blank,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Column values for a lease state: holder, expiry, finished
fn lease_columns(lease: &LeaseState) -> (Option<String>, Option<DateTime<Utc>>, bool) {
    match lease {
        LeaseState::Unheld => (None, None, false),
        LeaseState::Held { holder, expires_at } => {
            (Some(holder.as_str().to_string()), Some(*expires_at), false)
        }
        LeaseState::Finished => (None, None, true),
    }
}

fn version_param(version: u64) -> StoreResult<i64> {
    i64::try_from(version).map_err(|_| StoreError::Corrupt("lease version overflow".to_string()))
}

fn load_board(conn: &Connection, id: BoardId) -> StoreResult<Board> {
    conn.query_row(
        &format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = ?1"),
        params![id.to_string()],
        BoardRow::read,
    )
    .optional()?
    .ok_or(StoreError::BoardNotFound(id))?
    .decode()
}

fn board_exists(conn: &Connection, id: BoardId) -> StoreResult<()> {
    conn.query_row(
        "SELECT 1 FROM boards WHERE id = ?1",
        params![id.to_string()],
        |_| Ok(()),
    )
    .optional()?
    .ok_or(StoreError::BoardNotFound(id))
}

fn load_participants(conn: &Connection, board: BoardId) -> StoreResult<Vec<Participant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE board_id = ?1 ORDER BY seq"
    ))?;
    let mut participants = Vec::new();
    for row in stmt.query_map(params![board.to_string()], ParticipantRow::read)? {
        participants.push(row?.decode()?);
    }
    Ok(participants)
}

fn load_sheet(conn: &Connection, id: SheetId) -> StoreResult<Sheet> {
    conn.query_row(
        &format!("SELECT {SHEET_COLUMNS} FROM sheets WHERE id = ?1"),
        params![id.to_string()],
        SheetRow::read,
    )
    .optional()?
    .ok_or(StoreError::SheetNotFound(id))?
    .decode()
}

fn load_sheets(conn: &Connection, board: BoardId) -> StoreResult<Vec<Sheet>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SHEET_COLUMNS} FROM sheets WHERE board_id = ?1 ORDER BY position"
    ))?;
    let mut sheets = Vec::new();
    for row in stmt.query_map(params![board.to_string()], SheetRow::read)? {
        sheets.push(row?.decode()?);
    }
    Ok(sheets)
}

fn insert_sheet(conn: &Connection, sheet: &Sheet) -> StoreResult<()> {
    let (holder, expires_at, finished) = lease_columns(&sheet.lease);
    conn.execute(
        &format!("INSERT INTO sheets ({SHEET_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            sheet.id.to_string(),
            sheet.board_id.to_string(),
            sheet.position,
            serde_json::to_string(&sheet.rotation)?,
            holder,
            expires_at,
            finished,
            version_param(sheet.lease_version)?,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl BoardStore for SqliteStore {
    async fn insert_board(&self, board: Board, sheets: Vec<Sheet>) -> StoreResult<()> {
        self.run(move |conn| {
            let tx = write_tx(conn)?;
            let inserted = tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO boards ({BOARD_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    board.id.to_string(),
                    board.owner.as_str(),
                    board.title,
                    board.layout.as_str(),
                    board.columns,
                    board.min_participants,
                    board.max_participants,
                    board.created_at,
                    board.started_at,
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!("board {} exists", board.id)));
            }
            for sheet in &sheets {
                insert_sheet(&tx, sheet)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn board(&self, id: BoardId) -> StoreResult<Board> {
        self.run(move |conn| load_board(conn, id)).await
    }

    async fn delete_board(&self, id: BoardId) -> StoreResult<()> {
        self.run(move |conn| {
            let deleted = conn.execute("DELETE FROM boards WHERE id = ?1", params![id.to_string()])?;
            if deleted == 0 {
                return Err(StoreError::BoardNotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn active_boards(&self) -> StoreResult<Vec<BoardId>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT b.id FROM boards b \
                 JOIN sheets s ON s.board_id = b.id \
                 WHERE b.started_at IS NOT NULL AND s.finished = 0 \
                 ORDER BY b.id",
            )?;
            let mut boards = Vec::new();
            for raw in stmt.query_map([], |row| row.get::<_, String>(0))? {
                boards.push(parse_board_id(&raw?)?);
            }
            Ok(boards)
        })
        .await
    }

    async fn admit_participant(&self, request: AdmitRequest) -> StoreResult<Admission> {
        self.run(move |conn| {
            let tx = write_tx(conn)?;
            let board_key = request.board_id.to_string();

            let (capacity, started_at, next_seq): (u8, Option<DateTime<Utc>>, u32) = tx
                .query_row(
                    "SELECT max_participants, started_at, next_seq FROM boards WHERE id = ?1",
                    params![board_key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?
                .ok_or(StoreError::BoardNotFound(request.board_id))?;

            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {PARTICIPANT_COLUMNS} FROM participants \
                         WHERE board_id = ?1 AND identity = ?2"
                    ),
                    params![board_key, request.identity.as_str()],
                    ParticipantRow::read,
                )
                .optional()?;
            if let Some(row) = existing {
                return Ok(Admission::Existing(row.decode()?));
            }
            if started_at.is_some() {
                return Ok(Admission::Started);
            }

            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM participants WHERE board_id = ?1",
                params![board_key],
                |row| row.get(0),
            )?;
            if count >= i64::from(capacity) {
                return Ok(Admission::Full { capacity });
            }

            tx.execute(
                &format!(
                    "INSERT INTO participants ({PARTICIPANT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"
                ),
                params![
                    board_key,
                    request.identity.as_str(),
                    request.display_name,
                    next_seq,
                    request.joined_at,
                ],
            )?;
            tx.execute(
                "UPDATE boards SET next_seq = next_seq + 1 WHERE id = ?1",
                params![board_key],
            )?;
            tx.commit()?;

            Ok(Admission::Admitted(Participant {
                board_id: request.board_id,
                identity: request.identity,
                display_name: request.display_name,
                seq: next_seq,
                joined_at: request.joined_at,
            }))
        })
        .await
    }

    async fn participants(&self, board: BoardId) -> StoreResult<Vec<Participant>> {
        self.run(move |conn| {
            board_exists(conn, board)?;
            load_participants(conn, board)
        })
        .await
    }

    async fn participant_count(&self, board: BoardId) -> StoreResult<usize> {
        self.run(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT (SELECT COUNT(*) FROM participants WHERE board_id = ?1) \
                     FROM boards WHERE id = ?1",
                    params![board.to_string()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StoreError::BoardNotFound(board))?;
            usize::try_from(count).map_err(|_| StoreError::Corrupt("negative count".to_string()))
        })
        .await
    }

    async fn remove_participant(&self, board: BoardId, identity: &Identity) -> StoreResult<bool> {
        let identity = identity.clone();
        self.run(move |conn| {
            let tx = write_tx(conn)?;
            board_exists(&tx, board)?;
            let board_key = board.to_string();

            let removed = tx.execute(
                "DELETE FROM participants WHERE board_id = ?1 AND identity = ?2",
                params![board_key, identity.as_str()],
            )?;
            tx.execute(
                "DELETE FROM contributions WHERE author = ?2 \
                 AND sheet_id IN (SELECT id FROM sheets WHERE board_id = ?1)",
                params![board_key, identity.as_str()],
            )?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    async fn start_board(
        &self,
        board: BoardId,
        started_at: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> StoreResult<StartOutcome> {
        self.run(move |conn| {
            let tx = write_tx(conn)?;
            let record = load_board(&tx, board)?;
            let participants = load_participants(&tx, board)?;
            let existing = load_sheets(&tx, board)?;

            let planned = match plan_start(&record, &participants, &existing, lease_expires_at) {
                Ok(sheets) => sheets,
                Err(StartRejection::AlreadyStarted) => return Ok(StartOutcome::AlreadyStarted),
                Err(StartRejection::NotEnoughParticipants { required, actual }) => {
                    return Ok(StartOutcome::NotEnoughParticipants { required, actual })
                }
                Err(StartRejection::MissingSheet) => {
                    return Err(StoreError::Corrupt(format!("board {board} has no sheet")))
                }
            };

            for sheet in &planned {
                if existing.iter().any(|s| s.id == sheet.id) {
                    let (holder, expires_at, finished) = lease_columns(&sheet.lease);
                    tx.execute(
                        "UPDATE sheets SET rotation = ?2, holder = ?3, expires_at = ?4, \
                         finished = ?5, lease_version = ?6 WHERE id = ?1",
                        params![
                            sheet.id.to_string(),
                            serde_json::to_string(&sheet.rotation)?,
                            holder,
                            expires_at,
                            finished,
                            version_param(sheet.lease_version)?,
                        ],
                    )?;
                } else {
                    insert_sheet(&tx, sheet)?;
                }
            }
            tx.execute(
                "UPDATE boards SET started_at = ?2 WHERE id = ?1",
                params![board.to_string(), started_at],
            )?;
            tx.commit()?;
            Ok(StartOutcome::Started(planned))
        })
        .await
    }

    async fn sheets(&self, board: BoardId) -> StoreResult<Vec<Sheet>> {
        self.run(move |conn| {
            board_exists(conn, board)?;
            load_sheets(conn, board)
        })
        .await
    }

    async fn sheet(&self, id: SheetId) -> StoreResult<Sheet> {
        self.run(move |conn| load_sheet(conn, id)).await
    }

    async fn swap_lease(
        &self,
        sheet: SheetId,
        expected_version: u64,
        next: LeaseState,
    ) -> StoreResult<Option<Sheet>> {
        self.run(move |conn| {
            let tx = write_tx(conn)?;
            let (holder, expires_at, finished) = lease_columns(&next);
            let updated = tx.execute(
                "UPDATE sheets SET holder = ?2, expires_at = ?3, finished = ?4, \
                 lease_version = lease_version + 1 \
                 WHERE id = ?1 AND lease_version = ?5 AND finished = 0",
                params![
                    sheet.to_string(),
                    holder,
                    expires_at,
                    finished,
                    version_param(expected_version)?,
                ],
            )?;
            // Distinguish a lost race from an unknown sheet
            let current = load_sheet(&tx, sheet)?;
            tx.commit()?;
            Ok((updated == 1).then_some(current))
        })
        .await
    }

    async fn upsert_contribution(&self, contribution: Contribution) -> StoreResult<Contribution> {
        self.run(move |conn| {
            let tx = write_tx(conn)?;
            let sheet_key = contribution.sheet_id.to_string();
            load_sheet(&tx, contribution.sheet_id)?;

            let occupant: Option<(String, DateTime<Utc>)> = tx
                .query_row(
                    "SELECT author, created_at FROM contributions \
                     WHERE sheet_id = ?1 AND row_index = ?2",
                    params![sheet_key, contribution.row],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if let Some((author, _)) = &occupant {
                if author != contribution.author.as_str() {
                    return Err(StoreError::Conflict(format!(
                        "row {} belongs to {author}",
                        contribution.row
                    )));
                }
            }
            let elsewhere: Option<u32> = tx
                .query_row(
                    "SELECT row_index FROM contributions \
                     WHERE sheet_id = ?1 AND author = ?2 AND row_index != ?3",
                    params![sheet_key, contribution.author.as_str(), contribution.row],
                    |row| row.get(0),
                )
                .optional()?;
            if elsewhere.is_some() {
                return Err(StoreError::Conflict(format!(
                    "{} already wrote on this sheet",
                    contribution.author
                )));
            }

            let stored = match occupant {
                Some((_, created_at)) => Contribution {
                    created_at,
                    ..contribution
                },
                None => contribution,
            };
            tx.execute(
                &format!(
                    "INSERT INTO contributions ({CONTRIBUTION_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT (sheet_id, row_index) DO UPDATE SET \
                     cells = excluded.cells, blank = excluded.blank, \
                     updated_at = excluded.updated_at"
                ),
                params![
                    sheet_key,
                    stored.author.as_str(),
                    stored.row,
                    serde_json::to_string(&stored.values)?,
                    stored.blank,
                    stored.created_at,
                    stored.updated_at,
                ],
            )?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn contributions(&self, sheet: SheetId) -> StoreResult<Vec<Contribution>> {
        self.run(move |conn| {
            load_sheet(conn, sheet)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONTRIBUTION_COLUMNS} FROM contributions \
                 WHERE sheet_id = ?1 ORDER BY row_index"
            ))?;
            let mut contributions = Vec::new();
            for row in stmt.query_map(params![sheet.to_string()], ContributionRow::read)? {
                contributions.push(row?.decode()?);
            }
            Ok(contributions)
        })
        .await
    }
}
