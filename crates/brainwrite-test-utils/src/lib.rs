//! Testing utilities for the Brainwrite workspace
//!
//! Shared harnesses, fixtures, a recording notifier and a store that fails
//! on request.

#![allow(missing_docs)]

use async_trait::async_trait;
use brainwrite_coordinator::{
    BoardCoordinator, BoardEvent, CoordinatorConfig, Notifier, NotifyError,
};
use brainwrite_model::{
    Board, BoardId, BoardLayout, BoardSpec, Clock, Contribution, Identity, LeaseState,
    ManualClock, Participant, Sheet, SheetId, DEFAULT_COLUMNS,
};
use brainwrite_store::{
    AdmitRequest, Admission, BoardStore, MemoryStore, SqliteStore, StartOutcome, StoreError,
    StoreResult,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const OWNER: &str = "owner";

/// Notifier that keeps every event it is given
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<BoardEvent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail (events are still recorded)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<BoardEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Event names in publish order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(event_kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, event: BoardEvent) -> Result<(), NotifyError> {
        self.events.lock().push(event);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("recording notifier set to fail".into()));
        }
        Ok(())
    }
}

pub fn event_kind(event: &BoardEvent) -> &'static str {
    match event {
        BoardEvent::ParticipantJoined { .. } => "participant_joined",
        BoardEvent::RoundStarted { .. } => "round_started",
        BoardEvent::SheetRotated { .. } => "sheet_rotated",
        BoardEvent::SheetCompleted { .. } => "sheet_completed",
        BoardEvent::BoardCompleted { .. } => "board_completed",
    }
}

/// In-memory store that fails selected calls once
///
/// Everything else goes straight to a [`MemoryStore`].
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_swap_after_upsert: AtomicBool,
    fail_next_swap: AtomicBool,
    fail_next_upsert: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first lease swap after the next stored row, i.e. the
    /// hand-off of a submit
    pub fn fail_hand_off_once(&self) {
        self.fail_swap_after_upsert.store(true, Ordering::SeqCst);
    }

    /// Fail the next row write
    pub fn fail_next_upsert(&self) {
        self.fail_next_upsert.store(true, Ordering::SeqCst);
    }

    fn outage(call: &str) -> StoreError {
        StoreError::Unavailable(format!("injected failure in {call}"))
    }
}

#[async_trait]
impl BoardStore for FlakyStore {
    async fn insert_board(&self, board: Board, sheets: Vec<Sheet>) -> StoreResult<()> {
        self.inner.insert_board(board, sheets).await
    }

    async fn board(&self, id: BoardId) -> StoreResult<Board> {
        self.inner.board(id).await
    }

    async fn delete_board(&self, id: BoardId) -> StoreResult<()> {
        self.inner.delete_board(id).await
    }

    async fn active_boards(&self) -> StoreResult<Vec<BoardId>> {
        self.inner.active_boards().await
    }

    async fn admit_participant(&self, request: AdmitRequest) -> StoreResult<Admission> {
        self.inner.admit_participant(request).await
    }

    async fn participants(&self, board: BoardId) -> StoreResult<Vec<Participant>> {
        self.inner.participants(board).await
    }

    async fn participant_count(&self, board: BoardId) -> StoreResult<usize> {
        self.inner.participant_count(board).await
    }

    async fn remove_participant(&self, board: BoardId, identity: &Identity) -> StoreResult<bool> {
        self.inner.remove_participant(board, identity).await
    }

    async fn start_board(
        &self,
        board: BoardId,
        started_at: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> StoreResult<StartOutcome> {
        self.inner.start_board(board, started_at, lease_expires_at).await
    }

    async fn sheets(&self, board: BoardId) -> StoreResult<Vec<Sheet>> {
        self.inner.sheets(board).await
    }

    async fn sheet(&self, id: SheetId) -> StoreResult<Sheet> {
        self.inner.sheet(id).await
    }

    async fn swap_lease(
        &self,
        sheet: SheetId,
        expected_version: u64,
        next: LeaseState,
    ) -> StoreResult<Option<Sheet>> {
        if self.fail_next_swap.swap(false, Ordering::SeqCst) {
            return Err(Self::outage("swap_lease"));
        }
        self.inner.swap_lease(sheet, expected_version, next).await
    }

    async fn upsert_contribution(&self, contribution: Contribution) -> StoreResult<Contribution> {
        if self.fail_next_upsert.swap(false, Ordering::SeqCst) {
            return Err(Self::outage("upsert_contribution"));
        }
        let stored = self.inner.upsert_contribution(contribution).await?;
        if self.fail_swap_after_upsert.swap(false, Ordering::SeqCst) {
            self.fail_next_swap.store(true, Ordering::SeqCst);
        }
        Ok(stored)
    }

    async fn contributions(&self, sheet: SheetId) -> StoreResult<Vec<Contribution>> {
        self.inner.contributions(sheet).await
    }
}

/// Coordinator wired to a manual clock and a recording notifier
#[derive(Debug, Clone)]
pub struct Harness {
    pub coordinator: BoardCoordinator,
    pub clock: Arc<ManualClock>,
    pub store: Arc<dyn BoardStore>,
    pub events: Arc<RecordingNotifier>,
    /// Set when backed by [`MemoryStore`], for fault injection
    pub memory: Option<Arc<MemoryStore>>,
}

pub fn setup_harness() -> Harness {
    setup_harness_with(CoordinatorConfig::default())
}

pub fn setup_harness_with(config: CoordinatorConfig) -> Harness {
    let memory = Arc::new(MemoryStore::new());
    let mut harness = setup_harness_on(memory.clone(), config);
    harness.memory = Some(memory);
    harness
}

pub fn setup_sqlite_harness(path: impl AsRef<Path>, config: CoordinatorConfig) -> Harness {
    let store = SqliteStore::open(path.as_ref()).unwrap();
    setup_harness_on(Arc::new(store), config)
}

/// Harness over a [`FlakyStore`], returned alongside for arming failures
pub fn setup_flaky_harness(config: CoordinatorConfig) -> (Harness, Arc<FlakyStore>) {
    let flaky = Arc::new(FlakyStore::new());
    (setup_harness_on(flaky.clone(), config), flaky)
}

pub fn setup_harness_on(store: Arc<dyn BoardStore>, config: CoordinatorConfig) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let events = Arc::new(RecordingNotifier::new());
    let coordinator = BoardCoordinator::new(store.clone(), clock.clone(), config)
        .unwrap()
        .with_notifier(events.clone());
    Harness {
        coordinator,
        clock,
        store,
        events,
        memory: None,
    }
}

impl Harness {
    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }

    /// Move the clock past the configured lease TTL
    pub fn expire_leases(&self) {
        self.clock
            .advance(self.coordinator.config().lease_ttl() + chrono::Duration::seconds(1));
    }

    pub async fn board_with(&self, names: &[&str], layout: BoardLayout) -> Board {
        let spec = BoardSpec::new(OWNER, "test board").with_layout(layout);
        let board = self.coordinator.create_board(spec).await.unwrap();
        for name in names {
            self.coordinator
                .join(board.id, &Identity::new(*name), &name.to_uppercase())
                .await
                .unwrap();
        }
        board
    }

    pub async fn team_board(&self, names: &[&str]) -> Board {
        self.board_with(names, BoardLayout::Team).await
    }

    /// Team board with `names` joined in order and started by the owner
    pub async fn started_team_board(&self, names: &[&str]) -> (Board, Vec<Sheet>) {
        let board = self.team_board(names).await;
        let sheets = self
            .coordinator
            .start_board(board.id, &Identity::new(OWNER))
            .await
            .unwrap();
        (board, sheets)
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

/// Row with `text` in the first column and the rest blank
pub fn row(text: &str) -> Vec<Option<String>> {
    row_with(text, DEFAULT_COLUMNS)
}

pub fn row_with(text: &str, columns: u8) -> Vec<Option<String>> {
    let mut values = vec![None; usize::from(columns)];
    if let Some(first) = values.first_mut() {
        *first = Some(text.to_string());
    }
    values
}

pub fn ids(names: &[&str]) -> Vec<Identity> {
    names.iter().map(|n| Identity::new(*n)).collect()
}
