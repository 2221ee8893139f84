//! Simulator reports

use serde::Serialize;
use std::fmt::Write as _;

/// Broken guarantee observed during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Short machine-friendly category
    pub kind: &'static str,
    /// What was observed
    pub detail: String,
}

impl Violation {
    pub(crate) fn new(kind: &'static str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Counters from a seeded session
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Rows written by participants
    pub submissions: u64,
    /// Out-of-turn writes that were correctly refused
    pub intrusions_denied: u64,
    /// Turns walked away from
    pub abandoned_turns: u64,
    /// Sweeps run
    pub sweeps: u64,
    /// Blank rows recorded by sweeps
    pub blanks: u64,
    /// Participants removed by sweeps
    pub purged: u64,
    /// Simulation steps taken
    pub steps: u64,
}

/// Result of `simulate`
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// RNG seed
    pub seed: u64,
    /// Participants joined
    pub participants: usize,
    /// Probability a holder walks away from a turn
    pub abandon_rate: f64,
    /// Abandonment policy in force
    pub policy: String,
    /// Board reached completion
    pub complete: bool,
    /// Counters
    pub stats: SessionStats,
    /// Broken guarantees
    pub violations: Vec<Violation>,
}

impl SessionReport {
    /// No guarantee was broken
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Brainwrite Session Report ===\n");
        let _ = writeln!(out, "Seed: {}", self.seed);
        let _ = writeln!(out, "Participants: {}", self.participants);
        let _ = writeln!(out, "Abandon Rate: {:.2}", self.abandon_rate);
        let _ = writeln!(out, "Policy: {}", self.policy);
        let _ = writeln!(out, "Steps: {}", self.stats.steps);
        let _ = writeln!(out, "Submissions: {}", self.stats.submissions);
        let _ = writeln!(out, "Intrusions Denied: {}", self.stats.intrusions_denied);
        let _ = writeln!(out, "Abandoned Turns: {}", self.stats.abandoned_turns);
        let _ = writeln!(out, "Sweeps: {}", self.stats.sweeps);
        let _ = writeln!(out, "Blank Rows: {}", self.stats.blanks);
        let _ = writeln!(out, "Purged: {}", self.stats.purged);
        let _ = writeln!(out, "Complete: {}", self.complete);
        write_verdict(&mut out, &self.violations);
        out
    }
}

/// Result of `stress`
#[derive(Debug, Clone, Default, Serialize)]
pub struct StressReport {
    /// Boards driven concurrently
    pub boards: usize,
    /// Join attempts per board
    pub joiners: usize,
    /// Participants admitted across all boards
    pub admitted: usize,
    /// Joins refused because the board was full
    pub rejected_full: usize,
    /// Lease races run
    pub lease_races: usize,
    /// Out-of-turn writes correctly refused
    pub intrusions_denied: usize,
    /// Boards that reached completion
    pub completed_boards: usize,
    /// Wall time
    pub elapsed_ms: u128,
    /// Broken guarantees
    pub violations: Vec<Violation>,
}

impl StressReport {
    /// No guarantee was broken
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Brainwrite Stress Report ===\n");
        let _ = writeln!(out, "Boards: {}", self.boards);
        let _ = writeln!(out, "Joiners per Board: {}", self.joiners);
        let _ = writeln!(out, "Admitted: {}", self.admitted);
        let _ = writeln!(out, "Rejected (full): {}", self.rejected_full);
        let _ = writeln!(out, "Lease Races: {}", self.lease_races);
        let _ = writeln!(out, "Intrusions Denied: {}", self.intrusions_denied);
        let _ = writeln!(out, "Completed Boards: {}", self.completed_boards);
        let _ = writeln!(out, "Elapsed: {} ms", self.elapsed_ms);
        write_verdict(&mut out, &self.violations);
        out
    }
}

fn write_verdict(out: &mut String, violations: &[Violation]) {
    let _ = writeln!(out, "Violations: {}", violations.len());
    for v in violations.iter().take(20) {
        let _ = writeln!(out, "  [{}] {}", v.kind, v.detail);
    }
    if violations.len() > 20 {
        let _ = writeln!(out, "  ... and {} more", violations.len() - 20);
    }
    let _ = writeln!(
        out,
        "\nResult: {}",
        if violations.is_empty() { "PASSED" } else { "FAILED" }
    );
}
