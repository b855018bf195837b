// Execution Results
// Per-step, per-cell and run-level outcomes

use crate::artifacts::ArtifactRecord;
use crate::matrix::Cell;

use std::time::Duration;

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
    Cancelled,
}

impl StepStatus {
    /// Timeouts share failure's abort semantics
    pub fn is_failure(&self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::TimedOut)
    }
}

/// Result of one step within a cell's pipeline
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step_name: String,
    pub status: StepStatus,
    pub output: String,
    pub error: Option<String>,
    pub duration: Duration,
    pub exit_code: Option<i32>,
}

impl StepResult {
    pub fn skipped(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            status: StepStatus::Skipped,
            output: String::new(),
            error: None,
            duration: Duration::ZERO,
            exit_code: None,
        }
    }
}

/// Outcome of one cell's pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Result of one cell's pipeline; success iff every non-skipped step
/// succeeded
#[derive(Debug, Clone)]
pub struct CellResult {
    pub cell: Cell,
    pub status: CellStatus,
    pub steps: Vec<StepResult>,
    pub artifacts: Vec<ArtifactRecord>,
    pub duration: Duration,
    /// Name of the step that aborted the pipeline, if any
    pub failed_step: Option<String>,
}

/// Two cells produced the same artifact name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCollision {
    pub name: String,
    pub first_cell: String,
    pub second_cell: String,
}

/// Aggregated result of a matrix run.
///
/// Cells appear in matrix order regardless of completion order. The run
/// failed if any cell failed, but every cell still attempted completion.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub cells: Vec<CellResult>,
    pub collisions: Vec<ArtifactCollision>,
    pub duration: Duration,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.collisions.is_empty()
            && self
                .cells
                .iter()
                .all(|cell| cell.status == CellStatus::Succeeded)
    }

    pub fn succeeded_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| cell.status == CellStatus::Succeeded)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| cell.status != CellStatus::Succeeded)
            .count()
    }

    pub fn failed_cells(&self) -> impl Iterator<Item = &CellResult> {
        self.cells
            .iter()
            .filter(|cell| cell.status != CellStatus::Succeeded)
    }

    /// Artifacts from every successful cell
    pub fn artifacts(&self) -> impl Iterator<Item = &ArtifactRecord> {
        self.cells.iter().flat_map(|cell| cell.artifacts.iter())
    }
}
