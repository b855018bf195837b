// Execution Events
// Progress reporting for matrix runs

use crate::execution::result::{CellStatus, StepStatus};

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during a matrix run.
///
/// Cells may start, finish and report out of matrix order; every event
/// carries the cell id so results stay attributable.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run started after validation and matrix expansion
    RunStarted {
        run_name: String,
        total_cells: usize,
    },

    /// Run completed (all cells attempted)
    RunCompleted {
        run_name: String,
        success: bool,
        duration: Duration,
    },

    /// A cell's pipeline started
    CellStarted {
        cell_id: String,
        total_steps: usize,
    },

    /// A cell's pipeline completed
    CellCompleted {
        cell_id: String,
        status: CellStatus,
        duration: Duration,
    },

    /// Cache entry restored into the cell's working scope
    CacheRestored {
        cell_id: String,
        key: String,
        exact: bool,
    },

    /// No cache entry matched; the pipeline proceeds from scratch
    CacheMissed { cell_id: String, key: String },

    /// Cache entry saved after a successful pipeline
    CacheSaved { cell_id: String, key: String },

    /// Step execution started
    StepStarted {
        cell_id: String,
        step_name: String,
        step_index: usize,
    },

    /// Step output line (stdout/stderr)
    StepOutput {
        cell_id: String,
        step_name: String,
        step_index: usize,
        output: String,
        is_error: bool,
    },

    /// Step execution completed
    StepCompleted {
        cell_id: String,
        step_name: String,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    },

    /// Step was skipped (condition false, or an earlier step failed)
    StepSkipped {
        cell_id: String,
        step_name: String,
        step_index: usize,
        reason: String,
    },

    /// An artifact was collected for a successful cell
    ArtifactCollected {
        cell_id: String,
        name: String,
        path: PathBuf,
    },

    /// Non-fatal problem (cache I/O fault, panicked cell task)
    Warning {
        message: String,
        cell_id: Option<String>,
    },
}

impl ExecutionEvent {
    pub fn run_started(name: impl Into<String>, total_cells: usize) -> Self {
        Self::RunStarted {
            run_name: name.into(),
            total_cells,
        }
    }

    pub fn run_completed(name: impl Into<String>, success: bool, duration: Duration) -> Self {
        Self::RunCompleted {
            run_name: name.into(),
            success,
            duration,
        }
    }

    pub fn cell_started(cell_id: impl Into<String>, total_steps: usize) -> Self {
        Self::CellStarted {
            cell_id: cell_id.into(),
            total_steps,
        }
    }

    pub fn cell_completed(
        cell_id: impl Into<String>,
        status: CellStatus,
        duration: Duration,
    ) -> Self {
        Self::CellCompleted {
            cell_id: cell_id.into(),
            status,
            duration,
        }
    }

    pub fn step_started(
        cell_id: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
    ) -> Self {
        Self::StepStarted {
            cell_id: cell_id.into(),
            step_name: step_name.into(),
            step_index,
        }
    }

    pub fn step_completed(
        cell_id: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    ) -> Self {
        Self::StepCompleted {
            cell_id: cell_id.into(),
            step_name: step_name.into(),
            step_index,
            status,
            duration,
            exit_code,
        }
    }

    pub fn step_skipped(
        cell_id: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::StepSkipped {
            cell_id: cell_id.into(),
            step_name: step_name.into(),
            step_index,
            reason: reason.into(),
        }
    }

    pub fn warning(message: impl Into<String>, cell_id: Option<String>) -> Self {
        Self::Warning {
            message: message.into(),
            cell_id,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
