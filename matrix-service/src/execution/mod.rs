// Execution Engine Module
// Orchestrates per-cell pipelines over the expanded matrix

pub mod context;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod result;

pub use context::CellContext;
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use pipeline::CellPipeline;
pub use result::{
    ArtifactCollision, CellResult, CellStatus, RunResult, StepResult, StepStatus,
};

use tokio::sync::watch;

/// Resolves once the cancel signal fires; pends forever without one.
pub(crate) async fn wait_cancelled(rx: Option<watch::Receiver<bool>>) {
    match rx {
        Some(mut rx) => {
            if *rx.borrow() {
                return;
            }
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return;
                }
            }
            std::future::pending().await
        }
        None => std::future::pending().await,
    }
}
