// Matrix Service Library
// Core library for build matrix expansion and per-cell pipeline execution

pub mod artifacts;
pub mod cache;
pub mod condition;
pub mod execution;
pub mod matrix;
pub mod runners;
pub mod spec;

// Re-export matrix types
pub use matrix::{Cell, MatrixAxis, MatrixExpander, TemplateError};

// Re-export spec types
pub use spec::{
    validate, CacheSpec, MatrixConfigError, RunSpec, SpecError, SpecErrorKind, SpecParser,
    StepSpec,
};

// Re-export condition types
pub use condition::{evaluate_condition, Condition, ConditionError, EvalError};

// Re-export execution types
pub use execution::{
    progress_channel, ArtifactCollision, CellContext, CellPipeline, CellResult, CellStatus,
    ExecutionEvent, Orchestrator, OrchestratorConfig, ProgressReceiver, ProgressSender,
    RunResult, StepResult, StepStatus,
};

// Re-export cache types
pub use cache::{CacheConfig, CacheError, CacheStore, Restore};

// Re-export artifact types
pub use artifacts::{write_manifest, ArtifactCollector, ArtifactError, ArtifactRecord};

// Re-export runner types
pub use runners::{OutputCallback, ShellConfig, ShellOutput, ShellRunner};
