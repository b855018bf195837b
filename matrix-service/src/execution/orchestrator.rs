// Matrix Orchestrator
// Expands the matrix and drives cell pipelines with bounded parallelism

use crate::cache::CacheStore;
use crate::execution::context::CellContext;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::pipeline::CellPipeline;
use crate::execution::result::{ArtifactCollision, CellResult, CellStatus, RunResult};
use crate::matrix::MatrixExpander;
use crate::spec::models::RunSpec;
use crate::spec::validate::{validate, MatrixConfigError};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

/// Configuration for a matrix run
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root under which every cell gets its working directory
    pub run_root: PathBuf,
    /// Source checkout, used for cache key file hashing
    pub source_dir: PathBuf,
    /// Cache store root (default: `<run_root>/.cache`)
    pub cache_dir: Option<PathBuf>,
    /// Worker limit override (default: the spec's concurrency, else one
    /// worker per cell)
    pub max_workers: Option<usize>,
}

/// Drives a full matrix run: validation, expansion, bounded parallel cell
/// execution and result aggregation.
///
/// Cells are isolated: one failing never stops the others, and results
/// come back in matrix order regardless of completion order.
pub struct Orchestrator {
    spec: Arc<RunSpec>,
    config: OrchestratorConfig,
    events: Option<ProgressSender>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Orchestrator {
    pub fn new(spec: RunSpec, config: OrchestratorConfig) -> Self {
        Self {
            spec: Arc::new(spec),
            config,
            events: None,
            cancel: None,
        }
    }

    pub fn with_progress(mut self, events: ProgressSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub async fn execute(&self) -> Result<RunResult, MatrixConfigError> {
        validate(&self.spec)?;

        let start = Instant::now();
        let cells = MatrixExpander::expand(&self.spec.matrix);

        self.events
            .send_event(ExecutionEvent::run_started(&self.spec.name, cells.len()));

        if cells.is_empty() {
            self.events.send_event(ExecutionEvent::warning(
                "matrix expands to zero cells; nothing to run",
                None,
            ));
        }

        let workers = self
            .config
            .max_workers
            .or(self.spec.concurrency)
            .unwrap_or(cells.len())
            .max(1);
        let semaphore = Arc::new(Semaphore::new(workers));

        let cache_dir = self
            .config
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.config.run_root.join(".cache"));

        let mut tasks: JoinSet<(usize, CellResult)> = JoinSet::new();
        for (index, cell) in cells.iter().cloned().enumerate() {
            let spec = Arc::clone(&self.spec);
            let semaphore = Arc::clone(&semaphore);
            let events = self.events.clone();
            let cancel = self.cancel.clone();
            let ctx = CellContext::new(
                cell,
                &self.config.run_root,
                &self.config.source_dir,
                &spec.env,
            );
            let cache = spec
                .cache
                .as_ref()
                .map(|c| CacheStore::new(cache_dir.clone(), c.namespace.clone()).strict(c.strict));

            tasks.spawn(async move {
                // A cancel while queued skips the pipeline entirely
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = crate::execution::wait_cancelled(cancel.clone()) => {
                        let result = CellResult {
                            cell: ctx.cell.clone(),
                            status: CellStatus::Cancelled,
                            steps: Vec::new(),
                            artifacts: Vec::new(),
                            duration: Duration::ZERO,
                            failed_step: None,
                        };
                        return (index, result);
                    }
                };

                let mut pipeline = CellPipeline::new(spec, ctx, cache);
                if let Some(events) = events {
                    pipeline = pipeline.with_progress(events);
                }
                if let Some(cancel) = cancel {
                    pipeline = pipeline.with_cancel(cancel);
                }
                (index, pipeline.execute().await)
            });
        }

        let mut slots: Vec<Option<CellResult>> = vec![None; cells.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => {
                    self.events.send_event(ExecutionEvent::warning(
                        format!("cell task failed: {}", e),
                        None,
                    ));
                }
            }
        }

        let results: Vec<CellResult> = slots
            .into_iter()
            .zip(cells)
            .map(|(slot, cell)| {
                slot.unwrap_or_else(|| CellResult {
                    cell,
                    status: CellStatus::Failed,
                    steps: Vec::new(),
                    artifacts: Vec::new(),
                    duration: Duration::ZERO,
                    failed_step: None,
                })
            })
            .collect();

        let collisions = find_collisions(&results);
        for collision in &collisions {
            self.events.send_event(ExecutionEvent::warning(
                format!(
                    "artifact name '{}' produced by both cell '{}' and cell '{}'",
                    collision.name, collision.first_cell, collision.second_cell
                ),
                None,
            ));
        }

        let run = RunResult {
            cells: results,
            collisions,
            duration: start.elapsed(),
        };

        self.events.send_event(ExecutionEvent::run_completed(
            &self.spec.name,
            run.success(),
            run.duration,
        ));

        Ok(run)
    }
}

/// Scan collected artifacts in matrix order for duplicate names across
/// cells
fn find_collisions(results: &[CellResult]) -> Vec<ArtifactCollision> {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    let mut collisions = Vec::new();
    for result in results {
        for artifact in &result.artifacts {
            match owners.get(artifact.name.as_str()) {
                Some(first) if *first != artifact.cell_id.as_str() => {
                    collisions.push(ArtifactCollision {
                        name: artifact.name.clone(),
                        first_cell: first.to_string(),
                        second_cell: artifact.cell_id.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    owners.insert(&artifact.name, &artifact.cell_id);
                }
            }
        }
    }
    collisions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::parser::SpecParser;
    use tempfile::TempDir;

    fn orchestrator(yaml: &str, root: &std::path::Path) -> Orchestrator {
        let spec = SpecParser::parse_str(yaml).unwrap();
        Orchestrator::new(
            spec,
            OrchestratorConfig {
                run_root: root.to_path_buf(),
                source_dir: root.to_path_buf(),
                cache_dir: None,
                max_workers: None,
            },
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_all_cells_run_in_matrix_order() {
        let root = TempDir::new().unwrap();
        let run = orchestrator(
            r#"
name: release
matrix:
  arch: [x64, x86]
  libtorrent: ["2.0.5", "1.2.15"]
steps:
  - name: build
    run: "echo building {arch} lt={libtorrent}"
"#,
            root.path(),
        )
        .execute()
        .await
        .unwrap();

        assert!(run.success());
        let ids: Vec<String> = run.cells.iter().map(|c| c.cell.id()).collect();
        assert_eq!(
            ids,
            vec!["x64-2.0.5", "x64-1.2.15", "x86-2.0.5", "x86-1.2.15"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_one_failing_cell_does_not_stop_the_rest() {
        let root = TempDir::new().unwrap();
        let run = orchestrator(
            r#"
name: release
matrix:
  arch: [x64, x86]
steps:
  - name: fail on x86
    run: "exit 1"
    condition: "arch == 'x86'"
  - name: build
    run: "echo ok > pkg.txt"
    outputs: ["pkg.txt"]
"#,
            root.path(),
        )
        .execute()
        .await
        .unwrap();

        assert!(!run.success());
        assert_eq!(run.succeeded_count(), 1);
        assert_eq!(run.failed_count(), 1);

        // The surviving cell still collected its artifact
        assert_eq!(run.artifacts().count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_spec_is_rejected_before_execution() {
        let root = TempDir::new().unwrap();
        let err = orchestrator(
            r#"
name: release
matrix:
  arch: [x64, x64]
steps:
  - name: build
    run: make
"#,
            root.path(),
        )
        .execute()
        .await
        .unwrap_err();

        assert!(matches!(err, MatrixConfigError::DuplicateValue { .. }));
    }

    #[tokio::test]
    async fn test_empty_axis_completes_with_zero_cells() {
        let root = TempDir::new().unwrap();
        let run = orchestrator(
            r#"
name: release
matrix:
  arch: []
steps:
  - name: build
    run: make
"#,
            root.path(),
        )
        .execute()
        .await
        .unwrap();

        assert!(run.cells.is_empty());
        assert!(run.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_worker_limit_bounds_parallelism() {
        let root = TempDir::new().unwrap();
        let spec = SpecParser::parse_str(
            r#"
name: release
matrix:
  arch: [a, b, c, d]
concurrency: 1
steps:
  - name: mark
    run: "echo ran > mark.txt"
    outputs: ["mark.txt"]
"#,
        )
        .unwrap();
        let run = Orchestrator::new(
            spec,
            OrchestratorConfig {
                run_root: root.path().to_path_buf(),
                source_dir: root.path().to_path_buf(),
                cache_dir: None,
                max_workers: None,
            },
        )
        .execute()
        .await
        .unwrap();

        assert!(run.success());
        assert_eq!(run.cells.len(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_cancels_pending_cells() {
        let root = TempDir::new().unwrap();
        let spec = SpecParser::parse_str(
            r#"
name: release
matrix:
  arch: [a, b, c]
concurrency: 1
steps:
  - name: wait
    run: "sleep 5"
"#,
        )
        .unwrap();

        let (tx, rx) = watch::channel(false);
        let orchestrator = Orchestrator::new(
            spec,
            OrchestratorConfig {
                run_root: root.path().to_path_buf(),
                source_dir: root.path().to_path_buf(),
                cache_dir: None,
                max_workers: None,
            },
        )
        .with_cancel(rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(true);
        });

        let run = tokio::time::timeout(Duration::from_secs(10), orchestrator.execute())
            .await
            .unwrap()
            .unwrap();

        assert!(!run.success());
        assert!(run
            .cells
            .iter()
            .all(|cell| cell.status == CellStatus::Cancelled));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_events_cover_the_run() {
        let root = TempDir::new().unwrap();
        let spec = SpecParser::parse_str(
            r#"
name: release
matrix:
  arch: [x64]
steps:
  - name: build
    run: "echo hi"
"#,
        )
        .unwrap();

        let (tx, mut rx) = crate::execution::events::progress_channel();
        let run = Orchestrator::new(
            spec,
            OrchestratorConfig {
                run_root: root.path().to_path_buf(),
                source_dir: root.path().to_path_buf(),
                cache_dir: None,
                max_workers: None,
            },
        )
        .with_progress(tx)
        .execute()
        .await
        .unwrap();
        assert!(run.success());

        let mut saw_run_started = false;
        let mut saw_step_completed = false;
        let mut saw_run_completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                ExecutionEvent::RunStarted { total_cells, .. } => {
                    assert_eq!(total_cells, 1);
                    saw_run_started = true;
                }
                ExecutionEvent::StepCompleted { .. } => saw_step_completed = true,
                ExecutionEvent::RunCompleted { success, .. } => {
                    assert!(success);
                    saw_run_completed = true;
                }
                _ => {}
            }
        }
        assert!(saw_run_started);
        assert!(saw_step_completed);
        assert!(saw_run_completed);
    }
}
