// Cell Pipeline
// Runs the step template for one cell: cache restore, conditional steps,
// cache save and artifact collection

use crate::artifacts::ArtifactCollector;
use crate::cache::{hash_files, CacheError, CacheStore, Restore};
use crate::condition::evaluate_condition;
use crate::execution::context::CellContext;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::result::{CellResult, CellStatus, StepResult, StepStatus};
use crate::runners::{OutputCallback, ShellConfig, ShellRunner};
use crate::spec::models::{RunSpec, StepSpec};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Executes the full pipeline for one cell.
///
/// A cell failure never propagates as an error: it is recorded in the
/// returned `CellResult` so sibling cells keep running.
pub struct CellPipeline {
    spec: Arc<RunSpec>,
    ctx: CellContext,
    cache: Option<CacheStore>,
    events: Option<ProgressSender>,
    cancel: Option<watch::Receiver<bool>>,
}

impl CellPipeline {
    pub fn new(spec: Arc<RunSpec>, ctx: CellContext, cache: Option<CacheStore>) -> Self {
        Self {
            spec,
            ctx,
            cache,
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

    pub async fn execute(self) -> CellResult {
        let start = Instant::now();
        let cell_id = self.ctx.cell.id();

        self.events
            .send_event(ExecutionEvent::cell_started(&cell_id, self.spec.steps.len()));

        if let Err(e) = std::fs::create_dir_all(&self.ctx.working_dir) {
            self.events.send_event(ExecutionEvent::warning(
                format!(
                    "failed to create working directory '{}': {}",
                    self.ctx.working_dir.display(),
                    e
                ),
                Some(cell_id.clone()),
            ));
            return self.finish(cell_id, CellStatus::Failed, Vec::new(), Vec::new(), None, start);
        }

        let cache_key = self.restore_cache(&cell_id);

        let mut steps: Vec<StepResult> = Vec::with_capacity(self.spec.steps.len());
        let mut failed_step: Option<String> = None;
        let mut cancelled = false;

        for (index, step) in self.spec.steps.iter().enumerate() {
            if cancelled || failed_step.is_some() {
                let reason = if cancelled {
                    "run cancelled".to_string()
                } else {
                    format!(
                        "earlier step '{}' failed",
                        failed_step.as_deref().unwrap_or_default()
                    )
                };
                self.events.send_event(ExecutionEvent::step_skipped(
                    &cell_id, &step.name, index, &reason,
                ));
                steps.push(StepResult::skipped(&step.name));
                continue;
            }

            if let Some(condition) = &step.condition {
                match evaluate_condition(condition, &self.ctx.cell) {
                    Ok(true) => {}
                    Ok(false) => {
                        let reason = format!("condition '{}' is false", condition);
                        self.events.send_event(ExecutionEvent::step_skipped(
                            &cell_id, &step.name, index, &reason,
                        ));
                        steps.push(StepResult::skipped(&step.name));
                        continue;
                    }
                    Err(e) => {
                        // Validation catches these up front, but conditions
                        // can still fail here when the pipeline is driven
                        // directly
                        self.events.send_event(ExecutionEvent::step_completed(
                            &cell_id,
                            &step.name,
                            index,
                            StepStatus::Failed,
                            Duration::ZERO,
                            None,
                        ));
                        failed_step = Some(step.name.clone());
                        steps.push(StepResult {
                            step_name: step.name.clone(),
                            status: StepStatus::Failed,
                            output: String::new(),
                            error: Some(format!("condition error: {}", e)),
                            duration: Duration::ZERO,
                            exit_code: None,
                        });
                        continue;
                    }
                }
            }

            let result = self.run_step(&cell_id, step, index).await;
            match result.status {
                StepStatus::Cancelled => cancelled = true,
                ref status if status.is_failure() => failed_step = Some(step.name.clone()),
                _ => {}
            }
            steps.push(result);
        }

        let status = if cancelled {
            CellStatus::Cancelled
        } else if failed_step.is_some() {
            CellStatus::Failed
        } else {
            CellStatus::Succeeded
        };

        if status != CellStatus::Succeeded {
            return self.finish(cell_id, status, steps, Vec::new(), failed_step, start);
        }

        if let Some(key) = cache_key {
            if let Err(result) = self.save_cache(&cell_id, &key) {
                failed_step = Some(result.step_name.clone());
                steps.push(result);
                return self.finish(cell_id, CellStatus::Failed, steps, Vec::new(), failed_step, start);
            }
        }

        match ArtifactCollector::collect(
            &self.spec.steps,
            self.spec.artifact_name.as_deref(),
            &self.ctx,
        ) {
            Ok(artifacts) => {
                for artifact in &artifacts {
                    self.events.send_event(ExecutionEvent::ArtifactCollected {
                        cell_id: cell_id.clone(),
                        name: artifact.name.clone(),
                        path: artifact.path.clone(),
                    });
                }
                self.finish(cell_id, CellStatus::Succeeded, steps, artifacts, None, start)
            }
            Err(e) => {
                steps.push(StepResult {
                    step_name: "collect artifacts".to_string(),
                    status: StepStatus::Failed,
                    output: String::new(),
                    error: Some(e.to_string()),
                    duration: Duration::ZERO,
                    exit_code: None,
                });
                self.finish(
                    cell_id,
                    CellStatus::Failed,
                    steps,
                    Vec::new(),
                    Some("collect artifacts".to_string()),
                    start,
                )
            }
        }
    }

    async fn run_step(&self, cell_id: &str, step: &StepSpec, index: usize) -> StepResult {
        self.events
            .send_event(ExecutionEvent::step_started(cell_id, &step.name, index));
        let step_start = Instant::now();

        let command = self.ctx.cell.substitute(&step.run);

        let mut env = self.ctx.env.clone();
        env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let config = ShellConfig {
            timeout: step.timeout.map(Duration::from_secs),
        };

        let on_output: Option<OutputCallback> = self.events.clone().map(|sender| {
            let cell_id = cell_id.to_string();
            let step_name = step.name.clone();
            let callback: OutputCallback = Box::new(move |line: &str, is_error: bool| {
                let _ = sender.send(ExecutionEvent::StepOutput {
                    cell_id: cell_id.clone(),
                    step_name: step_name.clone(),
                    step_index: index,
                    output: line.to_string(),
                    is_error,
                });
            });
            callback
        });

        let output = ShellRunner::new()
            .run_script(
                &command,
                &env,
                &self.ctx.working_dir,
                &config,
                on_output,
                self.cancel.clone(),
            )
            .await;

        let status = if output.cancelled {
            StepStatus::Cancelled
        } else if output.timed_out {
            StepStatus::TimedOut
        } else if output.exit_code == Some(0) {
            StepStatus::Succeeded
        } else {
            StepStatus::Failed
        };

        let duration = step_start.elapsed();
        self.events.send_event(ExecutionEvent::step_completed(
            cell_id,
            &step.name,
            index,
            status.clone(),
            duration,
            output.exit_code,
        ));

        StepResult {
            step_name: step.name.clone(),
            status,
            output: output.stdout,
            error: (!output.stderr.is_empty()).then_some(output.stderr),
            duration,
            exit_code: output.exit_code,
        }
    }

    /// Resolve the cache key and restore an entry into the working
    /// directory. Returns the key so the save after a successful pipeline
    /// reuses it. Cache faults degrade to a miss.
    fn restore_cache(&self, cell_id: &str) -> Option<String> {
        let store = self.cache.as_ref()?;
        let cache = self.spec.cache.as_ref()?;

        let base_key = match self.ctx.cell.render(&cache.key) {
            Ok(key) => key,
            Err(e) => {
                self.events.send_event(ExecutionEvent::warning(
                    format!("cache key template: {}", e),
                    Some(cell_id.to_string()),
                ));
                return None;
            }
        };

        // Key-file globs may carry {axis} placeholders
        let key_files: Vec<String> = cache
            .key_files
            .iter()
            .map(|pattern| self.ctx.cell.substitute(pattern))
            .collect();
        let key = match hash_files(&self.ctx.source_dir, &key_files) {
            Ok(Some(digest)) => format!("{}-{}", base_key, digest),
            Ok(None) => base_key,
            Err(e) => {
                self.events.send_event(ExecutionEvent::warning(
                    format!("cache key file hashing: {}", e),
                    Some(cell_id.to_string()),
                ));
                base_key
            }
        };

        let prefixes: Vec<String> = cache
            .restore_prefixes
            .iter()
            .filter_map(|prefix| self.ctx.cell.render(prefix).ok())
            .collect();

        match store.restore(&key, &prefixes, &self.ctx.working_dir) {
            Ok(Restore::Hit { key: matched, exact }) => {
                self.events.send_event(ExecutionEvent::CacheRestored {
                    cell_id: cell_id.to_string(),
                    key: matched,
                    exact,
                });
            }
            Ok(Restore::Miss) => {
                self.events.send_event(ExecutionEvent::CacheMissed {
                    cell_id: cell_id.to_string(),
                    key: key.clone(),
                });
            }
            Err(e) => {
                self.events.send_event(ExecutionEvent::warning(
                    format!("cache restore failed: {}", e),
                    Some(cell_id.to_string()),
                ));
            }
        }

        Some(key)
    }

    /// Save the cache entry after a fully successful pipeline. A strict
    /// write conflict fails the cell; other faults are warnings.
    fn save_cache(&self, cell_id: &str, key: &str) -> Result<(), StepResult> {
        let (store, cache) = match (self.cache.as_ref(), self.spec.cache.as_ref()) {
            (Some(store), Some(cache)) => (store, cache),
            _ => return Ok(()),
        };

        match store.save(key, &cache.paths, &self.ctx.working_dir) {
            Ok(true) => {
                self.events.send_event(ExecutionEvent::CacheSaved {
                    cell_id: cell_id.to_string(),
                    key: key.to_string(),
                });
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e @ CacheError::WriteConflict(_)) => Err(StepResult {
                step_name: "cache save".to_string(),
                status: StepStatus::Failed,
                output: String::new(),
                error: Some(e.to_string()),
                duration: Duration::ZERO,
                exit_code: None,
            }),
            Err(e) => {
                self.events.send_event(ExecutionEvent::warning(
                    format!("cache save failed: {}", e),
                    Some(cell_id.to_string()),
                ));
                Ok(())
            }
        }
    }

    fn finish(
        &self,
        cell_id: String,
        status: CellStatus,
        steps: Vec<StepResult>,
        artifacts: Vec<crate::artifacts::ArtifactRecord>,
        failed_step: Option<String>,
        start: Instant,
    ) -> CellResult {
        let duration = start.elapsed();
        self.events.send_event(ExecutionEvent::cell_completed(
            cell_id,
            status.clone(),
            duration,
        ));
        CellResult {
            cell: self.ctx.cell.clone(),
            status,
            steps,
            artifacts,
            duration,
            failed_step,
        }
    }
}
