use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use matrix_service::execution::events::progress_channel;
use matrix_service::{
    write_manifest, CellStatus, ExecutionEvent, Orchestrator, OrchestratorConfig, SpecParser,
    StepStatus,
};

/// Run the full build matrix described by a run spec
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the run spec YAML file
    pub spec: PathBuf,

    /// Root directory for cell working directories (default: ./.relpack)
    #[arg(long, short = 'w', value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Cache store directory (default: <workdir>/.cache)
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum cells running in parallel (overrides the spec)
    #[arg(long, short = 'j', value_name = "N")]
    pub jobs: Option<usize>,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let spec_path = &args.spec;

    if !spec_path.exists() {
        color_eyre::eyre::bail!("Spec file not found: {}", spec_path.display());
    }

    output::status("Parsing", &format!("{}", spec_path.display()));
    let spec = match SpecParser::parse_file(spec_path) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let source_dir = std::env::current_dir()?;
    let run_root = match &args.workdir {
        Some(dir) => dir.clone(),
        None => source_dir.join(".relpack"),
    };

    let cell_count: usize = spec.matrix.iter().map(|axis| axis.values.len()).product();
    output::info(&format!(
        "Run '{}': {} axes, {} cells, {} steps per cell",
        spec.name,
        spec.matrix.len(),
        cell_count,
        spec.steps.len()
    ));

    let config = OrchestratorConfig {
        run_root: run_root.clone(),
        source_dir,
        cache_dir: args.cache_dir.clone(),
        max_workers: args.jobs,
    };

    let (tx, mut rx) = progress_channel();
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

    // First Ctrl-C cancels the run; running steps get killed and pending
    // cells are skipped
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let orchestrator = Orchestrator::new(spec, config)
        .with_progress(tx)
        .with_cancel(cancel_rx);

    let exec_handle = tokio::spawn(async move { orchestrator.execute().await });

    while let Some(event) = rx.recv().await {
        match &event {
            ExecutionEvent::RunStarted {
                run_name,
                total_cells,
            } => {
                eprintln!();
                output::header(&format!("Run '{}' ({} cells)", run_name, total_cells));
            }

            ExecutionEvent::CellStarted {
                cell_id,
                total_steps,
            } => {
                output::cell_header(cell_id, *total_steps);
            }

            ExecutionEvent::CellCompleted {
                cell_id,
                status,
                duration,
            } => match status {
                CellStatus::Succeeded => output::success(&format!(
                    "Cell '{}' succeeded in {:.2}s",
                    cell_id,
                    duration.as_secs_f64()
                )),
                CellStatus::Failed => output::failure(&format!(
                    "Cell '{}' failed after {:.2}s",
                    cell_id,
                    duration.as_secs_f64()
                )),
                CellStatus::Cancelled => {
                    output::warning(&format!("Cell '{}' cancelled", cell_id))
                }
            },

            ExecutionEvent::CacheRestored { cell_id, key, exact } => {
                if *exact {
                    output::info(&format!("[{}] cache hit: {}", cell_id, key));
                } else {
                    output::info(&format!("[{}] cache hit (prefix): {}", cell_id, key));
                }
            }

            ExecutionEvent::CacheMissed { cell_id, key } => {
                output::dim(&format!("  [{}] cache miss: {}", cell_id, key));
            }

            ExecutionEvent::CacheSaved { cell_id, key } => {
                output::info(&format!("[{}] cache saved: {}", cell_id, key));
            }

            ExecutionEvent::StepStarted {
                cell_id,
                step_name,
                ..
            } => {
                output::dim(&format!("  [{}] running '{}'", cell_id, step_name));
            }

            ExecutionEvent::StepOutput {
                cell_id,
                output: line,
                is_error,
                ..
            } => {
                if *is_error {
                    output::step_error(cell_id, line);
                } else {
                    output::step_output(cell_id, line);
                }
            }

            ExecutionEvent::StepCompleted {
                cell_id,
                step_name,
                status,
                duration,
                exit_code,
                ..
            } => match status {
                StepStatus::Succeeded => output::check(&format!(
                    "[{}] '{}' ({:.2}s)",
                    cell_id,
                    step_name,
                    duration.as_secs_f64()
                )),
                StepStatus::TimedOut => output::failure(&format!(
                    "[{}] '{}' timed out after {:.2}s",
                    cell_id,
                    step_name,
                    duration.as_secs_f64()
                )),
                _ => output::failure(&format!(
                    "[{}] '{}' failed (exit code: {:?})",
                    cell_id, step_name, exit_code
                )),
            },

            ExecutionEvent::StepSkipped {
                cell_id,
                step_name,
                reason,
                ..
            } => {
                output::dim(&format!("  [{}] skipped '{}': {}", cell_id, step_name, reason));
            }

            ExecutionEvent::ArtifactCollected { cell_id, name, path } => {
                output::info(&format!(
                    "[{}] artifact '{}': {}",
                    cell_id,
                    name,
                    path.display()
                ));
            }

            ExecutionEvent::Warning { message, cell_id } => match cell_id {
                Some(cell_id) => output::warning(&format!("[{}] {}", cell_id, message)),
                None => output::warning(message),
            },

            ExecutionEvent::RunCompleted { .. } => {}
        }
    }

    let run = match exec_handle.await? {
        Ok(run) => run,
        Err(e) => {
            output::error(&format!("Invalid run spec: {}", e));
            std::process::exit(2);
        }
    };

    eprintln!();
    output::header("Summary");
    for cell in &run.cells {
        match cell.status {
            CellStatus::Succeeded => output::check(&format!(
                "{} ({:.2}s)",
                cell.cell.id(),
                cell.duration.as_secs_f64()
            )),
            CellStatus::Failed => {
                let detail = cell
                    .failed_step
                    .as_deref()
                    .map(|step| format!(" at step '{}'", step))
                    .unwrap_or_default();
                output::failure(&format!("{} failed{}", cell.cell.id(), detail));
            }
            CellStatus::Cancelled => output::warning(&format!("{} cancelled", cell.cell.id())),
        }
    }

    let artifacts: Vec<_> = run.artifacts().collect();
    if !artifacts.is_empty() {
        let manifest_path = run_root.join("artifacts.json");
        write_manifest(artifacts.iter().copied(), &manifest_path)?;
        output::info(&format!(
            "{} artifacts, manifest at {}",
            artifacts.len(),
            manifest_path.display()
        ));
    }

    eprintln!();
    if run.success() {
        output::success(&format!(
            "{} of {} cells succeeded in {:.2}s",
            run.succeeded_count(),
            run.cells.len(),
            run.duration.as_secs_f64()
        ));
        Ok(())
    } else {
        output::failure(&format!(
            "{} of {} cells failed after {:.2}s",
            run.failed_count(),
            run.cells.len(),
            run.duration.as_secs_f64()
        ));
        // All cells failing usually means a broken spec rather than flaky
        // builds
        let exit_code = if run.succeeded_count() == 0 { 2 } else { 1 };
        std::process::exit(exit_code);
    }
}
