// Cell Execution Context
// Exclusive working scope and environment for one cell's pipeline

use crate::matrix::Cell;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Execution context bound to exactly one cell.
///
/// Every cell owns an exclusive working directory under the run root; no
/// two pipelines share mutable filesystem state.
#[derive(Debug, Clone)]
pub struct CellContext {
    pub cell: Cell,
    /// Exclusive working directory for this cell's steps
    pub working_dir: PathBuf,
    /// Directory holding the source checkout, used for cache key hashing
    pub source_dir: PathBuf,
    /// Environment passed to every step: run-level env plus MATRIX_<AXIS>
    /// variables carrying the cell's values
    pub env: HashMap<String, String>,
}

impl CellContext {
    pub fn new(
        cell: Cell,
        run_root: &Path,
        source_dir: &Path,
        base_env: &HashMap<String, String>,
    ) -> Self {
        let working_dir = run_root.join(cell.dir_name());

        let mut env = base_env.clone();
        for (axis, value) in cell.entries() {
            env.insert(matrix_env_name(axis), value.to_string());
        }

        Self {
            cell,
            working_dir,
            source_dir: source_dir.to_path_buf(),
            env,
        }
    }
}

fn matrix_env_name(axis: &str) -> String {
    let upper: String = axis
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("MATRIX_{}", upper)
}
