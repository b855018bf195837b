// Artifact Collection
// Gathers declared step outputs and assigns deterministic names

use crate::execution::context::CellContext;
use crate::matrix::TemplateError;
use crate::spec::models::StepSpec;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A collected artifact: cell identity, source path and display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub cell_id: String,
    pub name: String,
    pub path: PathBuf,
}

/// Errors from artifact collection
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid output pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("artifact name '{name}' produced by both '{first}' and '{second}'")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("artifact name template: {0}")]
    Template(#[from] TemplateError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Collects files matching each step's declared output globs within a
/// cell's working scope
pub struct ArtifactCollector;

impl ArtifactCollector {
    /// Collect artifacts for one completed cell.
    ///
    /// The display name is the artifact template rendered against the cell
    /// (the cell id when no template is configured). A cell producing a
    /// single file gets the rendered name as-is; with several files the
    /// file name is appended to keep names unique and deterministic.
    pub fn collect(
        steps: &[StepSpec],
        template: Option<&str>,
        ctx: &CellContext,
    ) -> Result<Vec<ArtifactRecord>, ArtifactError> {
        let mut files: Vec<PathBuf> = Vec::new();
        for step in steps {
            for pattern in &step.outputs {
                // Output globs may carry {axis} placeholders
                let pattern = &ctx.cell.substitute(pattern);
                let full = ctx.working_dir.join(pattern).to_string_lossy().into_owned();
                let matches = glob::glob(&full).map_err(|e| ArtifactError::Pattern {
                    pattern: pattern.clone(),
                    message: e.msg.to_string(),
                })?;
                for entry in matches {
                    let path = entry.map_err(|e| ArtifactError::Io(e.into()))?;
                    if path.is_file() {
                        files.push(path);
                    }
                }
            }
        }
        files.sort();
        files.dedup();

        let cell_id = ctx.cell.id();
        let base = match template {
            Some(template) => ctx.cell.render(template)?,
            None => cell_id.clone(),
        };

        let single = files.len() == 1;
        let mut records: Vec<ArtifactRecord> = Vec::with_capacity(files.len());
        for path in files {
            let name = if single {
                base.clone()
            } else {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("{}-{}", base, file_name)
            };
            if let Some(existing) = records.iter().find(|r| r.name == name) {
                return Err(ArtifactError::NameCollision {
                    name,
                    first: existing.path.display().to_string(),
                    second: path.display().to_string(),
                });
            }
            records.push(ArtifactRecord {
                cell_id: cell_id.clone(),
                name,
                path,
            });
        }

        Ok(records)
    }
}

/// Write the name -> path manifest consumed by external artifact stores
pub fn write_manifest<'a>(
    records: impl IntoIterator<Item = &'a ArtifactRecord>,
    path: &Path,
) -> io::Result<()> {
    let map: BTreeMap<&str, String> = records
        .into_iter()
        .map(|record| (record.name.as_str(), record.path.display().to_string()))
        .collect();
    let json = serde_json::to_string_pretty(&map)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::context::CellContext;
    use crate::matrix::{MatrixAxis, MatrixExpander};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn step_with_outputs(outputs: Vec<&str>) -> StepSpec {
        StepSpec {
            name: "make installer".to_string(),
            run: "true".to_string(),
            condition: None,
            outputs: outputs.into_iter().map(String::from).collect(),
            timeout: None,
            env: HashMap::new(),
        }
    }

    fn context(root: &Path) -> CellContext {
        let cells = MatrixExpander::expand(&[
            MatrixAxis::new("arch", vec!["x64"]),
            MatrixAxis::new("libtorrent", vec!["2.0.5"]),
        ]);
        CellContext::new(cells[0].clone(), root, root, &HashMap::new())
    }

    #[test]
    fn test_collect_single_file_uses_rendered_name() {
        let root = TempDir::new().unwrap();
        let ctx = context(root.path());
        fs::create_dir_all(ctx.working_dir.join("dist")).unwrap();
        fs::write(ctx.working_dir.join("dist/setup.exe"), "exe").unwrap();

        let steps = vec![step_with_outputs(vec!["dist/*.exe"])];
        let records =
            ArtifactCollector::collect(&steps, Some("pkg-lt{libtorrent}-{arch}"), &ctx).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "pkg-lt2.0.5-x64");
        assert_eq!(records[0].cell_id, "x64-2.0.5");
    }

    #[test]
    fn test_collect_multiple_files_appends_file_name() {
        let root = TempDir::new().unwrap();
        let ctx = context(root.path());
        fs::create_dir_all(ctx.working_dir.join("dist")).unwrap();
        fs::write(ctx.working_dir.join("dist/a.exe"), "a").unwrap();
        fs::write(ctx.working_dir.join("dist/b.exe"), "b").unwrap();

        let steps = vec![step_with_outputs(vec!["dist/*.exe"])];
        let records = ArtifactCollector::collect(&steps, Some("pkg-{arch}"), &ctx).unwrap();

        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["pkg-x64-a.exe", "pkg-x64-b.exe"]);
    }

    #[test]
    fn test_collect_renders_placeholders_in_output_globs() {
        let root = TempDir::new().unwrap();
        let ctx = context(root.path());
        fs::create_dir_all(ctx.working_dir.join("dist-x64")).unwrap();
        fs::write(ctx.working_dir.join("dist-x64/setup.exe"), "exe").unwrap();

        let steps = vec![step_with_outputs(vec!["dist-{arch}/*.exe"])];
        let records = ArtifactCollector::collect(&steps, Some("pkg-{arch}"), &ctx).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "pkg-x64");
    }

    #[test]
    fn test_collect_overlapping_globs_dedup() {
        let root = TempDir::new().unwrap();
        let ctx = context(root.path());
        fs::create_dir_all(&ctx.working_dir).unwrap();
        fs::write(ctx.working_dir.join("out.exe"), "exe").unwrap();

        let steps = vec![
            step_with_outputs(vec!["*.exe"]),
            step_with_outputs(vec!["out.*"]),
        ];
        let records = ArtifactCollector::collect(&steps, None, &ctx).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "x64-2.0.5");
    }

    #[test]
    fn test_collect_no_outputs() {
        let root = TempDir::new().unwrap();
        let ctx = context(root.path());
        fs::create_dir_all(&ctx.working_dir).unwrap();

        let steps = vec![step_with_outputs(vec![])];
        let records = ArtifactCollector::collect(&steps, None, &ctx).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_write_manifest() {
        let root = TempDir::new().unwrap();
        let records = vec![
            ArtifactRecord {
                cell_id: "x64-2.0.5".to_string(),
                name: "pkg-lt2.0.5-x64".to_string(),
                path: PathBuf::from("/tmp/x64/setup.exe"),
            },
            ArtifactRecord {
                cell_id: "x86-2.0.5".to_string(),
                name: "pkg-lt2.0.5-x86".to_string(),
                path: PathBuf::from("/tmp/x86/setup.exe"),
            },
        ];

        let manifest = root.path().join("artifacts.json");
        write_manifest(&records, &manifest).unwrap();

        let parsed: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(&manifest).unwrap()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["pkg-lt2.0.5-x64"], "/tmp/x64/setup.exe");
    }
}
