// Run Specification Models
// Serde data model for the YAML run spec

use crate::matrix::MatrixAxis;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// A parsed run specification: the matrix, the pipeline template and the
/// caching/artifact configuration shared by every cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub name: String,

    /// Matrix axes in declaration order
    #[serde(deserialize_with = "axes_in_order")]
    pub matrix: Vec<MatrixAxis>,

    /// Maximum cells running in parallel (default: all at once)
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Environment passed to every step of every cell
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub cache: Option<CacheSpec>,

    /// Artifact display name template over axis values,
    /// e.g. "pkg-lt{libtorrent}-{arch}"
    #[serde(default)]
    pub artifact_name: Option<String>,

    /// Ordered steps executed for each cell
    pub steps: Vec<StepSpec>,
}

/// One step of the pipeline template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,

    /// Command string; `{axis}` placeholders are substituted per cell
    pub run: String,

    /// Predicate over cell values; the step is skipped when it evaluates
    /// to false
    #[serde(default)]
    pub condition: Option<String>,

    /// Globs (relative to the cell working directory) naming this step's
    /// artifacts
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Per-step timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Dependency cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSpec {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Key template over axis values; the `key_files` digest is appended
    /// when those files exist
    pub key: String,

    /// Globs (relative to the source directory) hashed into the key
    #[serde(default)]
    pub key_files: Vec<String>,

    /// Prefix templates tried in order when the exact key misses
    #[serde(default)]
    pub restore_prefixes: Vec<String>,

    /// Paths (relative to the cell working directory) to snapshot
    pub paths: Vec<String>,

    /// Treat save-on-existing-key as an error instead of a no-op
    #[serde(default)]
    pub strict: bool,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Deserialize the matrix mapping while preserving axis declaration order,
/// which the expansion contract depends on
fn axes_in_order<'de, D>(deserializer: D) -> Result<Vec<MatrixAxis>, D::Error>
where
    D: Deserializer<'de>,
{
    let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
    let mut axes = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = key
            .as_str()
            .ok_or_else(|| D::Error::custom("matrix axis name must be a string"))?
            .to_string();
        let sequence = value.as_sequence().ok_or_else(|| {
            D::Error::custom(format!("matrix axis '{}' must be a list of values", name))
        })?;
        let values = sequence
            .iter()
            .map(|item| scalar_to_string(item).map_err(|reason| {
                D::Error::custom(format!("matrix axis '{}' {}", name, reason))
            }))
            .collect::<Result<Vec<_>, _>>()?;
        axes.push(MatrixAxis { name, values });
    }
    Ok(axes)
}

/// String, integer and boolean scalars become axis value strings exactly.
/// Floats are rejected: YAML resolves a plain `3.10` to the number 3.1
/// before this code runs, so the written text cannot be recovered and
/// version-like values would be silently corrupted.
fn scalar_to_string(value: &serde_yaml::Value) -> Result<String, String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        serde_yaml::Value::Number(n) => Err(format!(
            "has the floating-point value {}; quote it to keep the exact text",
            n
        )),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        _ => Err("has a non-scalar value".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_preserves_declaration_order() {
        let yaml = r#"
name: release
matrix:
  arch: [x64, x86]
  python: ["3.9"]
  libtorrent: ["2.0.5", "1.2.15"]
steps:
  - name: build
    run: make
"#;
        let spec: RunSpec = serde_yaml::from_str(yaml).unwrap();
        let names: Vec<&str> = spec.matrix.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["arch", "python", "libtorrent"]);
        assert_eq!(spec.matrix[0].values, vec!["x64", "x86"]);
    }

    #[test]
    fn test_integer_axis_values_become_strings() {
        let yaml = r#"
name: release
matrix:
  libtorrent_major: [1, 2]
steps:
  - name: build
    run: make
"#;
        let spec: RunSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.matrix[0].values, vec!["1", "2"]);
    }

    #[test]
    fn test_quoted_version_values_keep_exact_text() {
        let yaml = r#"
name: release
matrix:
  python: ["3.9", "3.10"]
steps:
  - name: build
    run: make
"#;
        let spec: RunSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.matrix[0].values, vec!["3.9", "3.10"]);
    }

    #[test]
    fn test_unquoted_float_axis_value_rejected() {
        // Plain 3.10 reaches us as the number 3.1; corrupting the version
        // silently is worse than failing with a quoting hint
        let yaml = r#"
name: release
matrix:
  python: [3.9, 3.10]
steps:
  - name: build
    run: make
"#;
        let err = serde_yaml::from_str::<RunSpec>(yaml).unwrap_err();
        assert!(err.to_string().contains("quote it"));
    }

    #[test]
    fn test_step_defaults() {
        let yaml = r#"
name: release
matrix:
  arch: [x64]
steps:
  - name: build
    run: make
"#;
        let spec: RunSpec = serde_yaml::from_str(yaml).unwrap();
        let step = &spec.steps[0];
        assert!(step.condition.is_none());
        assert!(step.outputs.is_empty());
        assert!(step.timeout.is_none());
        assert!(spec.cache.is_none());
        assert!(spec.concurrency.is_none());
    }

    #[test]
    fn test_cache_spec() {
        let yaml = r#"
name: release
matrix:
  arch: [x64]
cache:
  namespace: pip
  key: "pip-{arch}"
  key_files: ["requirements*.txt"]
  restore_prefixes: ["pip-"]
  paths: [".pip-cache"]
steps:
  - name: build
    run: make
"#;
        let spec: RunSpec = serde_yaml::from_str(yaml).unwrap();
        let cache = spec.cache.unwrap();
        assert_eq!(cache.namespace, "pip");
        assert_eq!(cache.restore_prefixes, vec!["pip-"]);
        assert!(!cache.strict);
    }

    #[test]
    fn test_non_list_axis_is_rejected() {
        let yaml = r#"
name: release
matrix:
  arch: x64
steps:
  - name: build
    run: make
"#;
        assert!(serde_yaml::from_str::<RunSpec>(yaml).is_err());
    }
}
