// Semantic validation of a parsed run spec
// Catches configuration mistakes before any cell starts executing

use crate::condition::Condition;
use crate::matrix::{template_placeholders, MatrixExpander};
use crate::spec::models::RunSpec;

use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatrixConfigError {
    #[error("matrix must declare at least one axis")]
    NoAxes,

    #[error("spec must declare at least one step")]
    NoSteps,

    #[error("invalid axis name '{0}': names must start with a letter or underscore and contain only letters, digits and underscores")]
    InvalidAxisName(String),

    #[error("axis '{0}' is declared more than once")]
    DuplicateAxis(String),

    #[error("axis '{axis}' repeats the value '{value}'")]
    DuplicateValue { axis: String, value: String },

    #[error("step '{0}' is declared more than once")]
    DuplicateStep(String),

    #[error("invalid condition on step '{step}': {message}")]
    InvalidCondition { step: String, message: String },

    #[error("{what} references unknown axis '{placeholder}'")]
    UnknownPlaceholder { what: String, placeholder: String },

    #[error("invalid {what} template: {message}")]
    InvalidTemplate { what: String, message: String },

    #[error("invalid glob pattern '{pattern}' in {what}: {message}")]
    InvalidPattern {
        what: String,
        pattern: String,
        message: String,
    },

    #[error("artifact name '{name}' is produced by both cell '{first}' and cell '{second}'")]
    ArtifactNameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Validate a parsed spec: axis names and values, step names, conditions,
/// templates and glob patterns, and cross-cell artifact name uniqueness
pub fn validate(spec: &RunSpec) -> Result<(), MatrixConfigError> {
    if spec.matrix.is_empty() {
        return Err(MatrixConfigError::NoAxes);
    }
    if spec.steps.is_empty() {
        return Err(MatrixConfigError::NoSteps);
    }
    if spec.concurrency == Some(0) {
        return Err(MatrixConfigError::ZeroConcurrency);
    }

    let mut axis_names = HashSet::new();
    for axis in &spec.matrix {
        if !is_valid_axis_name(&axis.name) {
            return Err(MatrixConfigError::InvalidAxisName(axis.name.clone()));
        }
        if !axis_names.insert(axis.name.as_str()) {
            return Err(MatrixConfigError::DuplicateAxis(axis.name.clone()));
        }
        // An axis with zero values is valid: the matrix expands to zero
        // cells and the run completes with nothing to do
        let mut seen = HashSet::new();
        for value in &axis.values {
            if !seen.insert(value.as_str()) {
                return Err(MatrixConfigError::DuplicateValue {
                    axis: axis.name.clone(),
                    value: value.clone(),
                });
            }
        }
    }

    let mut step_names = HashSet::new();
    for step in &spec.steps {
        if !step_names.insert(step.name.as_str()) {
            return Err(MatrixConfigError::DuplicateStep(step.name.clone()));
        }

        if let Some(condition) = &step.condition {
            let parsed = Condition::parse(condition).map_err(|e| {
                MatrixConfigError::InvalidCondition {
                    step: step.name.clone(),
                    message: e.to_string(),
                }
            })?;
            for ident in parsed.identifiers() {
                if !axis_names.contains(ident.as_str()) {
                    return Err(MatrixConfigError::InvalidCondition {
                        step: step.name.clone(),
                        message: format!("unknown axis '{}'", ident),
                    });
                }
            }
        }

        for pattern in &step.outputs {
            check_pattern(&axis_names, pattern, &format!("step '{}' outputs", step.name))?;
        }
    }

    if let Some(template) = &spec.artifact_name {
        check_template(&axis_names, template, "artifact_name")?;
    }

    if let Some(cache) = &spec.cache {
        check_template(&axis_names, &cache.key, "cache.key")?;
        for prefix in &cache.restore_prefixes {
            check_template(&axis_names, prefix, "cache.restore_prefixes")?;
        }
        for pattern in &cache.key_files {
            check_pattern(&axis_names, pattern, "cache.key_files")?;
        }
    }

    // Two cells mapping to the same artifact name would silently overwrite
    // each other at collection time
    if let Some(template) = &spec.artifact_name {
        let cells = MatrixExpander::expand(&spec.matrix);
        let mut by_name: HashMap<String, String> = HashMap::new();
        for cell in &cells {
            if let Ok(name) = cell.render(template) {
                if let Some(first) = by_name.get(&name) {
                    return Err(MatrixConfigError::ArtifactNameCollision {
                        name,
                        first: first.clone(),
                        second: cell.id(),
                    });
                }
                by_name.insert(name, cell.id());
            }
        }
    }

    Ok(())
}

fn is_valid_axis_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_template(
    axis_names: &HashSet<&str>,
    template: &str,
    what: &str,
) -> Result<(), MatrixConfigError> {
    let placeholders =
        template_placeholders(template).map_err(|e| MatrixConfigError::InvalidTemplate {
            what: what.to_string(),
            message: e.to_string(),
        })?;
    for placeholder in placeholders {
        if !axis_names.contains(placeholder.as_str()) {
            return Err(MatrixConfigError::UnknownPlaceholder {
                what: what.to_string(),
                placeholder,
            });
        }
    }
    Ok(())
}

fn check_pattern(
    axis_names: &HashSet<&str>,
    pattern: &str,
    what: &str,
) -> Result<(), MatrixConfigError> {
    // Patterns may carry axis placeholders; validate those too
    check_template(axis_names, pattern, what)?;
    let probe = strip_placeholders(pattern);
    glob::Pattern::new(&probe).map_err(|e| MatrixConfigError::InvalidPattern {
        what: what.to_string(),
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}

/// Replace `{axis}` placeholders with a neutral token so the glob syntax
/// itself can be checked
fn strip_placeholders(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '{' {
            for inner in chars.by_ref() {
                if inner == '}' {
                    break;
                }
            }
            out.push('x');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::parser::SpecParser;

    fn parse(yaml: &str) -> RunSpec {
        SpecParser::parse_str(yaml).unwrap()
    }

    #[test]
    fn test_valid_spec_passes() {
        let spec = parse(
            r#"
name: release
matrix:
  arch: [x64, x86]
  libtorrent: ["2.0.5", "1.2.15"]
artifact_name: "pkg-lt{libtorrent}-{arch}"
cache:
  key: "pip-{arch}"
  restore_prefixes: ["pip-"]
  paths: [".pip-cache"]
steps:
  - name: build
    run: make {arch}
    outputs: ["dist/*.exe"]
  - name: ssl
    run: cp ssl.dll .
    condition: "arch == 'x64'"
"#,
        );
        assert!(validate(&spec).is_ok());
    }

    #[test]
    fn test_empty_axis_is_a_valid_degenerate_matrix() {
        let spec = parse(
            r#"
name: release
matrix:
  arch: []
steps:
  - name: build
    run: make
"#,
        );
        assert!(validate(&spec).is_ok());
        assert!(MatrixExpander::expand(&spec.matrix).is_empty());
    }

    #[test]
    fn test_duplicate_value_rejected() {
        let spec = parse(
            r#"
name: release
matrix:
  arch: [x64, x64]
steps:
  - name: build
    run: make
"#,
        );
        assert!(matches!(
            validate(&spec),
            Err(MatrixConfigError::DuplicateValue { .. })
        ));
    }

    #[test]
    fn test_invalid_axis_name_rejected() {
        let spec = parse(
            r#"
name: release
matrix:
  "2arch": [x64]
steps:
  - name: build
    run: make
"#,
        );
        assert!(matches!(
            validate(&spec),
            Err(MatrixConfigError::InvalidAxisName(_))
        ));
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let spec = parse(
            r#"
name: release
matrix:
  arch: [x64]
steps:
  - name: build
    run: make
  - name: build
    run: make again
"#,
        );
        assert!(matches!(
            validate(&spec),
            Err(MatrixConfigError::DuplicateStep(_))
        ));
    }

    #[test]
    fn test_condition_with_unknown_axis_rejected() {
        let spec = parse(
            r#"
name: release
matrix:
  arch: [x64]
steps:
  - name: build
    run: make
    condition: "os == 'windows'"
"#,
        );
        let err = validate(&spec).unwrap_err();
        assert!(err.to_string().contains("unknown axis 'os'"));
    }

    #[test]
    fn test_malformed_condition_rejected() {
        let spec = parse(
            r#"
name: release
matrix:
  arch: [x64]
steps:
  - name: build
    run: make
    condition: "arch =="
"#,
        );
        assert!(matches!(
            validate(&spec),
            Err(MatrixConfigError::InvalidCondition { .. })
        ));
    }

    #[test]
    fn test_unknown_placeholder_in_artifact_name() {
        let spec = parse(
            r#"
name: release
matrix:
  arch: [x64]
artifact_name: "pkg-{python}"
steps:
  - name: build
    run: make
"#,
        );
        assert!(matches!(
            validate(&spec),
            Err(MatrixConfigError::UnknownPlaceholder { .. })
        ));
    }

    #[test]
    fn test_artifact_name_collision_across_cells() {
        let spec = parse(
            r#"
name: release
matrix:
  arch: [x64, x86]
  python: ["3.9"]
artifact_name: "pkg-{python}"
steps:
  - name: build
    run: make
"#,
        );
        assert!(matches!(
            validate(&spec),
            Err(MatrixConfigError::ArtifactNameCollision { .. })
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let spec = parse(
            r#"
name: release
matrix:
  arch: [x64]
concurrency: 0
steps:
  - name: build
    run: make
"#,
        );
        assert!(matches!(
            validate(&spec),
            Err(MatrixConfigError::ZeroConcurrency)
        ));
    }

    #[test]
    fn test_bad_output_glob_rejected() {
        let spec = parse(
            r#"
name: release
matrix:
  arch: [x64]
steps:
  - name: build
    run: make
    outputs: ["dist/[.exe"]
"#,
        );
        assert!(matches!(
            validate(&spec),
            Err(MatrixConfigError::InvalidPattern { .. })
        ));
    }
}
