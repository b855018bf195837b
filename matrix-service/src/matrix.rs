// Matrix Expansion
// Expands declarative matrix axes into concrete build cells

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A named dimension of variation with an ordered set of discrete values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixAxis {
    /// Axis name (e.g. "arch")
    pub name: String,
    /// Ordered values for this axis (e.g. ["x64", "x86"])
    pub values: Vec<String>,
}

impl MatrixAxis {
    pub fn new(name: impl Into<String>, values: Vec<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// One concrete assignment of a value to every axis.
///
/// Immutable once produced by expansion. Entries preserve axis declaration
/// order, so the value tuple identifies the cell for working directories,
/// cache keys and artifact names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    entries: Vec<(String, String)>,
}

impl Cell {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// Look up the value assigned to an axis
    pub fn get(&self, axis: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, value)| value.as_str())
    }

    /// Iterate (axis, value) pairs in declaration order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Stable identity: axis values joined in declaration order
    pub fn id(&self) -> String {
        self.entries
            .iter()
            .map(|(_, value)| value.as_str())
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Directory-safe form of the identity
    pub fn dir_name(&self) -> String {
        self.id()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Render a template against this cell, requiring every `{name}`
    /// placeholder to reference an axis.
    pub fn render(&self, template: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        for segment in scan_template(template)? {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match self.get(name) {
                    Some(value) => out.push_str(value),
                    None => return Err(TemplateError::UnknownPlaceholder(name.to_string())),
                },
            }
        }
        Ok(out)
    }

    /// Substitute `{axis}` occurrences for every known axis, leaving any
    /// other brace syntax untouched. Used for step command strings, where
    /// shell constructs like `${VAR}` must survive.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (name, value) in &self.entries {
            out = out.replace(&format!("{{{}}}", name), value);
        }
        out
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Template rendering errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),
    #[error("invalid placeholder '{{{0}}}'")]
    InvalidPlaceholder(String),
    #[error("unclosed '{{' in template")]
    Unclosed,
}

enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn scan_template(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or(TemplateError::Unclosed)?;
        let name = &after[..close];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(TemplateError::InvalidPlaceholder(name.to_string()));
        }
        segments.push(Segment::Placeholder(name));
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

/// Collect the placeholder names a template references
pub fn template_placeholders(template: &str) -> Result<Vec<String>, TemplateError> {
    let mut names = Vec::new();
    for segment in scan_template(template)? {
        if let Segment::Placeholder(name) = segment {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Cross-product generator for matrix axes
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand axes into the full cross product of cells.
    ///
    /// Ordering is lexicographic over axis declaration order then value
    /// order, so repeated runs enumerate cells identically. An axis with
    /// zero values yields zero cells, a valid degenerate outcome.
    pub fn expand(axes: &[MatrixAxis]) -> Vec<Cell> {
        if axes.iter().any(|axis| axis.values.is_empty()) {
            return Vec::new();
        }

        let mut partials: Vec<Vec<(String, String)>> = vec![Vec::new()];
        for axis in axes {
            let mut next = Vec::with_capacity(partials.len() * axis.values.len());
            for partial in &partials {
                for value in &axis.values {
                    let mut entries = partial.clone();
                    entries.push((axis.name.clone(), value.clone()));
                    next.push(entries);
                }
            }
            partials = next;
        }

        partials.into_iter().map(Cell::new).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_axes() -> Vec<MatrixAxis> {
        vec![
            MatrixAxis::new("arch", vec!["x64", "x86"]),
            MatrixAxis::new("libtorrent", vec!["2.0.5", "1.2.15"]),
        ]
    }

    #[test]
    fn test_expand_full_product() {
        let cells = MatrixExpander::expand(&example_axes());
        assert_eq!(cells.len(), 4);

        let ids: Vec<String> = cells.iter().map(Cell::id).collect();
        assert_eq!(
            ids,
            vec!["x64-2.0.5", "x64-1.2.15", "x86-2.0.5", "x86-1.2.15"]
        );
    }

    #[test]
    fn test_expand_tuples_unique() {
        let axes = vec![
            MatrixAxis::new("a", vec!["1", "2", "3"]),
            MatrixAxis::new("b", vec!["x", "y"]),
            MatrixAxis::new("c", vec!["p", "q"]),
        ];
        let cells = MatrixExpander::expand(&axes);
        assert_eq!(cells.len(), 12);

        let mut ids: Vec<String> = cells.iter().map(Cell::id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 12);
    }

    #[test]
    fn test_expand_is_reproducible() {
        let axes = example_axes();
        assert_eq!(MatrixExpander::expand(&axes), MatrixExpander::expand(&axes));
    }

    #[test]
    fn test_empty_axis_yields_no_cells() {
        let axes = vec![
            MatrixAxis::new("arch", vec!["x64", "x86"]),
            MatrixAxis {
                name: "python".to_string(),
                values: vec![],
            },
        ];
        assert!(MatrixExpander::expand(&axes).is_empty());
    }

    #[test]
    fn test_cell_lookup() {
        let cells = MatrixExpander::expand(&example_axes());
        let cell = &cells[0];
        assert_eq!(cell.get("arch"), Some("x64"));
        assert_eq!(cell.get("libtorrent"), Some("2.0.5"));
        assert_eq!(cell.get("python"), None);
    }

    #[test]
    fn test_render_template() {
        let cells = MatrixExpander::expand(&example_axes());
        let name = cells[0].render("pkg-lt{libtorrent}-{arch}").unwrap();
        assert_eq!(name, "pkg-lt2.0.5-x64");
    }

    #[test]
    fn test_render_unknown_placeholder() {
        let cells = MatrixExpander::expand(&example_axes());
        let err = cells[0].render("pkg-{python}").unwrap_err();
        assert_eq!(err, TemplateError::UnknownPlaceholder("python".to_string()));
    }

    #[test]
    fn test_render_unclosed() {
        let cells = MatrixExpander::expand(&example_axes());
        assert_eq!(cells[0].render("pkg-{arch").unwrap_err(), TemplateError::Unclosed);
    }

    #[test]
    fn test_substitute_leaves_shell_syntax() {
        let cells = MatrixExpander::expand(&example_axes());
        let cmd = cells[0].substitute("build.sh {arch} ${OUT_DIR}");
        assert_eq!(cmd, "build.sh x64 ${OUT_DIR}");
    }

    #[test]
    fn test_template_placeholders() {
        let names = template_placeholders("pkg-lt{libtorrent}-{arch}").unwrap();
        assert_eq!(names, vec!["libtorrent", "arch"]);
    }
}
