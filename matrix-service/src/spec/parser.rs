// Run spec parsing
// Reads the YAML run spec into the data model with friendly errors

use crate::spec::error::SpecError;
use crate::spec::models::RunSpec;

use std::path::Path;

/// Parses YAML run specs
pub struct SpecParser;

impl SpecParser {
    /// Parse a run spec from a file
    pub fn parse_file(path: &Path) -> Result<RunSpec, SpecError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SpecError::io_error(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::parse_str(&content)
    }

    /// Parse a run spec from a string
    pub fn parse_str(source: &str) -> Result<RunSpec, SpecError> {
        serde_yaml::from_str(source).map_err(|e| SpecError::from_yaml_error(&e, source))
    }
}
