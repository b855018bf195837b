use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use matrix_service::{validate, MatrixExpander, SpecParser};

/// Validate a run spec without executing it
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the run spec YAML file
    pub spec: PathBuf,

    /// Also list the expanded cells and their artifact names
    #[arg(long)]
    pub cells: bool,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let spec_path = &args.spec;

    if !spec_path.exists() {
        color_eyre::eyre::bail!("Spec file not found: {}", spec_path.display());
    }

    output::status("Validating", &format!("{}", spec_path.display()));

    let spec = match SpecParser::parse_file(spec_path) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    output::check("YAML syntax valid");

    if let Err(e) = validate(&spec) {
        output::error(&format!("{}", e));
        std::process::exit(2);
    }
    output::check("matrix, conditions and templates valid");

    let cells = MatrixExpander::expand(&spec.matrix);
    output::info(&format!(
        "Run '{}': {} axes, {} cells, {} steps per cell",
        spec.name,
        spec.matrix.len(),
        cells.len(),
        spec.steps.len()
    ));

    if args.cells {
        for cell in &cells {
            match &spec.artifact_name {
                Some(template) => {
                    // Validation already proved the template renders
                    let name = cell.render(template).unwrap_or_else(|_| cell.id());
                    output::dim(&format!("  {} -> {}", cell.id(), name));
                }
                None => output::dim(&format!("  {}", cell.id())),
            }
        }
    }

    output::success("Spec is valid");
    Ok(())
}
