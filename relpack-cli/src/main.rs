mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;

/// Build matrix orchestrator for release packaging pipelines
#[derive(Parser, Debug)]
#[command(name = "relpack", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full build matrix described by a run spec
    Run(commands::run::RunArgs),

    /// Validate a run spec without executing it
    Validate(commands::validate::ValidateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => commands::run::execute(args).await,
        Commands::Validate(args) => commands::validate::execute(args),
    }
}
