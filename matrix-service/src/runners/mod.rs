// Runners Module
// Executes step commands against external collaborators

pub mod shell;

pub use shell::{OutputCallback, ShellConfig, ShellOutput, ShellRunner};
