// Run Specification Module
// Parses and validates the declarative matrix run spec

pub mod error;
pub mod models;
pub mod parser;
pub mod validate;

pub use error::{SpecError, SpecErrorKind};
pub use models::{CacheSpec, RunSpec, StepSpec};
pub use parser::SpecParser;
pub use validate::{validate, MatrixConfigError};
