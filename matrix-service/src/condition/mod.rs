// Condition Engine Module
// Pure predicate expressions over cell values

pub mod evaluator;
pub mod lexer;
pub mod parser;

pub use evaluator::{evaluate_condition, Condition, EvalError};
pub use lexer::{LexError, Lexer, Token};
pub use parser::{BinaryOp, Expr, ExprParser, ParseExprError};

use thiserror::Error;

/// Error compiling a condition expression
#[derive(Debug, Clone, Error)]
pub enum ConditionError {
    #[error("{0}")]
    Lex(#[from] LexError),
    #[error("{0}")]
    Parse(#[from] ParseExprError),
}
