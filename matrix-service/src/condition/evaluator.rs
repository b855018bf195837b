// Condition Evaluator
// Evaluates parsed predicates against a cell; pure, no I/O

use crate::condition::lexer::Lexer;
use crate::condition::parser::{BinaryOp, Expr, ExprParser};
use crate::condition::ConditionError;
use crate::matrix::Cell;

use std::fmt;
use thiserror::Error;

/// Evaluation error
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Intermediate values during evaluation
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Str(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
        }
    }

    fn as_bool(&self) -> Result<bool, EvalError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(EvalError::new(format!(
                "expected a boolean, found a {}",
                other.type_name()
            ))),
        }
    }

    fn as_str(&self) -> Result<&str, EvalError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(EvalError::new(format!(
                "expected a string, found a {}",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "'{}'", s),
        }
    }
}

/// A compiled condition, parseable once at validation time and evaluable
/// against any number of cells
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Compile a condition expression
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = Lexer::new(source).tokenize()?;
        let expr = ExprParser::new(tokens).parse()?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Identifiers the condition references; each must name a matrix axis
    pub fn identifiers(&self) -> Vec<String> {
        self.expr.identifiers()
    }

    /// Evaluate the condition against a cell. The outcome depends only on
    /// the cell's axis values.
    pub fn evaluate(&self, cell: &Cell) -> Result<bool, EvalError> {
        eval(&self.expr, cell)?.as_bool().map_err(|_| {
            EvalError::new(format!(
                "condition '{}' did not evaluate to a boolean",
                self.source
            ))
        })
    }
}

/// Parse and evaluate a condition in one call
pub fn evaluate_condition(source: &str, cell: &Cell) -> Result<bool, EvalError> {
    let condition =
        Condition::parse(source).map_err(|e| EvalError::new(format!("{}", e)))?;
    condition.evaluate(cell)
}

fn eval(expr: &Expr, cell: &Cell) -> Result<Value, EvalError> {
    match expr {
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Ident(name) => match cell.get(name) {
            Some(value) => Ok(Value::Str(value.to_string())),
            None => Err(EvalError::new(format!("unknown axis '{}'", name))),
        },
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, cell)?.as_bool()?)),
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, cell),
        Expr::Call { name, args } => eval_call(name, args, cell),
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, cell: &Cell) -> Result<Value, EvalError> {
    match op {
        // && and || short-circuit
        BinaryOp::And => {
            if !eval(lhs, cell)?.as_bool()? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(rhs, cell)?.as_bool()?))
        }
        BinaryOp::Or => {
            if eval(lhs, cell)?.as_bool()? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(rhs, cell)?.as_bool()?))
        }
        BinaryOp::Eq => Ok(Value::Bool(values_equal(
            &eval(lhs, cell)?,
            &eval(rhs, cell)?,
        )?)),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(
            &eval(lhs, cell)?,
            &eval(rhs, cell)?,
        )?)),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> Result<bool, EvalError> {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (a, b) => Err(EvalError::new(format!(
            "cannot compare a {} with a {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn eval_call(name: &str, args: &[Expr], cell: &Cell) -> Result<Value, EvalError> {
    match name {
        "eq" => {
            let [a, b] = binary_args(name, args, cell)?;
            Ok(Value::Bool(values_equal(&a, &b)?))
        }
        "ne" => {
            let [a, b] = binary_args(name, args, cell)?;
            Ok(Value::Bool(!values_equal(&a, &b)?))
        }
        "contains" => {
            let [hay, needle] = binary_args(name, args, cell)?;
            Ok(Value::Bool(hay.as_str()?.contains(needle.as_str()?)))
        }
        "startsWith" => {
            let [s, prefix] = binary_args(name, args, cell)?;
            Ok(Value::Bool(s.as_str()?.starts_with(prefix.as_str()?)))
        }
        "and" => {
            for arg in args {
                if !eval(arg, cell)?.as_bool()? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "or" => {
            for arg in args {
                if eval(arg, cell)?.as_bool()? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "not" => {
            if args.len() != 1 {
                return Err(EvalError::new("not() takes exactly one argument"));
            }
            Ok(Value::Bool(!eval(&args[0], cell)?.as_bool()?))
        }
        _ => Err(EvalError::new(format!("unknown function '{}'", name))),
    }
}

fn binary_args(name: &str, args: &[Expr], cell: &Cell) -> Result<[Value; 2], EvalError> {
    if args.len() != 2 {
        return Err(EvalError::new(format!(
            "{}() takes exactly two arguments, got {}",
            name,
            args.len()
        )));
    }
    Ok([eval(&args[0], cell)?, eval(&args[1], cell)?])
}
