//! Script error types
//!
//! [`ScriptError`] covers everything that can go wrong before a script runs
//! (lexing, parsing, name resolution). [`EvalError`] covers faults raised by
//! the VM or by the frame while a script runs.

use tally_lexer::LexError;
use thiserror::Error;

use crate::ast::Span;
use crate::bytecode::SlotId;
use crate::parser::ParseError;

/// Failure to turn script text into bytecode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unknown identifier `{name}` at {span}")]
    UnknownIdentifier { name: String, span: Span },

    #[error("unknown type `{name}` at {span}")]
    UnknownType { name: String, span: Span },

    #[error("unknown function `{name}` at {span}")]
    UnknownFunction { name: String, span: Span },

    #[error("cannot assign to `{target}` at {span}")]
    InvalidAssignment { target: String, span: Span },

    #[error("script too large: {what} exceeds its 16-bit index space")]
    TooLarge { what: &'static str },
}

/// Runtime fault raised while executing a script.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unresolved identifier `{name}`")]
    UnresolvedIdentifier { name: String },

    #[error("`{name}` is a typed input and cannot be redeclared")]
    DuplicateBinding { name: String },

    #[error("type mismatch in {operation}: expected {expected}, found {found}")]
    TypeMismatch {
        operation: String,
        expected: String,
        found: String,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in {operation}")]
    Overflow { operation: &'static str },

    #[error("no field `{field}` on {found}")]
    NoSuchField { field: String, found: String },

    #[error("function `{function}` failed: {message}")]
    FunctionFailed { function: String, message: String },

    #[error("stack underflow at op {ip}")]
    StackUnderflow { ip: usize },

    #[error("stack depth exceeded limit of {limit}")]
    StackOverflow { limit: usize },

    #[error("invalid slot {slot}")]
    InvalidSlot { slot: SlotId },

    #[error("invalid operand {index} for {table} table")]
    InvalidOperand { table: &'static str, index: usize },
}

impl EvalError {
    pub(crate) fn mismatch(operation: impl Into<String>, expected: impl Into<String>, found: &str) -> Self {
        EvalError::TypeMismatch {
            operation: operation.into(),
            expected: expected.into(),
            found: found.to_string(),
        }
    }
}
