//! Core errors
//!
//! One enum per concern. Compile errors happen at rule-build time; context
//! and accumulate errors happen per evaluation and are never retried.

use tally_foundation::{BindingId, FactId};
use tally_script::{EvalError, ScriptError};
use thiserror::Error;

/// A binding plan violates its structural invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("{identifiers} input identifiers but {types} input types")]
    InputTypeCountMismatch { identifiers: usize, types: usize },

    #[error("input identifier `{identifier}` is declared twice")]
    DuplicateInput { identifier: String },

    #[error("{binding} (`{identifier}`) appears in both previous and local bindings")]
    BindingInBothLists { binding: BindingId, identifier: String },

    #[error("{inputs} inputs cannot hold {fixed} engine/global/binding/other slots plus at most one fact slot")]
    LayoutMismatch { inputs: usize, fixed: usize },

    #[error("slot {slot} is `{found}` but the layout expects `{expected}`")]
    SlotNameMismatch {
        slot: usize,
        expected: String,
        found: String,
    },

    #[error("{inputs} inputs exceed the slot index space")]
    TooManyInputs { inputs: usize },
}

/// Failure to compile one unit of an accumulator.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{unit}: cannot compile `{symbol}`: {cause}")]
pub struct CompileError {
    /// Name of the compilation unit.
    pub unit: String,
    /// The offending import, type, identifier, or the unit name itself.
    pub symbol: String,
    #[source]
    pub cause: CompileCause,
}

impl CompileError {
    pub(crate) fn new(unit: &str, symbol: impl Into<String>, cause: CompileCause) -> Self {
        Self {
            unit: unit.to_string(),
            symbol: symbol.into(),
            cause,
        }
    }
}

/// Why a compile failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileCause {
    #[error("unresolved import")]
    UnresolvedImport,

    #[error("unresolved type for input `{identifier}`")]
    UnresolvedType { identifier: String },

    #[error("invalid binding plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("language level {level} is not supported (expected 1..={max})")]
    UnsupportedLanguageLevel { level: u32, max: u32 },

    #[error("reverse unit inputs differ from the action unit inputs")]
    ReverseLayoutMismatch,

    #[error("unit does not share the accumulator's other identifiers")]
    OtherIdentifiersMismatch,
}

/// Building an indexed resolution context failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    #[error("{unit}: binding `{identifier}` reads tuple offset {offset}, but the match group has {len} facts")]
    MissingTupleFact {
        unit: String,
        identifier: String,
        offset: usize,
        len: usize,
    },

    #[error("{unit}: binding `{identifier}` reads missing field `{field}`")]
    MissingField {
        unit: String,
        identifier: String,
        field: String,
    },

    #[error("{unit}: layout has a fact slot but no fact was supplied")]
    MissingFact { unit: String },

    #[error("{unit}: expected {expected} other values, got {found}")]
    OtherValuesMismatch {
        unit: String,
        expected: usize,
        found: usize,
    },
}

/// Accumulator operation failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccumulateError {
    #[error("accumulator is not compiled")]
    NotCompiled,

    #[error("accumulator does not support {operation}")]
    UnsupportedOperation { operation: &'static str },

    #[error("no snapshot recorded for {fact}")]
    MissingSnapshot { fact: FactId },

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Context(#[from] ContextError),
}
