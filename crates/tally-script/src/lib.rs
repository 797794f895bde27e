// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Tally script backend
//!
//! Turns accumulate script text into a flat bytecode chunk and runs it on a
//! small stack VM.
//!
//! - `parser`: hand-written recursive descent parser (Pratt for expressions)
//! - `compiler`: AST → [`BytecodeChunk`], resolving names through [`Symbols`]
//! - `executor`: stack VM over a caller-supplied [`Frame`]
//!
//! The backend knows nothing about facts, bindings or accumulators. The
//! surrounding engine decides which names are fixed slots, which are inlined
//! constants and which functions are callable.

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod error;
pub mod executor;
mod ops;
pub mod parser;

pub use bytecode::{BytecodeChunk, Op, SlotId};
pub use compiler::{compile_script, compile_source, CompileOptions, CompiledScript, NativeFn, Symbols};
pub use error::{EvalError, ScriptError};
pub use executor::{execute, Executor, Frame, DEFAULT_MAX_STACK_DEPTH};
pub use parser::{parse_script, ParseError, DEFAULT_MAX_NESTING_DEPTH};
