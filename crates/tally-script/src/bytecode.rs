//! Bytecode instruction set
//!
//! Flat instruction encoding for stack-based execution. Each instruction
//! operates on an implicit operand stack; names, fields, literals and types
//! are referenced by index into the chunk's tables.

use serde::{Deserialize, Serialize};
use tally_foundation::{Value, ValueType};

use crate::error::ScriptError;

/// Index of a fixed positional input slot.
pub type SlotId = u16;

/// Bytecode instruction
///
/// Stack-based: operands are popped from stack, results pushed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    // === Literals and loads ===
    /// Push a literal value onto the stack (index into literals table)
    Literal(u16),

    /// Push the value of a fixed input slot
    LoadSlot(SlotId),

    /// Store top of stack to a fixed input slot (does not pop)
    StoreSlot(SlotId),

    /// Push the value of a name resolved through the frame (index into names table)
    LoadName(u16),

    /// Store top of stack to a name resolved through the frame (does not pop)
    StoreName(u16),

    /// Pop a value and declare a variable with it
    Declare {
        /// Index into names table
        name: u16,
        /// Declared type (index into types table), `None` for `var`
        ty: Option<u16>,
    },

    /// Check that top of stack fits a type (index into types table) and coerce it in place
    CheckType(u16),

    /// Pop a record and push one of its fields (index into fields table)
    LoadField(u16),

    // === Arithmetic ===
    /// Pop b, pop a, push a + b (numeric addition or text concatenation)
    Add,
    /// Pop b, pop a, push a - b
    Sub,
    /// Pop b, pop a, push a * b
    Mul,
    /// Pop b, pop a, push a / b
    Div,
    /// Pop b, pop a, push a % b
    Rem,
    /// Negate top of stack
    Neg,

    // === Comparison and logic ===
    /// Pop b, pop a, push a == b
    Eq,
    /// Pop b, pop a, push a != b
    Ne,
    /// Pop b, pop a, push a < b
    Lt,
    /// Pop b, pop a, push a <= b
    Le,
    /// Pop b, pop a, push a > b
    Gt,
    /// Pop b, pop a, push a >= b
    Ge,
    /// Logical NOT of a boolean
    Not,

    // === Control flow ===
    /// Pop a boolean; jump forward by offset if it is false
    JumpIfFalse(u16),

    /// Jump forward by offset unconditionally
    Jump(u16),

    /// Pop the script value and stop
    Return,

    /// Stop without a script value
    Halt,

    // === Function calls ===
    /// Call a native function with N arguments (pops N, pushes 1)
    Call {
        /// Index into the function table
        function: u16,
        /// Number of arguments to pop
        arity: u8,
    },

    // === Stack manipulation ===
    /// Pop and discard top of stack
    Pop,
}

/// A compiled bytecode chunk
///
/// Serializable and free of resolved function pointers; two compilations of
/// the same script against the same symbols produce equal chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BytecodeChunk {
    /// The instruction sequence
    pub ops: Vec<Op>,

    /// Frame-resolved variable names
    pub names: Vec<String>,

    /// Record field names
    pub fields: Vec<String>,

    /// Literal value table
    pub literals: Vec<Value>,

    /// Declared type table
    pub types: Vec<ValueType>,

    /// Native function names, parallel to the resolved function table
    pub functions: Vec<String>,

    /// Whether stores to typed slots are checked
    pub strict: bool,
}

/// Position of `item` in `table`, appending it when absent.
fn intern<T: PartialEq>(table: &mut Vec<T>, item: T, what: &'static str) -> Result<u16, ScriptError> {
    if let Some(idx) = table.iter().position(|existing| existing == &item) {
        return to_index(idx, what);
    }
    let idx = to_index(table.len(), what)?;
    table.push(item);
    Ok(idx)
}

fn to_index(idx: usize, what: &'static str) -> Result<u16, ScriptError> {
    u16::try_from(idx).map_err(|_| ScriptError::TooLarge { what })
}

impl BytecodeChunk {
    /// Create a new, empty bytecode chunk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable name, returning its index
    pub fn add_name(&mut self, name: &str) -> Result<u16, ScriptError> {
        intern(&mut self.names, name.to_string(), "name table")
    }

    /// Add a field name, returning its index
    pub fn add_field(&mut self, field: &str) -> Result<u16, ScriptError> {
        intern(&mut self.fields, field.to_string(), "field table")
    }

    /// Add a literal value, returning its index
    pub fn add_literal(&mut self, value: Value) -> Result<u16, ScriptError> {
        intern(&mut self.literals, value, "literal table")
    }

    /// Add a declared type, returning its index
    pub fn add_type(&mut self, ty: ValueType) -> Result<u16, ScriptError> {
        intern(&mut self.types, ty, "type table")
    }

    /// Add a function name, returning its index
    pub fn add_function(&mut self, name: &str) -> Result<u16, ScriptError> {
        intern(&mut self.functions, name.to_string(), "function table")
    }

    /// Emit an instruction
    pub fn emit(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// Current instruction offset (for jump patching)
    pub fn offset(&self) -> usize {
        self.ops.len()
    }

    /// Point the jump at `at` to the current offset.
    ///
    /// Offsets are relative to the instruction following the jump.
    pub fn patch_jump(&mut self, at: usize) -> Result<(), ScriptError> {
        let distance = to_index(self.ops.len() - at - 1, "jump distance")?;
        if let Some(Op::JumpIfFalse(target) | Op::Jump(target)) = self.ops.get_mut(at) {
            *target = distance;
        }
        Ok(())
    }
}
