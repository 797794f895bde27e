//! Bytecode executor
//!
//! Stack-based VM that executes compiled bytecode against a [`Frame`]. The
//! frame owns every variable; the VM owns only its operand stack.

use std::cmp::Ordering;

use tally_foundation::{Value, ValueType};

use crate::bytecode::{Op, SlotId};
use crate::compiler::CompiledScript;
use crate::error::EvalError;
use crate::ops::{self, Arith};

/// Default operand stack limit.
pub const DEFAULT_MAX_STACK_DEPTH: usize = 1024;

/// Variable storage a script runs against.
pub trait Frame {
    /// Value of a fixed input slot.
    fn load_slot(&self, slot: SlotId) -> Result<Value, EvalError>;

    /// Overwrite a fixed input slot.
    fn store_slot(&mut self, slot: SlotId, value: Value) -> Result<(), EvalError>;

    /// Value of a name outside the fixed slots.
    fn load_name(&self, name: &str) -> Result<Value, EvalError>;

    /// Assign a name outside the fixed slots.
    fn store_name(&mut self, name: &str, value: Value) -> Result<(), EvalError>;

    /// Declare a variable. `ty` is the declared type of a typed declaration;
    /// the value has already been checked against it.
    fn declare(&mut self, name: &str, value: Value, ty: Option<&ValueType>) -> Result<(), EvalError>;
}

/// Operand stack with a depth limit.
struct Stack {
    values: Vec<Value>,
    limit: usize,
}

impl Stack {
    fn new(limit: usize) -> Self {
        Self {
            values: Vec::with_capacity(limit.min(32)),
            limit,
        }
    }

    fn push(&mut self, value: Value) -> Result<(), EvalError> {
        if self.values.len() >= self.limit {
            return Err(EvalError::StackOverflow { limit: self.limit });
        }
        self.values.push(value);
        Ok(())
    }

    fn pop(&mut self, ip: usize) -> Result<Value, EvalError> {
        self.values.pop().ok_or(EvalError::StackUnderflow { ip })
    }

    fn top(&mut self, ip: usize) -> Result<&mut Value, EvalError> {
        self.values.last_mut().ok_or(EvalError::StackUnderflow { ip })
    }

    fn pop_pair(&mut self, ip: usize) -> Result<(Value, Value), EvalError> {
        let b = self.pop(ip)?;
        let a = self.pop(ip)?;
        Ok((a, b))
    }

    fn pop_n(&mut self, n: usize, ip: usize) -> Result<Vec<Value>, EvalError> {
        let start = self
            .values
            .len()
            .checked_sub(n)
            .ok_or(EvalError::StackUnderflow { ip })?;
        Ok(self.values.split_off(start))
    }
}

fn entry<'c, T>(table: &'c [T], index: u16, name: &'static str) -> Result<&'c T, EvalError> {
    table.get(usize::from(index)).ok_or(EvalError::InvalidOperand {
        table: name,
        index: usize::from(index),
    })
}

fn relational(
    stack: &mut Stack,
    ip: usize,
    symbol: &'static str,
    test: fn(Ordering) -> bool,
) -> Result<(), EvalError> {
    let (a, b) = stack.pop_pair(ip)?;
    let holds = ops::compare(symbol, &a, &b)?.is_some_and(test);
    stack.push(Value::Boolean(holds))
}

/// Stack VM configured with an operand stack limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executor {
    max_stack_depth: usize,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STACK_DEPTH)
    }
}

impl Executor {
    pub fn new(max_stack_depth: usize) -> Self {
        Self { max_stack_depth }
    }

    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    /// Run a script to completion.
    ///
    /// Returns the value of `return` or of the trailing expression statement,
    /// `None` when the script ends without one.
    pub fn run(&self, script: &CompiledScript, frame: &mut dyn Frame) -> Result<Option<Value>, EvalError> {
        let chunk = &script.chunk;
        let mut stack = Stack::new(self.max_stack_depth);
        let mut ip = 0;

        while let Some(&op) = chunk.ops.get(ip) {
            let mut next = ip + 1;

            match op {
                Op::Literal(idx) => {
                    stack.push(entry(&chunk.literals, idx, "literal")?.clone())?;
                }

                Op::LoadSlot(slot) => {
                    stack.push(frame.load_slot(slot)?)?;
                }

                Op::StoreSlot(slot) => {
                    let value = stack.top(ip)?.clone();
                    frame.store_slot(slot, value)?;
                }

                Op::LoadName(idx) => {
                    let name = entry(&chunk.names, idx, "name")?;
                    stack.push(frame.load_name(name)?)?;
                }

                Op::StoreName(idx) => {
                    let name = entry(&chunk.names, idx, "name")?;
                    let value = stack.top(ip)?.clone();
                    frame.store_name(name, value)?;
                }

                Op::Declare { name, ty } => {
                    let name = entry(&chunk.names, name, "name")?;
                    let mut value = stack.pop(ip)?;
                    let ty = match ty {
                        Some(idx) => {
                            let ty = entry(&chunk.types, idx, "type")?;
                            if !ty.accepts(&value) {
                                return Err(EvalError::mismatch(
                                    format!("declaration of `{name}`"),
                                    ty.to_string(),
                                    value.type_name(),
                                ));
                            }
                            value = ty.coerce(value);
                            Some(ty)
                        }
                        None => None,
                    };
                    frame.declare(name, value, ty)?;
                }

                Op::CheckType(idx) => {
                    let ty = entry(&chunk.types, idx, "type")?;
                    let top = stack.top(ip)?;
                    if !ty.accepts(top) {
                        return Err(EvalError::mismatch("assignment", ty.to_string(), top.type_name()));
                    }
                    *top = ty.coerce(std::mem::take(top));
                }

                Op::LoadField(idx) => {
                    let field = entry(&chunk.fields, idx, "field")?;
                    let object = stack.pop(ip)?;
                    let value = object.field(field).cloned().ok_or_else(|| EvalError::NoSuchField {
                        field: field.clone(),
                        found: object.type_name().to_string(),
                    })?;
                    stack.push(value)?;
                }

                Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Rem => {
                    let arith = match op {
                        Op::Add => Arith::Add,
                        Op::Sub => Arith::Sub,
                        Op::Mul => Arith::Mul,
                        Op::Div => Arith::Div,
                        _ => Arith::Rem,
                    };
                    let (a, b) = stack.pop_pair(ip)?;
                    stack.push(ops::arithmetic(arith, a, b)?)?;
                }

                Op::Neg => {
                    let a = stack.pop(ip)?;
                    stack.push(ops::negate(a)?)?;
                }

                Op::Not => {
                    let a = stack.pop(ip)?;
                    stack.push(ops::not(a)?)?;
                }

                Op::Eq | Op::Ne => {
                    let (a, b) = stack.pop_pair(ip)?;
                    let equal = ops::equals(&a, &b);
                    stack.push(Value::Boolean(if op == Op::Eq { equal } else { !equal }))?;
                }

                Op::Lt => relational(&mut stack, ip, "<", Ordering::is_lt)?,
                Op::Le => relational(&mut stack, ip, "<=", Ordering::is_le)?,
                Op::Gt => relational(&mut stack, ip, ">", Ordering::is_gt)?,
                Op::Ge => relational(&mut stack, ip, ">=", Ordering::is_ge)?,

                Op::JumpIfFalse(offset) => {
                    let condition = stack.pop(ip)?;
                    if !ops::truthy(&condition)? {
                        next += usize::from(offset);
                    }
                }

                Op::Jump(offset) => {
                    next += usize::from(offset);
                }

                Op::Return => return stack.pop(ip).map(Some),

                Op::Halt => return Ok(None),

                Op::Call { function, arity } => {
                    let name = entry(&chunk.functions, function, "function")?;
                    let native = entry(&script.functions, function, "function")?;
                    let args = stack.pop_n(usize::from(arity), ip)?;
                    let result = native(args.as_slice()).map_err(|message| EvalError::FunctionFailed {
                        function: name.clone(),
                        message,
                    })?;
                    stack.push(result)?;
                }

                Op::Pop => {
                    stack.pop(ip)?;
                }
            }

            ip = next;
        }

        Ok(None)
    }
}

/// Run a script with the default stack limit.
pub fn execute(script: &CompiledScript, frame: &mut dyn Frame) -> Result<Option<Value>, EvalError> {
    Executor::default().run(script, frame)
}
