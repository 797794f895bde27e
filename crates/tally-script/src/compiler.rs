//! Bytecode compiler
//!
//! Compiles a parsed [`Script`] to a flat [`BytecodeChunk`]. Every name is
//! classified once, at compile time:
//!
//! - fixed inputs (reported by [`Symbols::input`]) become `LoadSlot`/`StoreSlot`
//! - constants are inlined as literals
//! - everything else goes through the frame by name (`LoadName`/`StoreName`)
//!
//! In strict mode an identifier that is neither an input, a constant nor a
//! variable declared earlier in the script is a compile error, and stores to
//! typed inputs are type checked.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tally_foundation::{Value, ValueType};

use crate::ast::{AssignOp, BinaryOp, Expr, ExprKind, Script, Span, Stmt, UnaryOp};
use crate::bytecode::{BytecodeChunk, Op, SlotId};
use crate::error::ScriptError;
use crate::parser::{parse_script_with_depth, DEFAULT_MAX_NESTING_DEPTH};

/// Native function callable from scripts.
///
/// Failures are reported as plain messages and surface as
/// [`EvalError::FunctionFailed`](crate::EvalError::FunctionFailed).
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Compile-time view of the names a script may reference.
pub trait Symbols {
    /// Fixed positional input with its declared type.
    fn input(&self, name: &str) -> Option<(SlotId, ValueType)>;

    /// Constant inlined at compile time. Called with simple names and with
    /// qualified paths (`Math.PI`).
    fn constant(&self, name: &str) -> Option<Value>;

    /// Callable function by simple name or qualified path.
    fn function(&self, name: &str) -> Option<NativeFn>;

    /// Type named in a typed declaration.
    fn type_named(&self, name: &str) -> Option<ValueType>;
}

/// Compilation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub strict: bool,
    /// Deepest nesting the parser accepts before failing with a parse error.
    pub max_nesting_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            strict: false,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

/// A compiled script: serializable bytecode plus its resolved functions.
#[derive(Clone)]
pub struct CompiledScript {
    pub chunk: BytecodeChunk,
    /// Resolved functions, parallel to `chunk.functions`.
    pub functions: Vec<NativeFn>,
}

impl fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledScript")
            .field("chunk", &self.chunk)
            .field("functions", &self.chunk.functions)
            .finish()
    }
}

struct Compiler<'a> {
    chunk: BytecodeChunk,
    functions: Vec<NativeFn>,
    symbols: &'a dyn Symbols,
    strict: bool,
    declared: HashSet<String>,
}

/// Where a name lives.
enum Target {
    Slot(SlotId, ValueType),
    Local,
    Constant(Value),
    Unknown,
}

impl<'a> Compiler<'a> {
    fn new(symbols: &'a dyn Symbols, options: &CompileOptions) -> Self {
        Self {
            chunk: BytecodeChunk {
                strict: options.strict,
                ..BytecodeChunk::default()
            },
            functions: Vec::new(),
            symbols,
            strict: options.strict,
            declared: HashSet::new(),
        }
    }

    fn classify(&self, name: &str) -> Target {
        if let Some((slot, ty)) = self.symbols.input(name) {
            Target::Slot(slot, ty)
        } else if self.declared.contains(name) {
            Target::Local
        } else if let Some(value) = self.symbols.constant(name) {
            Target::Constant(value)
        } else {
            Target::Unknown
        }
    }

    fn finish(self) -> CompiledScript {
        CompiledScript {
            chunk: self.chunk,
            functions: self.functions,
        }
    }

    fn compile_script(&mut self, script: &Script) -> Result<(), ScriptError> {
        let Some((last, rest)) = script.statements.split_last() else {
            return Ok(());
        };
        for stmt in rest {
            self.compile_stmt(stmt)?;
        }
        // A trailing expression statement is the script's value.
        match last {
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.chunk.emit(Op::Return);
            }
            other => self.compile_stmt(other)?,
        }
        Ok(())
    }

    fn compile_block(&mut self, statements: &[Stmt]) -> Result<(), ScriptError> {
        statements.iter().try_for_each(|stmt| self.compile_stmt(stmt))
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), ScriptError> {
        match stmt {
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.chunk.emit(Op::Pop);
            }

            Stmt::Assign {
                target,
                op,
                value,
                span,
            } => {
                match op {
                    AssignOp::Set => self.compile_expr(value)?,
                    AssignOp::Add | AssignOp::Sub => {
                        self.compile_ident(target, *span)?;
                        self.compile_expr(value)?;
                        self.chunk.emit(if *op == AssignOp::Add { Op::Add } else { Op::Sub });
                    }
                }
                self.compile_store(target, *span)?;
                self.chunk.emit(Op::Pop);
            }

            Stmt::Declare {
                name,
                ty,
                value,
                span,
            } => {
                let ty = match ty {
                    Some(type_name) => {
                        let ty = self.symbols.type_named(type_name).ok_or_else(|| {
                            ScriptError::UnknownType {
                                name: type_name.clone(),
                                span: *span,
                            }
                        })?;
                        Some(self.chunk.add_type(ty)?)
                    }
                    None => None,
                };
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.emit_literal(Value::Null)?,
                }
                let name_idx = self.chunk.add_name(name)?;
                self.chunk.emit(Op::Declare { name: name_idx, ty });
                self.declared.insert(name.clone());
            }

            Stmt::If {
                condition,
                then_block,
                else_block,
            } => {
                self.compile_expr(condition)?;
                let jump_to_else = self.emit_jump(Op::JumpIfFalse(0));
                self.compile_block(then_block)?;
                match else_block {
                    Some(else_block) => {
                        let jump_over_else = self.emit_jump(Op::Jump(0));
                        self.chunk.patch_jump(jump_to_else)?;
                        self.compile_block(else_block)?;
                        self.chunk.patch_jump(jump_over_else)?;
                    }
                    None => self.chunk.patch_jump(jump_to_else)?,
                }
            }

            Stmt::Return(Some(value)) => {
                self.compile_expr(value)?;
                self.chunk.emit(Op::Return);
            }
            Stmt::Return(None) => self.chunk.emit(Op::Halt),
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), ScriptError> {
        match &expr.kind {
            ExprKind::Null => self.emit_literal(Value::Null)?,
            ExprKind::Bool(b) => self.emit_literal(Value::Boolean(*b))?,
            ExprKind::Integer(n) => self.emit_literal(Value::Integer(*n))?,
            ExprKind::Float(x) => self.emit_literal(Value::Float(*x))?,
            ExprKind::Text(s) => self.emit_literal(Value::Text(s.clone()))?,
            ExprKind::Ident(name) => self.compile_ident(name, expr.span)?,

            ExprKind::Field { object, field } => {
                if let Some(value) = self.qualified_constant(expr) {
                    self.emit_literal(value)?;
                } else {
                    self.compile_expr(object)?;
                    let idx = self.chunk.add_field(field)?;
                    self.chunk.emit(Op::LoadField(idx));
                }
            }

            ExprKind::Call { function, args } => {
                let native = self.symbols.function(function).ok_or_else(|| {
                    ScriptError::UnknownFunction {
                        name: function.clone(),
                        span: expr.span,
                    }
                })?;
                let arity = u8::try_from(args.len())
                    .map_err(|_| ScriptError::TooLarge { what: "argument list" })?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                let idx = self.chunk.add_function(function)?;
                if usize::from(idx) == self.functions.len() {
                    self.functions.push(native);
                }
                self.chunk.emit(Op::Call {
                    function: idx,
                    arity,
                });
            }

            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.chunk.emit(match op {
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Not => Op::Not,
                });
            }

            ExprKind::Binary { op, left, right } => match binary_instruction(*op) {
                Some(instruction) => {
                    self.compile_expr(left)?;
                    self.compile_expr(right)?;
                    self.chunk.emit(instruction);
                }
                None => self.compile_short_circuit(*op, left, right)?,
            },

            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                self.compile_expr(condition)?;
                let jump_to_else = self.emit_jump(Op::JumpIfFalse(0));
                self.compile_expr(then)?;
                let jump_over_else = self.emit_jump(Op::Jump(0));
                self.chunk.patch_jump(jump_to_else)?;
                self.compile_expr(otherwise)?;
                self.chunk.patch_jump(jump_over_else)?;
            }
        }
        Ok(())
    }

    /// `&&` and `||` compile to jumps; both operands must be booleans.
    fn compile_short_circuit(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<(), ScriptError> {
        self.compile_expr(left)?;
        let left_false = self.emit_jump(Op::JumpIfFalse(0));
        let mut to_end = Vec::new();
        if op == BinaryOp::Or {
            self.emit_literal(Value::Boolean(true))?;
            to_end.push(self.emit_jump(Op::Jump(0)));
            self.chunk.patch_jump(left_false)?;
        }
        self.compile_expr(right)?;
        let right_false = self.emit_jump(Op::JumpIfFalse(0));
        self.emit_literal(Value::Boolean(true))?;
        to_end.push(self.emit_jump(Op::Jump(0)));
        if op == BinaryOp::And {
            self.chunk.patch_jump(left_false)?;
        }
        self.chunk.patch_jump(right_false)?;
        self.emit_literal(Value::Boolean(false))?;
        for jump in to_end {
            self.chunk.patch_jump(jump)?;
        }
        Ok(())
    }

    fn compile_ident(&mut self, name: &str, span: Span) -> Result<(), ScriptError> {
        match self.classify(name) {
            Target::Slot(slot, _) => self.chunk.emit(Op::LoadSlot(slot)),
            Target::Constant(value) => self.emit_literal(value)?,
            Target::Unknown if self.strict => {
                return Err(ScriptError::UnknownIdentifier {
                    name: name.to_string(),
                    span,
                })
            }
            Target::Local | Target::Unknown => {
                let idx = self.chunk.add_name(name)?;
                self.chunk.emit(Op::LoadName(idx));
            }
        }
        Ok(())
    }

    fn compile_store(&mut self, name: &str, span: Span) -> Result<(), ScriptError> {
        match self.classify(name) {
            Target::Slot(slot, ty) => {
                if self.strict && ty.is_constrained() {
                    let idx = self.chunk.add_type(ty)?;
                    self.chunk.emit(Op::CheckType(idx));
                }
                self.chunk.emit(Op::StoreSlot(slot));
            }
            Target::Constant(_) => {
                return Err(ScriptError::InvalidAssignment {
                    target: name.to_string(),
                    span,
                })
            }
            Target::Unknown if self.strict => {
                return Err(ScriptError::UnknownIdentifier {
                    name: name.to_string(),
                    span,
                })
            }
            Target::Local | Target::Unknown => {
                let idx = self.chunk.add_name(name)?;
                self.chunk.emit(Op::StoreName(idx));
            }
        }
        Ok(())
    }

    /// `Owner.FIELD` paths that name a constant, unless the root is a
    /// variable in scope.
    fn qualified_constant(&self, expr: &Expr) -> Option<Value> {
        let root = expr.root_ident()?;
        if matches!(self.classify(root), Target::Slot(..) | Target::Local) {
            return None;
        }
        self.symbols.constant(&expr.as_path()?)
    }

    fn emit_literal(&mut self, value: Value) -> Result<(), ScriptError> {
        let idx = self.chunk.add_literal(value)?;
        self.chunk.emit(Op::Literal(idx));
        Ok(())
    }

    fn emit_jump(&mut self, op: Op) -> usize {
        let at = self.chunk.offset();
        self.chunk.emit(op);
        at
    }
}

/// Instruction for a strict binary operator; `None` for `&&` and `||`.
fn binary_instruction(op: BinaryOp) -> Option<Op> {
    let instruction = match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Rem => Op::Rem,
        BinaryOp::Eq => Op::Eq,
        BinaryOp::Ne => Op::Ne,
        BinaryOp::Lt => Op::Lt,
        BinaryOp::Le => Op::Le,
        BinaryOp::Gt => Op::Gt,
        BinaryOp::Ge => Op::Ge,
        BinaryOp::And | BinaryOp::Or => return None,
    };
    Some(instruction)
}

/// Compile a parsed script.
pub fn compile_script(
    script: &Script,
    symbols: &dyn Symbols,
    options: &CompileOptions,
) -> Result<CompiledScript, ScriptError> {
    let mut compiler = Compiler::new(symbols, options);
    compiler.compile_script(script)?;
    Ok(compiler.finish())
}

/// Parse and compile script source.
pub fn compile_source(
    source: &str,
    symbols: &dyn Symbols,
    options: &CompileOptions,
) -> Result<CompiledScript, ScriptError> {
    let script = parse_script_with_depth(source, options.max_nesting_depth)?;
    compile_script(&script, symbols, options)
}
