//! Compiler adapter
//!
//! Turns a [`BindingPlan`] into an [`Executable`]. Symbolic imports are
//! resolved exactly once, here, against a [`TypeResolver`]; the resulting
//! functions and constants are baked into the compiled script. Input slots
//! are registered in plan order so the compiled slot indices line up with
//! the [`SlotLayout`] every resolution context is built from.
//!
//! Compilation is serialized behind a [`CompileLock`] shared by everything
//! that compiles against the same backend. Executables themselves are
//! immutable and run concurrently without locking.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use tally_foundation::{Value, ValueType};
use tally_script::{
    compile_source, BytecodeChunk, CompileOptions, CompiledScript, EvalError, Executor, NativeFn,
    ScriptError, SlotId, Symbols,
};
use tracing::{debug, instrument};

use crate::config::EngineConfig;
use crate::error::{CompileCause, CompileError};
use crate::layout::SlotLayout;
use crate::plan::BindingPlan;
use crate::resolve::IndexedContext;

/// Highest supported language level.
pub const MAX_LANGUAGE_LEVEL: u32 = 5;

/// Process-wide compile serialization, injected into every compiler that
/// shares a backend.
#[derive(Debug, Clone, Default)]
pub struct CompileLock(Arc<Mutex<()>>);

impl CompileLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the lock for the duration of one compile.
    ///
    /// A panic in another compile leaves nothing half-written behind the
    /// mutex, so poisoning is ignored.
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether two handles guard the same lock.
    pub fn same_lock(&self, other: &CompileLock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Resolves symbolic imports at compile time.
pub trait TypeResolver: Send + Sync {
    fn resolve_type(&self, name: &str) -> Option<ValueType>;

    /// Static method `method` of type `owner`.
    fn resolve_method(&self, owner: &str, method: &str) -> Option<NativeFn>;

    /// Static field `field` of type `owner`; inlined as a constant.
    fn resolve_field(&self, owner: &str, field: &str) -> Option<Value>;
}

/// Built-in types, `Math` functions and numeric constants.
#[derive(Clone)]
pub struct StandardTypes {
    types: IndexMap<String, ValueType>,
    methods: IndexMap<String, NativeFn>,
    fields: IndexMap<String, Value>,
}

impl fmt::Debug for StandardTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardTypes")
            .field("types", &self.types)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("fields", &self.fields)
            .finish()
    }
}

impl Default for StandardTypes {
    fn default() -> Self {
        let mut types = IndexMap::new();
        types.insert("Object".to_string(), ValueType::Any);
        types.insert("String".to_string(), ValueType::Text);
        for boxed in ["Number", "Integer", "Long", "Short", "Byte", "Double", "Float"] {
            types.insert(boxed.to_string(), ValueType::Number);
        }
        types.insert("Boolean".to_string(), ValueType::Boolean);
        types.insert("List".to_string(), ValueType::List);
        types.insert("Math".to_string(), ValueType::Record("Math".to_string()));

        let mut methods: IndexMap<String, NativeFn> = IndexMap::new();
        methods.insert("Math.max".to_string(), Arc::new(|args: &[Value]| numeric_pair("max", args, i64::max, f64::max)));
        methods.insert("Math.min".to_string(), Arc::new(|args: &[Value]| numeric_pair("min", args, i64::min, f64::min)));
        methods.insert("Math.abs".to_string(), Arc::new(abs));

        let mut fields = IndexMap::new();
        fields.insert("Math.PI".to_string(), Value::Float(std::f64::consts::PI));
        fields.insert("Math.E".to_string(), Value::Float(std::f64::consts::E));
        fields.insert("Integer.MAX_VALUE".to_string(), Value::Integer(i64::from(i32::MAX)));
        fields.insert("Integer.MIN_VALUE".to_string(), Value::Integer(i64::from(i32::MIN)));

        Self { types, methods, fields }
    }
}

impl StandardTypes {
    pub fn with_type(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.types.insert(name.into(), ty);
        self
    }

    pub fn with_method(
        mut self,
        owner: &str,
        method: &str,
        function: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.methods.insert(format!("{owner}.{method}"), Arc::new(function));
        self
    }

    pub fn with_field(mut self, owner: &str, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(format!("{owner}.{field}"), value.into());
        self
    }
}

impl TypeResolver for StandardTypes {
    fn resolve_type(&self, name: &str) -> Option<ValueType> {
        self.types.get(name).cloned()
    }

    fn resolve_method(&self, owner: &str, method: &str) -> Option<NativeFn> {
        self.methods.get(&format!("{owner}.{method}")).cloned()
    }

    fn resolve_field(&self, owner: &str, field: &str) -> Option<Value> {
        self.fields.get(&format!("{owner}.{field}")).cloned()
    }
}

fn numeric_pair(
    name: &str,
    args: &[Value],
    int: fn(i64, i64) -> i64,
    float: fn(f64, f64) -> f64,
) -> Result<Value, String> {
    match args {
        [Value::Integer(a), Value::Integer(b)] => Ok(Value::Integer(int(*a, *b))),
        [a, b] => match (a.as_float(), b.as_float()) {
            (Some(a), Some(b)) => Ok(Value::Float(float(a, b))),
            _ => Err(format!("{name} expects two numbers, got {} and {}", a.type_name(), b.type_name())),
        },
        _ => Err(format!("{name} expects 2 arguments, got {}", args.len())),
    }
}

fn abs(args: &[Value]) -> Result<Value, String> {
    match args {
        [Value::Integer(n)] => n
            .checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| "abs overflowed".to_string()),
        [Value::Float(x)] => Ok(Value::Float(x.abs())),
        [other] => Err(format!("abs expects a number, got {}", other.type_name())),
        _ => Err(format!("abs expects 1 argument, got {}", args.len())),
    }
}

/// Primitive type names resolved without consulting imports.
fn primitive(name: &str) -> Option<ValueType> {
    match name {
        "int" | "long" | "short" | "byte" => Some(ValueType::Integer),
        "float" | "double" => Some(ValueType::Float),
        "boolean" => Some(ValueType::Boolean),
        "char" => Some(ValueType::Text),
        _ => None,
    }
}

fn simple_name(qualified: &str) -> &str {
    qualified.rsplit_once('.').map_or(qualified, |(_, simple)| simple)
}

/// Imports of one plan, resolved.
struct Imports<'a> {
    /// Simple name → (qualified name, type).
    types: IndexMap<String, (String, ValueType)>,
    /// Keyed by simple and by qualified name.
    methods: IndexMap<String, NativeFn>,
    /// Keyed by simple and by qualified name.
    fields: IndexMap<String, Value>,
    packages: &'a [String],
    resolver: &'a dyn TypeResolver,
}

impl<'a> Imports<'a> {
    fn resolve(plan: &'a BindingPlan, resolver: &'a dyn TypeResolver) -> Result<Self, CompileError> {
        let unresolved = |symbol: &str| CompileError::new(&plan.name, symbol, CompileCause::UnresolvedImport);

        let mut types = IndexMap::new();
        for name in plan.imported_types.iter() {
            let ty = resolver.resolve_type(name).ok_or_else(|| unresolved(name))?;
            types.insert(simple_name(name).to_string(), (name.clone(), ty));
        }

        let mut methods = IndexMap::new();
        for name in plan.imported_methods.iter() {
            let (owner, method) = name.rsplit_once('.').ok_or_else(|| unresolved(name))?;
            let function = resolver.resolve_method(owner, method).ok_or_else(|| unresolved(name))?;
            methods.insert(method.to_string(), Arc::clone(&function));
            methods.insert(name.clone(), function);
        }

        let mut fields = IndexMap::new();
        for name in plan.imported_fields.iter() {
            let (owner, field) = name.rsplit_once('.').ok_or_else(|| unresolved(name))?;
            let value = resolver.resolve_field(owner, field).ok_or_else(|| unresolved(name))?;
            fields.insert(field.to_string(), value.clone());
            fields.insert(name.clone(), value);
        }

        Ok(Self {
            types,
            methods,
            fields,
            packages: &plan.package_imports,
            resolver,
        })
    }

    /// Primitives, then imported simple names, then package prefixes, then
    /// the resolver as written.
    fn lookup_type(&self, name: &str) -> Option<ValueType> {
        primitive(name)
            .or_else(|| self.types.get(name).map(|(_, ty)| ty.clone()))
            .or_else(|| {
                self.packages
                    .iter()
                    .find_map(|package| self.resolver.resolve_type(&format!("{package}.{name}")))
            })
            .or_else(|| self.resolver.resolve_type(name))
    }

    /// Qualified name of an imported owner type.
    fn owner(&self, name: &str) -> Option<&str> {
        self.types
            .get(name)
            .map(|(qualified, _)| qualified.as_str())
            .or_else(|| {
                self.types
                    .values()
                    .map(|(qualified, _)| qualified.as_str())
                    .find(|qualified| *qualified == name)
            })
    }
}

/// Compile-time view of one unit.
struct UnitSymbols<'a> {
    inputs: &'a IndexMap<String, ValueType>,
    imports: &'a Imports<'a>,
}

impl Symbols for UnitSymbols<'_> {
    fn input(&self, name: &str) -> Option<(SlotId, ValueType)> {
        let (slot, _, ty) = self.inputs.get_full(name)?;
        Some((SlotId::try_from(slot).ok()?, ty.clone()))
    }

    fn constant(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.imports.fields.get(name) {
            return Some(value.clone());
        }
        let (owner, field) = name.rsplit_once('.')?;
        let owner = self.imports.owner(owner)?;
        self.imports.resolver.resolve_field(owner, field)
    }

    fn function(&self, name: &str) -> Option<NativeFn> {
        if let Some(function) = self.imports.methods.get(name) {
            return Some(Arc::clone(function));
        }
        let (owner, method) = name.rsplit_once('.')?;
        let owner = self.imports.owner(owner)?;
        self.imports.resolver.resolve_method(owner, method)
    }

    fn type_named(&self, name: &str) -> Option<ValueType> {
        self.imports.lookup_type(name)
    }
}

struct Unit {
    name: Arc<str>,
    script: CompiledScript,
    inputs: Arc<IndexMap<String, ValueType>>,
    layout: SlotLayout,
    plan: BindingPlan,
    executor: Executor,
}

/// A compiled unit, cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct Executable {
    inner: Arc<Unit>,
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("name", &self.inner.name)
            .field("inputs", &self.inner.inputs)
            .field("layout", &self.inner.layout)
            .field("ops", &self.inner.script.chunk.ops.len())
            .field("max_stack_depth", &self.inner.executor.max_stack_depth())
            .finish()
    }
}

impl Executable {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.inner.name
    }

    pub fn chunk(&self) -> &BytecodeChunk {
        &self.inner.script.chunk
    }

    pub fn layout(&self) -> &SlotLayout {
        &self.inner.layout
    }

    /// The plan this unit was compiled from.
    pub fn plan(&self) -> &BindingPlan {
        &self.inner.plan
    }

    /// Fixed inputs and their resolved types, in slot order.
    pub fn inputs(&self) -> &Arc<IndexMap<String, ValueType>> {
        &self.inner.inputs
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    /// Run against a context built for this unit's layout.
    pub fn run(&self, ctx: &mut IndexedContext) -> Result<Option<Value>, EvalError> {
        self.inner.executor.run(&self.inner.script, ctx)
    }
}

/// Compiles binding plans to executables.
#[derive(Debug, Clone)]
pub struct ScriptCompiler {
    lock: CompileLock,
    config: EngineConfig,
}

impl ScriptCompiler {
    pub fn new(lock: CompileLock, config: EngineConfig) -> Self {
        Self { lock, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lock(&self) -> &CompileLock {
        &self.lock
    }

    /// Compile one unit.
    ///
    /// Fails if the plan is malformed, an import or input type does not
    /// resolve, or the script does not compile.
    #[instrument(skip_all, fields(unit = %plan.name))]
    pub fn compile(&self, plan: &BindingPlan, resolver: &dyn TypeResolver) -> Result<Executable, CompileError> {
        let unit = plan.name.as_str();
        let _guard = self.lock.acquire();

        if !(1..=MAX_LANGUAGE_LEVEL).contains(&plan.language_level) {
            return Err(CompileError::new(
                unit,
                unit,
                CompileCause::UnsupportedLanguageLevel {
                    level: plan.language_level,
                    max: MAX_LANGUAGE_LEVEL,
                },
            ));
        }
        let layout = plan
            .validate()
            .map_err(|err| CompileError::new(unit, unit, err.into()))?;

        let imports = Imports::resolve(plan, resolver)?;

        let mut inputs = IndexMap::with_capacity(plan.input_identifiers.len());
        for (identifier, type_name) in plan.input_identifiers.iter().zip(plan.input_types.iter()) {
            let ty = imports.lookup_type(type_name).ok_or_else(|| {
                CompileError::new(
                    unit,
                    type_name.clone(),
                    CompileCause::UnresolvedType {
                        identifier: identifier.clone(),
                    },
                )
            })?;
            inputs.insert(identifier.clone(), ty);
        }

        let symbols = UnitSymbols {
            inputs: &inputs,
            imports: &imports,
        };
        let options = CompileOptions {
            strict: plan.strict_mode,
            max_nesting_depth: self.config.max_nesting_depth,
        };
        let script = compile_source(plan.expression.trim(), &symbols, &options)
            .map_err(|err| CompileError::new(unit, script_symbol(&err, unit), err.into()))?;

        debug!(
            ops = script.chunk.ops.len(),
            slots = layout.len(),
            functions = script.functions.len(),
            strict = plan.strict_mode,
            "compiled unit"
        );

        Ok(Executable {
            inner: Arc::new(Unit {
                name: Arc::from(unit),
                script,
                inputs: Arc::new(inputs),
                layout,
                plan: plan.clone(),
                executor: Executor::new(self.config.max_stack_depth),
            }),
        })
    }
}

/// The symbol a script error is about, or the unit itself.
fn script_symbol(err: &ScriptError, unit: &str) -> String {
    match err {
        ScriptError::UnknownIdentifier { name, .. }
        | ScriptError::UnknownType { name, .. }
        | ScriptError::UnknownFunction { name, .. } => name.clone(),
        ScriptError::InvalidAssignment { target, .. } => target.clone(),
        _ => unit.to_string(),
    }
}
