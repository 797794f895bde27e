//! Indexed resolution
//!
//! An [`IndexedContext`] is the frame a compiled unit runs against. Fixed
//! inputs live in a flat value array addressed by slot; every other name is
//! looked up through a chain of [`VariableResolver`]s:
//!
//! ```text
//! slots ─▶ ScopeResolver (per call, helper variables) ─▶ PackageResolver (read-only)
//! ```
//!
//! Contexts are built once per evaluation call. The accumulator keeps the
//! one used for a fold so the exact same inputs can be replayed on reverse.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tally_foundation::{Value, ValueType};
use tally_script::{EvalError, Frame, SlotId};
use tracing::trace;

use crate::compile::Executable;
use crate::error::ContextError;
use crate::layout::{Segment, SlotLayout};
use crate::memory::{Fact, MatchGroup, WorkingMemory};
use crate::plan::{Binding, Extractor};

/// One link in a resolution chain.
pub trait VariableResolver: fmt::Debug + Send + Sync {
    /// Value of `name` in this link only.
    fn local(&self, name: &str) -> Option<&Value>;

    /// Overwrite `name` in this link only. Hands the value back when the
    /// link does not hold `name` or is read-only.
    fn assign_local(&mut self, name: &str, value: Value) -> Result<(), Value>;

    fn next(&self) -> Option<&dyn VariableResolver>;

    fn next_mut(&mut self) -> Option<&mut (dyn VariableResolver + 'static)>;

    /// Value of `name` in this link or any link after it.
    fn resolve(&self, name: &str) -> Option<&Value> {
        self.local(name).or_else(|| self.next()?.resolve(name))
    }

    /// Overwrite the first binding of `name` along the chain.
    fn assign(&mut self, name: &str, value: Value) -> Result<(), Value> {
        let value = match self.assign_local(name, value) {
            Ok(()) => return Ok(()),
            Err(value) => value,
        };
        match self.next_mut() {
            Some(next) => next.assign(name, value),
            None => Err(value),
        }
    }
}

/// Mutable scope holding variables a script declares.
#[derive(Debug, Default)]
pub struct ScopeResolver {
    variables: IndexMap<String, Value>,
    next: Option<Box<dyn VariableResolver>>,
}

impl ScopeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next(mut self, next: Box<dyn VariableResolver>) -> Self {
        self.next = Some(next);
        self
    }

    /// Create or shadow `name` in this scope.
    pub fn define(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn variables(&self) -> &IndexMap<String, Value> {
        &self.variables
    }
}

impl VariableResolver for ScopeResolver {
    fn local(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    fn assign_local(&mut self, name: &str, value: Value) -> Result<(), Value> {
        match self.variables.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(value),
        }
    }

    fn next(&self) -> Option<&dyn VariableResolver> {
        self.next.as_deref()
    }

    fn next_mut(&mut self) -> Option<&mut (dyn VariableResolver + 'static)> {
        self.next.as_deref_mut()
    }
}

/// Named values shared by every rule of a package.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageScope {
    pub name: String,
    values: IndexMap<String, Value>,
}

impl PackageScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: IndexMap::new(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Terminal, read-only link over a [`PackageScope`].
#[derive(Debug, Clone)]
pub struct PackageResolver(pub Arc<PackageScope>);

impl VariableResolver for PackageResolver {
    fn local(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    fn assign_local(&mut self, _name: &str, value: Value) -> Result<(), Value> {
        Err(value)
    }

    fn next(&self) -> Option<&dyn VariableResolver> {
        None
    }

    fn next_mut(&mut self) -> Option<&mut (dyn VariableResolver + 'static)> {
        None
    }
}

/// Positional resolution context for one evaluation of one unit.
#[derive(Debug)]
pub struct IndexedContext {
    unit: Arc<str>,
    /// Slot name → declared type; the index of an entry is its slot.
    inputs: Arc<IndexMap<String, ValueType>>,
    values: Vec<Value>,
    layout: SlotLayout,
    scope: ScopeResolver,
}

impl IndexedContext {
    /// Lay out the slots of `unit` for one evaluation.
    ///
    /// `fact` fills the fact slot and feeds the local bindings; it is ignored
    /// by units without a fact slot. Previous bindings read `tuple`.
    pub fn build(
        unit: &Executable,
        fact: Option<&Fact>,
        tuple: &dyn MatchGroup,
        memory: &dyn WorkingMemory,
        other_values: &[Value],
    ) -> Result<Self, ContextError> {
        let layout = *unit.layout();
        let plan = unit.plan();
        let mut values = Vec::with_capacity(layout.len());

        for segment in Segment::ALL {
            match segment {
                Segment::Fact if layout.has_fact_slot() => {
                    let fact = fact.ok_or_else(|| ContextError::MissingFact {
                        unit: unit.name().to_string(),
                    })?;
                    values.push(fact.value.clone());
                }
                Segment::Fact => {}
                Segment::Engine => {
                    values.extend(plan.engine_identifiers.iter().map(|name| memory.engine_handle(name)));
                }
                Segment::Globals => values.extend(
                    plan.global_identifiers
                        .iter()
                        .map(|name| memory.global(name).unwrap_or_default()),
                ),
                Segment::Previous => {
                    for binding in &plan.previous_bindings {
                        let source = tuple.fact(binding.pattern_offset).ok_or_else(|| {
                            ContextError::MissingTupleFact {
                                unit: unit.name().to_string(),
                                identifier: binding.identifier.clone(),
                                offset: binding.pattern_offset,
                                len: tuple.len(),
                            }
                        })?;
                        values.push(extract(unit, binding, &source.value)?);
                    }
                }
                Segment::Locals => {
                    for binding in &plan.local_bindings {
                        let value = match fact {
                            Some(fact) => extract(unit, binding, &fact.value)?,
                            None => Value::Null,
                        };
                        values.push(value);
                    }
                }
                Segment::Other => {
                    let expected = layout.segment_len(Segment::Other);
                    if other_values.len() != expected {
                        return Err(ContextError::OtherValuesMismatch {
                            unit: unit.name().to_string(),
                            expected,
                            found: other_values.len(),
                        });
                    }
                    values.extend_from_slice(other_values);
                }
            }
            debug_assert_eq!(values.len(), layout.range(segment).end);
        }

        let scope = match memory.package_scope() {
            Some(package) => ScopeResolver::new().with_next(Box::new(PackageResolver(package))),
            None => ScopeResolver::new(),
        };

        trace!(unit = %unit.name(), slots = values.len(), "built resolution context");

        Ok(Self {
            unit: Arc::clone(unit.name_arc()),
            inputs: Arc::clone(unit.inputs()),
            values,
            layout,
            scope,
        })
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn layout(&self) -> &SlotLayout {
        &self.layout
    }

    /// All slot values in layout order.
    pub fn slots(&self) -> &[Value] {
        &self.values
    }

    /// Slot values of one segment.
    pub fn segment(&self, segment: Segment) -> &[Value] {
        &self.values[self.layout.range(segment)]
    }

    /// Current aggregate-state values.
    pub fn other_values(&self) -> &[Value] {
        self.segment(Segment::Other)
    }

    /// Overwrite the aggregate-state segment, leaving every other slot as is.
    pub fn set_other_values(&mut self, others: &[Value]) -> Result<(), ContextError> {
        let range = self.layout.other_range();
        if others.len() != range.len() {
            return Err(ContextError::OtherValuesMismatch {
                unit: self.unit.to_string(),
                expected: range.len(),
                found: others.len(),
            });
        }
        self.values[range].clone_from_slice(others);
        Ok(())
    }

    /// Resolve a name: fixed slot first, then the fallback chain.
    pub fn resolve(&self, name: &str) -> Result<Value, EvalError> {
        if let Some(slot) = self.inputs.get_index_of(name) {
            if let Some(value) = self.values.get(slot) {
                return Ok(value.clone());
            }
        }
        self.scope
            .resolve(name)
            .cloned()
            .ok_or_else(|| EvalError::UnresolvedIdentifier {
                name: name.to_string(),
            })
    }

    /// Helper variables declared by the script so far.
    pub fn helpers(&self) -> &IndexMap<String, Value> {
        self.scope.variables()
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut Value, EvalError> {
        self.values.get_mut(slot).ok_or(EvalError::InvalidSlot {
            slot: SlotId::try_from(slot).unwrap_or(SlotId::MAX),
        })
    }
}

fn extract(unit: &Executable, binding: &Binding, value: &Value) -> Result<Value, ContextError> {
    binding.extractor.extract(value).ok_or_else(|| {
        let field = match &binding.extractor {
            Extractor::Field(field) => field.clone(),
            Extractor::Whole => String::new(),
        };
        ContextError::MissingField {
            unit: unit.name().to_string(),
            identifier: binding.identifier.clone(),
            field,
        }
    })
}

impl Frame for IndexedContext {
    fn load_slot(&self, slot: SlotId) -> Result<Value, EvalError> {
        self.values
            .get(usize::from(slot))
            .cloned()
            .ok_or(EvalError::InvalidSlot { slot })
    }

    fn store_slot(&mut self, slot: SlotId, value: Value) -> Result<(), EvalError> {
        *self.slot_mut(usize::from(slot))? = value;
        Ok(())
    }

    fn load_name(&self, name: &str) -> Result<Value, EvalError> {
        self.resolve(name)
    }

    fn store_name(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        if let Some(slot) = self.inputs.get_index_of(name) {
            *self.slot_mut(slot)? = value;
            return Ok(());
        }
        if let Err(value) = self.scope.assign(name, value) {
            self.scope.define(name, value);
        }
        Ok(())
    }

    fn declare(&mut self, name: &str, value: Value, _ty: Option<&ValueType>) -> Result<(), EvalError> {
        let fixed = self
            .inputs
            .get_full(name)
            .map(|(slot, _, ty)| (slot, ty.is_constrained()));
        match fixed {
            Some((_, true)) => Err(EvalError::DuplicateBinding {
                name: name.to_string(),
            }),
            Some((slot, false)) => {
                *self.slot_mut(slot)? = value;
                Ok(())
            }
            None => {
                self.scope.define(name, value);
                Ok(())
            }
        }
    }
}
