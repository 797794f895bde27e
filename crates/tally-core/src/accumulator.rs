//! Reversible accumulators
//!
//! An [`Accumulator`] folds facts into aggregate state with four units:
//!
//! - `init` sets the aggregate-state variables (the plan's "other" identifiers)
//! - `action` folds one fact into them
//! - `reverse` (optional) undoes the fold of one fact
//! - `result` projects the state to a value
//!
//! State lives in an [`AccumulatorContext`], one per match group. When the
//! accumulator is reversible the context also keeps, per fact, the exact
//! resolution context the fact was folded with. Reversal replays that
//! context with the current state, so the bindings a fact contributed are
//! undone as they were seen at fold time even if the fact changed since.

use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::map::Entry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tally_foundation::{BindingId, FactId, Value};
use tracing::{debug, info, trace, warn};

use crate::compile::{Executable, ScriptCompiler, TypeResolver};
use crate::error::{AccumulateError, CompileCause, CompileError};
use crate::memory::{Fact, MatchGroup, WorkingMemory};
use crate::plan::{Binding, BindingPlan};
use crate::resolve::IndexedContext;

#[derive(Debug, Clone)]
struct CompiledUnits {
    init: Executable,
    action: Executable,
    reverse: Option<Executable>,
    result: Executable,
}

/// Four compilation units driven through the insert/retract lifecycle.
///
/// Only the plans are serialized; executables are recompiled on first use
/// through [`Accumulator::ensure_compiled`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accumulator {
    init: BindingPlan,
    action: BindingPlan,
    #[serde(default)]
    reverse: Option<BindingPlan>,
    result: BindingPlan,
    #[serde(skip)]
    compiled: OnceLock<CompiledUnits>,
}

impl Clone for Accumulator {
    /// Clones are uncompiled.
    fn clone(&self) -> Self {
        Self::new(
            self.init.clone(),
            self.action.clone(),
            self.reverse.clone(),
            self.result.clone(),
        )
    }
}

impl fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accumulator")
            .field("init", &self.init.name)
            .field("action", &self.action.name)
            .field("reverse", &self.reverse.as_ref().map(|plan| &plan.name))
            .field("result", &self.result.name)
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

/// Opaque per-session handle requested by the network. Carries nothing.
#[derive(Debug, Default)]
pub struct WorkingMemoryContext(());

impl Accumulator {
    pub fn new(
        init: BindingPlan,
        action: BindingPlan,
        reverse: Option<BindingPlan>,
        result: BindingPlan,
    ) -> Self {
        Self {
            init,
            action,
            reverse,
            result,
            compiled: OnceLock::new(),
        }
    }

    pub fn init_plan(&self) -> &BindingPlan {
        &self.init
    }

    pub fn action_plan(&self) -> &BindingPlan {
        &self.action
    }

    pub fn reverse_plan(&self) -> Option<&BindingPlan> {
        self.reverse.as_ref()
    }

    pub fn result_plan(&self) -> &BindingPlan {
        &self.result
    }

    /// Plans in `init`, `action`, `reverse`, `result` order.
    pub fn plans(&self) -> impl Iterator<Item = &BindingPlan> {
        [&self.init, &self.action]
            .into_iter()
            .chain(self.reverse.as_ref())
            .chain(std::iter::once(&self.result))
    }

    pub fn supports_reverse(&self) -> bool {
        self.reverse.is_some()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    /// Compile all units unless already compiled.
    ///
    /// Every unit must carry the same aggregate-state identifiers, and the
    /// reverse unit must take exactly the inputs of the action unit since it
    /// replays contexts built for it.
    pub fn ensure_compiled(&self, compiler: &ScriptCompiler, resolver: &dyn TypeResolver) -> Result<(), CompileError> {
        if self.is_compiled() {
            return Ok(());
        }

        if let Some(plan) = self
            .plans()
            .find(|plan| plan.other_identifiers != self.init.other_identifiers)
        {
            return Err(CompileError::new(
                &plan.name,
                &plan.name,
                CompileCause::OtherIdentifiersMismatch,
            ));
        }

        let init = compiler.compile(&self.init, resolver)?;
        let action = compiler.compile(&self.action, resolver)?;
        let reverse = match &self.reverse {
            Some(plan) => {
                let reverse = compiler.compile(plan, resolver)?;
                if !reverse.inputs().iter().eq(action.inputs().iter()) || reverse.layout() != action.layout() {
                    return Err(CompileError::new(
                        &plan.name,
                        &plan.name,
                        CompileCause::ReverseLayoutMismatch,
                    ));
                }
                Some(reverse)
            }
            None => None,
        };
        let result = compiler.compile(&self.result, resolver)?;

        // A concurrent caller may have won the race; its units are equivalent.
        let _ = self.compiled.set(CompiledUnits {
            init,
            action,
            reverse,
            result,
        });
        info!(
            action = %self.action.name,
            reversible = self.supports_reverse(),
            "accumulator compiled"
        );
        Ok(())
    }

    fn units(&self) -> Result<&CompiledUnits, AccumulateError> {
        self.compiled.get().ok_or(AccumulateError::NotCompiled)
    }

    /// Substitute a binding in every unit. Drops compiled units when anything
    /// changed.
    pub fn replace_binding(&mut self, old: BindingId, resolved: Binding) -> usize {
        let replaced = self.init.replace_binding(old, resolved.clone())
            + self.action.replace_binding(old, resolved.clone())
            + self
                .reverse
                .as_mut()
                .map_or(0, |plan| plan.replace_binding(old, resolved.clone()))
            + self.result.replace_binding(old, resolved);
        if replaced > 0 {
            self.compiled = OnceLock::new();
        }
        replaced
    }

    /// Fresh state for one match group.
    pub fn create_context(&self) -> AccumulatorContext {
        AccumulatorContext {
            identifiers: Arc::clone(&self.init.other_identifiers),
            variables: Vec::new(),
            shadow: self.supports_reverse().then(IndexMap::new),
        }
    }

    pub fn create_working_memory_context(&self) -> WorkingMemoryContext {
        WorkingMemoryContext::default()
    }

    /// Reset the group's state by running `init`. Drops all snapshots.
    pub fn init(
        &self,
        ctx: &mut AccumulatorContext,
        tuple: &dyn MatchGroup,
        memory: &dyn WorkingMemory,
    ) -> Result<(), AccumulateError> {
        let units = self.units()?;
        let nulls = vec![Value::Null; self.init.other_identifiers.len()];
        let mut frame = IndexedContext::build(&units.init, None, tuple, memory, &nulls)?;
        units.init.run(&mut frame)?;

        ctx.variables = frame.other_values().to_vec();
        if let Some(shadow) = ctx.shadow.as_mut() {
            shadow.clear();
        }
        debug!(unit = %units.init.name(), variables = ctx.variables.len(), "initialized");
        Ok(())
    }

    /// Fold `fact` into the group's state.
    pub fn accumulate(
        &self,
        ctx: &mut AccumulatorContext,
        tuple: &dyn MatchGroup,
        fact: &Fact,
        memory: &dyn WorkingMemory,
    ) -> Result<(), AccumulateError> {
        let units = self.units()?;
        let mut frame = IndexedContext::build(&units.action, Some(fact), tuple, memory, &ctx.variables)?;

        let frame = match ctx.shadow.as_mut() {
            // The snapshot is the context the action runs in.
            Some(shadow) => match shadow.entry(fact.id) {
                Entry::Occupied(mut entry) => {
                    warn!(fact = %fact.id, "fact accumulated twice without reverse; replacing snapshot");
                    entry.insert(frame);
                    entry.into_mut()
                }
                Entry::Vacant(entry) => entry.insert(frame),
            },
            None => &mut frame,
        };
        units.action.run(frame)?;
        ctx.variables = frame.other_values().to_vec();

        trace!(fact = %fact.id, "accumulated");
        Ok(())
    }

    /// Undo the fold of `fact`, replaying the context it was folded with.
    ///
    /// The match group and working memory are not consulted: bindings keep
    /// the values they had when the fact was folded.
    pub fn reverse(
        &self,
        ctx: &mut AccumulatorContext,
        _tuple: &dyn MatchGroup,
        fact: &Fact,
        _memory: &dyn WorkingMemory,
    ) -> Result<(), AccumulateError> {
        let units = self.units()?;
        let reverse = units
            .reverse
            .as_ref()
            .ok_or(AccumulateError::UnsupportedOperation { operation: "reverse" })?;

        let mut frame = ctx
            .shadow
            .as_mut()
            .and_then(|shadow| shadow.swap_remove(&fact.id))
            .ok_or(AccumulateError::MissingSnapshot { fact: fact.id })?;
        frame.set_other_values(&ctx.variables)?;
        reverse.run(&mut frame)?;
        ctx.variables = frame.other_values().to_vec();

        trace!(fact = %fact.id, "reversed");
        Ok(())
    }

    /// Project the group's state. Scripts without a value yield `null`.
    pub fn get_result(
        &self,
        ctx: &AccumulatorContext,
        tuple: &dyn MatchGroup,
        memory: &dyn WorkingMemory,
    ) -> Result<Value, AccumulateError> {
        let units = self.units()?;
        let mut frame = IndexedContext::build(&units.result, None, tuple, memory, &ctx.variables)?;
        Ok(units.result.run(&mut frame)?.unwrap_or_default())
    }
}

/// Per-match-group state.
#[derive(Debug)]
pub struct AccumulatorContext {
    identifiers: Arc<[String]>,
    variables: Vec<Value>,
    /// Fold-time contexts by fact; present iff the accumulator is reversible.
    shadow: Option<IndexMap<FactId, IndexedContext>>,
}

impl AccumulatorContext {
    /// Current aggregate-state values, in identifier order.
    pub fn variables(&self) -> &[Value] {
        &self.variables
    }

    /// Current value of one aggregate-state variable.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        let index = self.identifiers.iter().position(|id| id == name)?;
        self.variables.get(index)
    }

    pub fn has_shadow(&self) -> bool {
        self.shadow.is_some()
    }

    pub fn snapshot(&self, fact: FactId) -> Option<&IndexedContext> {
        self.shadow.as_ref()?.get(&fact)
    }

    pub fn snapshot_count(&self) -> usize {
        self.shadow.as_ref().map_or(0, IndexMap::len)
    }
}
