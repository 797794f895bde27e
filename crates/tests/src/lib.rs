//! Integration test harness for Tally.
//!
//! This crate provides utilities for end-to-end testing of the accumulate
//! lifecycle: Plan → Compile → Init → Accumulate/Reverse → Result.

use tally_core::{
    Accumulator, AccumulateError, AccumulatorContext, Binding, BindingArena, BindingPlan, CompileError, CompileLock,
    EngineConfig, Extractor, Fact, InMemoryWorkingMemory, ScriptCompiler, StandardTypes, Value,
};

/// Shared compiler, type resolver, working memory and match-group tuple.
pub struct TestHarness {
    compiler: ScriptCompiler,
    types: StandardTypes,
    pub memory: InMemoryWorkingMemory,
    pub tuple: Vec<Fact>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            compiler: ScriptCompiler::new(CompileLock::new(), config),
            types: StandardTypes::default(),
            memory: InMemoryWorkingMemory::new(),
            tuple: Vec::new(),
        }
    }

    pub fn compiler(&self) -> &ScriptCompiler {
        &self.compiler
    }

    pub fn types(&self) -> &StandardTypes {
        &self.types
    }

    pub fn try_compile(&self, accumulator: &Accumulator) -> Result<(), CompileError> {
        accumulator.ensure_compiled(&self.compiler, &self.types)
    }

    /// Compile every unit of `accumulator`.
    ///
    /// # Panics
    ///
    /// Panics if any unit fails to compile.
    pub fn compile(&self, accumulator: &Accumulator) {
        if let Err(e) = self.try_compile(accumulator) {
            panic!("compilation failed: {e}");
        }
    }

    /// Insert a fact into working memory.
    pub fn insert(&mut self, value: impl Into<Value>) -> Fact {
        self.memory.insert_fact(value)
    }

    /// Start a match group on a compiled accumulator and run `init`.
    ///
    /// # Panics
    ///
    /// Panics if `init` fails.
    pub fn session<'a>(&'a self, accumulator: &'a Accumulator) -> Session<'a> {
        let mut session = Session {
            harness: self,
            accumulator,
            context: accumulator.create_context(),
        };
        session.init();
        session
    }
}

/// One match group driven through the lifecycle.
pub struct Session<'a> {
    harness: &'a TestHarness,
    accumulator: &'a Accumulator,
    pub context: AccumulatorContext,
}

impl Session<'_> {
    pub fn try_init(&mut self) -> Result<(), AccumulateError> {
        let h = self.harness;
        self.accumulator.init(&mut self.context, &h.tuple, &h.memory)
    }

    pub fn try_accumulate(&mut self, fact: &Fact) -> Result<(), AccumulateError> {
        let h = self.harness;
        self.accumulator.accumulate(&mut self.context, &h.tuple, fact, &h.memory)
    }

    pub fn try_reverse(&mut self, fact: &Fact) -> Result<(), AccumulateError> {
        let h = self.harness;
        self.accumulator.reverse(&mut self.context, &h.tuple, fact, &h.memory)
    }

    pub fn try_result(&self) -> Result<Value, AccumulateError> {
        let h = self.harness;
        self.accumulator.get_result(&self.context, &h.tuple, &h.memory)
    }

    /// # Panics
    ///
    /// Panics if `init` fails.
    pub fn init(&mut self) {
        self.try_init().expect("init failed");
    }

    /// # Panics
    ///
    /// Panics if `action` fails.
    pub fn accumulate(&mut self, fact: &Fact) {
        self.try_accumulate(fact).expect("accumulate failed");
    }

    /// # Panics
    ///
    /// Panics if `reverse` fails.
    pub fn reverse(&mut self, fact: &Fact) {
        self.try_reverse(fact).expect("reverse failed");
    }

    /// # Panics
    ///
    /// Panics if `result` fails.
    pub fn result(&self) -> Value {
        self.try_result().expect("result failed")
    }

    /// Current aggregate state, in declaration order.
    pub fn variables(&self) -> Vec<Value> {
        self.context.variables().to_vec()
    }
}

fn with_state(plan: BindingPlan) -> BindingPlan {
    plan.with_other("total")
        .with_other("count")
        .with_input("total", "Object")
        .with_input("count", "Object")
}

fn with_fact(plan: BindingPlan, value: &Binding, ty: &str) -> BindingPlan {
    with_state(
        plan.with_local(value.clone())
            .with_input("$fact", "Object")
            .with_input(&value.identifier, ty),
    )
}

/// Integer average over facts whose payload is a plain number, bound to
/// `$value`.
pub fn average(reversible: bool) -> Accumulator {
    average_with(reversible, Extractor::Whole, "Object")
}

/// Average whose `$value` binding reads the fact through `extractor` and is
/// declared as `ty`.
pub fn average_with(reversible: bool, extractor: Extractor, ty: &str) -> Accumulator {
    let value = BindingArena::new().declare("$value", 0, extractor);
    Accumulator::new(
        with_state(BindingPlan::new("average.init", "total = 0; count = 0;")),
        with_fact(BindingPlan::new("average.action", "total += $value; count += 1;"), &value, ty),
        reversible.then(|| with_fact(BindingPlan::new("average.reverse", "total -= $value; count -= 1;"), &value, ty)),
        with_state(BindingPlan::new("average.result", "count == 0 ? 0 : total / count")),
    )
}

/// Average that reads the fact slot directly as `$fact`. Its result is
/// `null` over an empty group.
pub fn fact_average() -> Accumulator {
    let sees_fact = |plan: BindingPlan| with_state(plan.with_input("$fact", "Object"));
    Accumulator::new(
        with_state(BindingPlan::new("fact_average.init", "total = 0; count = 0;")),
        sees_fact(BindingPlan::new("fact_average.action", "total += $fact; count += 1;")),
        Some(sees_fact(BindingPlan::new("fact_average.reverse", "total -= $fact; count -= 1;"))),
        with_state(BindingPlan::new(
            "fact_average.result",
            "return count == 0 ? null : total / count;",
        )),
    )
}

/// Accumulator with custom `action` and `reverse` scripts over the average's
/// state and `$value` binding.
pub fn folding(action: &str, reverse: Option<&str>) -> Accumulator {
    let value = BindingArena::new().declare("$value", 0, Extractor::Whole);
    Accumulator::new(
        with_state(BindingPlan::new("fold.init", "total = 0; count = 0;")),
        with_fact(BindingPlan::new("fold.action", action), &value, "int"),
        reverse.map(|reverse| with_fact(BindingPlan::new("fold.reverse", reverse), &value, "int")),
        with_state(BindingPlan::new("fold.result", "total")),
    )
}

/// Weighted sum reading the global `weight`.
pub fn weighted_sum() -> Accumulator {
    let value = BindingArena::new().declare("$value", 0, Extractor::Whole);
    let unit = |name: &str, expression: &str, sees_fact: bool| {
        let mut plan = BindingPlan::new(name, expression);
        if sees_fact {
            plan = plan.with_input("$fact", "Object");
        }
        plan = plan.with_global("weight").with_input("weight", "int");
        if sees_fact {
            plan = plan.with_local(value.clone()).with_input("$value", "int");
        }
        with_state(plan)
    };
    Accumulator::new(
        unit("weighted.init", "total = 0; count = 0;", false),
        unit("weighted.action", "total += $value * weight; count += 1;", true),
        Some(unit("weighted.reverse", "total -= $value * weight; count -= 1;", true)),
        unit("weighted.result", "total", false),
    )
}
