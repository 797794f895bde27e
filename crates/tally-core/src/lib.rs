// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Tally Core
//!
//! Incremental evaluation of `accumulate` clauses. An accumulator is four
//! compiled units (`init`, `action`, optional `reverse`, `result`) sharing
//! one aggregate state that is folded over the facts of a match group as
//! they come and go.
//!
//! - [`plan`]: binding plans describing what each unit sees, in slot order
//! - [`layout`]: the fixed segment order of a unit's input slots
//! - [`compile`]: turns a plan into an [`Executable`] under a shared lock
//! - [`resolve`]: the slot-indexed evaluation context and its fallback chain
//! - [`accumulator`]: the four-phase lifecycle and per-fact snapshots
//! - [`scenario`]: YAML scenarios that replay an insert/retract lifecycle
//!
//! ```text
//! BindingPlan ──compile──▶ Executable ─┐
//!                                      ├─▶ IndexedContext ──run──▶ aggregate state
//! Fact + tuple + WorkingMemory ────────┘
//! ```

pub mod accumulator;
pub mod compile;
pub mod config;
pub mod error;
pub mod layout;
pub mod memory;
pub mod plan;
pub mod resolve;
pub mod scenario;

pub use accumulator::{Accumulator, AccumulatorContext, WorkingMemoryContext};
pub use compile::{CompileLock, Executable, ScriptCompiler, StandardTypes, TypeResolver, MAX_LANGUAGE_LEVEL};
pub use config::EngineConfig;
pub use error::{AccumulateError, CompileCause, CompileError, ContextError, PlanError};
pub use layout::{Segment, SlotLayout};
pub use memory::{Fact, InMemoryWorkingMemory, MatchGroup, WorkingMemory};
pub use plan::{Binding, BindingArena, BindingPlan, Extractor, DEFAULT_LANGUAGE_LEVEL};
pub use resolve::{IndexedContext, PackageResolver, PackageScope, ScopeResolver, VariableResolver};
pub use scenario::{Scenario, ScenarioError, ScenarioReport, ScenarioResult, ScenarioRunner, Step, StepOutcome};

pub use tally_foundation::{BindingId, FactId, Value, ValueType};
