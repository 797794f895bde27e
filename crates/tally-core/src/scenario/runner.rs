//! Scenario replay.

use indexmap::IndexMap;
use serde::Serialize;
use tally_foundation::Value;
use tracing::{debug, info};

use crate::accumulator::{Accumulator, AccumulatorContext};
use crate::compile::{CompileLock, ScriptCompiler, TypeResolver};
use crate::memory::{Fact, InMemoryWorkingMemory};

use super::types::{Scenario, ScenarioError, ScenarioResult, StepAction};

/// What one step did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub index: usize,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Aggregate state after the step, by variable name.
    pub variables: IndexMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    /// Whether `result` equals `expected`; absent when nothing was expected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<bool>,
    /// The group was recomputed from scratch instead of reversed.
    pub recomputed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub name: String,
    pub reversible: bool,
    pub steps: Vec<StepOutcome>,
}

impl ScenarioReport {
    /// No step produced a result that differs from its expectation.
    pub fn passed(&self) -> bool {
        self.steps.iter().all(|step| step.matched != Some(false))
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|step| step.matched == Some(false))
    }
}

/// Numbers compare by value across integer and float.
pub fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            match (actual.as_float(), expected.as_float()) {
                (Some(a), Some(b)) => (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0),
                _ => false,
            }
        }
        _ => actual == expected,
    }
}

/// Replays a scenario against its accumulator, playing the matching
/// network's part.
pub struct ScenarioRunner<'a> {
    scenario: &'a Scenario,
    accumulator: Accumulator,
    memory: InMemoryWorkingMemory,
    tuple: Vec<Fact>,
    context: AccumulatorContext,
    /// Facts currently in the match group, in insertion order.
    live: IndexMap<String, Fact>,
}

impl<'a> ScenarioRunner<'a> {
    /// Compile the scenario's accumulator and initialize its match group.
    pub fn new(scenario: &'a Scenario, lock: &CompileLock, resolver: &dyn TypeResolver) -> ScenarioResult<Self> {
        let compiler = ScriptCompiler::new(lock.clone(), scenario.config.clone());
        let accumulator = scenario.accumulator();
        accumulator.ensure_compiled(&compiler, resolver)?;

        let mut memory = scenario
            .globals
            .iter()
            .fold(InMemoryWorkingMemory::new(), |memory, (name, value)| {
                memory.with_global(name.clone(), value.clone())
            });
        if let Some(package) = &scenario.package {
            memory = memory.with_package_scope(package.to_scope());
        }
        let tuple: Vec<Fact> = scenario
            .tuple
            .iter()
            .map(|value| memory.insert_fact(value.clone()))
            .collect();

        let mut context = accumulator.create_context();
        accumulator.init(&mut context, &tuple, &memory)?;

        Ok(Self {
            scenario,
            accumulator,
            memory,
            tuple,
            context,
            live: IndexMap::new(),
        })
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub fn context(&self) -> &AccumulatorContext {
        &self.context
    }

    /// Run every step in order.
    pub fn run(mut self) -> ScenarioResult<ScenarioReport> {
        let scenario = self.scenario;
        let mut steps = Vec::with_capacity(scenario.steps.len());
        for (index, step) in scenario.steps.iter().enumerate() {
            steps.push(self.step(index, step.action(index)?)?);
        }

        let report = ScenarioReport {
            name: scenario.metadata.name.clone(),
            reversible: self.accumulator.supports_reverse(),
            steps,
        };
        info!(
            scenario = %report.name,
            steps = report.steps.len(),
            passed = report.passed(),
            "scenario finished"
        );
        Ok(report)
    }

    /// Apply one validated step.
    pub fn step(&mut self, index: usize, action: StepAction<'_>) -> ScenarioResult<StepOutcome> {
        let mut outcome = StepOutcome {
            index,
            action: "result",
            key: None,
            variables: IndexMap::new(),
            result: None,
            expected: None,
            matched: None,
            recomputed: false,
        };

        match action {
            StepAction::Insert(keyed) => {
                outcome.action = "insert";
                outcome.key = Some(keyed.key.clone());
                if self.live.contains_key(&keyed.key) {
                    return Err(ScenarioError::DuplicateFact {
                        index,
                        key: keyed.key.clone(),
                    });
                }
                let fact = self.memory.insert_fact(keyed.value.clone());
                self.accumulator
                    .accumulate(&mut self.context, &self.tuple, &fact, &self.memory)?;
                self.live.insert(keyed.key.clone(), fact);
            }

            StepAction::Retract(key) => {
                outcome.action = "retract";
                outcome.key = Some(key.to_string());
                let fact = self.live.shift_remove(key).ok_or_else(|| ScenarioError::UnknownFact {
                    index,
                    key: key.to_string(),
                })?;
                outcome.recomputed = self.retract(&fact)?;
            }

            StepAction::Update(keyed) => {
                outcome.action = "update";
                outcome.key = Some(keyed.key.clone());
                let old = self.live.get(&keyed.key).cloned().ok_or_else(|| ScenarioError::UnknownFact {
                    index,
                    key: keyed.key.clone(),
                })?;
                let new = Fact {
                    id: old.id,
                    value: keyed.value.clone(),
                };
                // Recomputation already folds the new payload.
                self.live.insert(keyed.key.clone(), new.clone());
                outcome.recomputed = self.retract(&old)?;
                if !outcome.recomputed {
                    self.accumulator
                        .accumulate(&mut self.context, &self.tuple, &new, &self.memory)?;
                }
            }

            StepAction::Result(expected) => {
                let result = self.accumulator.get_result(&self.context, &self.tuple, &self.memory)?;
                outcome.matched = expected.map(|expected| values_match(&result, expected));
                outcome.expected = expected.cloned();
                outcome.result = Some(result);
            }
        }

        outcome.variables = self
            .accumulator
            .init_plan()
            .other_identifiers
            .iter()
            .cloned()
            .zip(self.context.variables().iter().cloned())
            .collect();

        debug!(
            step = index,
            action = outcome.action,
            recomputed = outcome.recomputed,
            "step applied"
        );
        Ok(outcome)
    }

    /// Undo `fact`, by reversal when supported and otherwise by folding the
    /// remaining live facts into a fresh state. Returns whether it recomputed.
    fn retract(&mut self, fact: &Fact) -> ScenarioResult<bool> {
        if self.accumulator.supports_reverse() {
            self.accumulator
                .reverse(&mut self.context, &self.tuple, fact, &self.memory)?;
            return Ok(false);
        }

        self.accumulator.init(&mut self.context, &self.tuple, &self.memory)?;
        for live in self.live.values() {
            self.accumulator
                .accumulate(&mut self.context, &self.tuple, live, &self.memory)?;
        }
        Ok(true)
    }
}

impl Scenario {
    /// Compile and replay this scenario.
    pub fn run(&self, lock: &CompileLock, resolver: &dyn TypeResolver) -> ScenarioResult<ScenarioReport> {
        ScenarioRunner::new(self, lock, resolver)?.run()
    }
}
