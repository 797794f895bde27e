//! Scenario type definitions and loading.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tally_foundation::Value;
use thiserror::Error;

use crate::accumulator::Accumulator;
use crate::config::EngineConfig;
use crate::error::{AccumulateError, CompileError};
use crate::plan::{BindingArena, Extractor};
use crate::resolve::PackageScope;

/// Errors that can occur when loading or running a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Failed to read the scenario file.
    #[error("failed to read scenario file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse the scenario YAML.
    #[error("failed to parse scenario YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid API version.
    #[error("invalid apiVersion: expected 'tally/v1', got '{0}'")]
    InvalidApiVersion(String),

    /// Invalid kind.
    #[error("invalid kind: expected 'Accumulate', got '{0}'")]
    InvalidKind(String),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A step names no action or more than one.
    #[error("step {index}: {reason}")]
    InvalidStep { index: usize, reason: String },

    /// Retract or update of a key that is not in the match group.
    #[error("step {index}: no fact with key '{key}'")]
    UnknownFact { index: usize, key: String },

    /// Insert of a key that is already in the match group.
    #[error("step {index}: fact '{key}' is already inserted")]
    DuplicateFact { index: usize, key: String },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Accumulate(#[from] AccumulateError),
}

/// Result type for scenario operations.
pub type ScenarioResult<T> = Result<T, ScenarioError>;

/// One accumulator, the environment it runs in, and the steps to replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// API version for compatibility checking.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Kind must be "Accumulate".
    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ScenarioMetadata,

    /// Engine defaults for the compiled units.
    #[serde(default)]
    pub config: EngineConfig,

    /// Global values visible to every unit.
    #[serde(default)]
    pub globals: IndexMap<String, Value>,

    /// Package scope appended to every resolution chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageDefinition>,

    /// Facts matched by earlier patterns, in pattern order.
    #[serde(default)]
    pub tuple: Vec<Value>,

    pub accumulate: AccumulateDefinition,

    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_api_version() -> String {
    "tally/v1".to_string()
}

fn default_kind() -> String {
    "Accumulate".to_string()
}

/// Metadata for a scenario.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioMetadata {
    /// Machine identifier for this scenario; also prefixes unit names.
    pub name: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageDefinition {
    pub name: String,
    #[serde(default)]
    pub values: IndexMap<String, Value>,
}

impl PackageDefinition {
    pub fn to_scope(&self) -> PackageScope {
        self.values
            .iter()
            .fold(PackageScope::new(self.name.clone()), |scope, (name, value)| {
                scope.with_value(name.clone(), value.clone())
            })
    }
}

/// A binding read from a fact of the tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousDefinition {
    pub identifier: String,
    /// Pattern offset in the tuple.
    #[serde(default)]
    pub offset: usize,
    /// Field to read; the whole fact when absent.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default = "default_object", rename = "type")]
    pub ty: String,
}

/// A binding read from the fact under evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDefinition {
    pub identifier: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default = "default_object", rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportDefinition {
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

fn default_object() -> String {
    "Object".to_string()
}

fn default_fact_identifier() -> String {
    "$fact".to_string()
}

/// The accumulate clause: shared environment plus the four unit scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulateDefinition {
    /// Name the fact under evaluation is bound to in `action`/`reverse`.
    #[serde(default = "default_fact_identifier")]
    pub fact_identifier: String,
    #[serde(default = "default_object")]
    pub fact_type: String,
    /// Aggregate-state variables and their types.
    #[serde(default)]
    pub variables: IndexMap<String, String>,
    /// Global names and their types.
    #[serde(default)]
    pub globals: IndexMap<String, String>,
    /// Engine-context handles exposed to the scripts.
    #[serde(default)]
    pub engine: Vec<String>,
    #[serde(default)]
    pub previous: Vec<PreviousDefinition>,
    #[serde(default)]
    pub locals: Vec<LocalDefinition>,
    #[serde(default)]
    pub imports: ImportDefinition,
    #[serde(default)]
    pub shadow_identifiers: Vec<String>,
    #[serde(default)]
    pub init: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub reverse: Option<String>,
    #[serde(default)]
    pub result: String,
}

impl Default for AccumulateDefinition {
    fn default() -> Self {
        Self {
            fact_identifier: default_fact_identifier(),
            fact_type: default_object(),
            variables: IndexMap::new(),
            globals: IndexMap::new(),
            engine: Vec::new(),
            previous: Vec::new(),
            locals: Vec::new(),
            imports: ImportDefinition::default(),
            shadow_identifiers: Vec::new(),
            init: String::new(),
            action: String::new(),
            reverse: None,
            result: String::new(),
        }
    }
}

fn extractor(field: &Option<String>) -> Extractor {
    field.clone().map_or(Extractor::Whole, Extractor::Field)
}

impl AccumulateDefinition {
    /// Lay out the four binding plans.
    ///
    /// `action` and `reverse` see the fact under evaluation and the local
    /// bindings; `init` and `result` do not.
    pub fn build(&self, name: &str, config: &EngineConfig) -> Accumulator {
        let mut arena = BindingArena::new();
        let previous: Vec<_> = self
            .previous
            .iter()
            .map(|def| (arena.declare(&def.identifier, def.offset, extractor(&def.field)), &def.ty))
            .collect();
        let locals: Vec<_> = self
            .locals
            .iter()
            .map(|def| (arena.declare(&def.identifier, 0, extractor(&def.field)), &def.ty))
            .collect();

        let unit_plan = |unit: &str, expression: &str, sees_fact: bool| {
            let mut plan = config.plan(format!("{name}.{unit}"), expression);
            if sees_fact {
                plan = plan.with_input(&self.fact_identifier, &self.fact_type);
            }
            for package in &self.imports.packages {
                plan = plan.with_package_import(package);
            }
            for ty in &self.imports.types {
                plan = plan.with_imported_type(ty);
            }
            for method in &self.imports.methods {
                plan = plan.with_imported_method(method);
            }
            for field in &self.imports.fields {
                plan = plan.with_imported_field(field);
            }
            for handle in &self.engine {
                plan = plan.with_engine_identifier(handle).with_input(handle, "Object");
            }
            for (global, ty) in &self.globals {
                plan = plan.with_global(global).with_input(global, ty);
            }
            for (binding, ty) in &previous {
                plan = plan
                    .with_input(&binding.identifier, *ty)
                    .with_previous(binding.clone());
            }
            if sees_fact {
                for (binding, ty) in &locals {
                    plan = plan.with_input(&binding.identifier, *ty).with_local(binding.clone());
                }
            }
            for (variable, ty) in &self.variables {
                plan = plan.with_other(variable).with_input(variable, ty);
            }
            for shadow in &self.shadow_identifiers {
                plan = plan.with_shadow_identifier(shadow);
            }
            plan
        };

        Accumulator::new(
            unit_plan("init", &self.init, false),
            unit_plan("action", &self.action, true),
            self.reverse.as_deref().map(|reverse| unit_plan("reverse", reverse, true)),
            unit_plan("result", &self.result, false),
        )
    }
}

/// One lifecycle step. Exactly one action must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<KeyedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retract: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<KeyedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyedValue {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<Value>,
}

/// A validated step.
#[derive(Debug, Clone, Copy)]
pub enum StepAction<'a> {
    Insert(&'a KeyedValue),
    Retract(&'a str),
    Update(&'a KeyedValue),
    Result(Option<&'a Value>),
}

impl Step {
    pub fn insert(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            insert: Some(KeyedValue {
                key: key.into(),
                value: value.into(),
            }),
            ..Self::default()
        }
    }

    pub fn retract(key: impl Into<String>) -> Self {
        Self {
            retract: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn update(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            update: Some(KeyedValue {
                key: key.into(),
                value: value.into(),
            }),
            ..Self::default()
        }
    }

    pub fn result(expect: Option<Value>) -> Self {
        Self {
            result: Some(ResultCheck { expect }),
            ..Self::default()
        }
    }

    pub fn action(&self, index: usize) -> ScenarioResult<StepAction<'_>> {
        let mut actions = [
            self.insert.as_ref().map(StepAction::Insert),
            self.retract.as_deref().map(StepAction::Retract),
            self.update.as_ref().map(StepAction::Update),
            self.result
                .as_ref()
                .map(|check| StepAction::Result(check.expect.as_ref())),
        ]
        .into_iter()
        .flatten();

        match (actions.next(), actions.next()) {
            (Some(action), None) => Ok(action),
            (None, _) => Err(ScenarioError::InvalidStep {
                index,
                reason: "no action (expected insert, retract, update or result)".to_string(),
            }),
            (Some(_), Some(_)) => Err(ScenarioError::InvalidStep {
                index,
                reason: "more than one action".to_string(),
            }),
        }
    }
}

impl Scenario {
    /// Create a scenario with the given name and accumulate clause.
    pub fn new(name: impl Into<String>, accumulate: AccumulateDefinition) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ScenarioMetadata {
                name: name.into(),
                title: None,
                description: None,
            },
            config: EngineConfig::default(),
            globals: IndexMap::new(),
            package: None,
            tuple: Vec::new(),
            accumulate,
            steps: Vec::new(),
        }
    }

    /// Load a scenario from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> ScenarioResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a scenario from a YAML string.
    pub fn from_yaml(yaml: &str) -> ScenarioResult<Self> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        scenario.validate_schema()?;
        Ok(scenario)
    }

    /// Validate the scenario schema (API version, kind, required scripts, steps).
    fn validate_schema(&self) -> ScenarioResult<()> {
        if self.api_version != "tally/v1" {
            return Err(ScenarioError::InvalidApiVersion(self.api_version.clone()));
        }
        if self.kind != "Accumulate" {
            return Err(ScenarioError::InvalidKind(self.kind.clone()));
        }
        if self.metadata.name.is_empty() {
            return Err(ScenarioError::MissingField("metadata.name".to_string()));
        }
        for (unit, script) in [
            ("init", &self.accumulate.init),
            ("action", &self.accumulate.action),
            ("result", &self.accumulate.result),
        ] {
            if script.trim().is_empty() {
                return Err(ScenarioError::MissingField(format!("accumulate.{unit}")));
            }
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.action(index)?;
        }
        Ok(())
    }

    /// Build the accumulator described by this scenario (uncompiled).
    pub fn accumulator(&self) -> Accumulator {
        self.accumulate.build(&self.metadata.name, &self.config)
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    pub fn with_tuple_fact(mut self, value: impl Into<Value>) -> Self {
        self.tuple.push(value.into());
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Builder method: set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.title = Some(title.into());
        self
    }
}

