//! Binding plans
//!
//! A [`BindingPlan`] describes the lexical environment of one script: what
//! it imports, which values are bound positionally and in which order, and
//! how strictly it is compiled. Plans are plain data; compiling one produces
//! an [`Executable`](crate::compile::Executable) and never mutates the plan.
//!
//! The descriptive string arrays are `Arc<[String]>` so clones share them.
//! They are immutable, so a clone can never observe a change made through
//! another clone.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_foundation::{BindingId, Value};

use crate::error::PlanError;
use crate::layout::SlotLayout;

/// Language level assigned to new plans.
pub const DEFAULT_LANGUAGE_LEVEL: u32 = 4;

/// How a binding derives its value from a fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Extractor {
    /// The whole fact payload.
    Whole,
    /// One named field of a record payload.
    Field(String),
}

impl Extractor {
    pub fn extract(&self, value: &Value) -> Option<Value> {
        match self {
            Extractor::Whole => Some(value.clone()),
            Extractor::Field(name) => value.field(name).cloned(),
        }
    }
}

/// A named value derivable from the match state.
///
/// Previous bindings read the fact at `pattern_offset` in the match group;
/// local bindings read the fact under evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub id: BindingId,
    pub identifier: String,
    pub pattern_offset: usize,
    pub extractor: Extractor,
}

/// Hands out binding identities.
///
/// Structurally equal bindings declared twice get distinct ids.
#[derive(Debug, Default)]
pub struct BindingArena {
    next: u32,
}

impl BindingArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(
        &mut self,
        identifier: impl Into<String>,
        pattern_offset: usize,
        extractor: Extractor,
    ) -> Binding {
        let id = BindingId::new(self.next);
        self.next += 1;
        Binding {
            id,
            identifier: identifier.into(),
            pattern_offset,
            extractor,
        }
    }
}

/// Lexical environment of one compilation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingPlan {
    /// Unit name used in diagnostics.
    pub name: String,
    /// Script source.
    pub expression: String,
    #[serde(default)]
    pub package_imports: Arc<[String]>,
    #[serde(default)]
    pub imported_types: Arc<[String]>,
    #[serde(default)]
    pub imported_methods: Arc<[String]>,
    #[serde(default)]
    pub imported_fields: Arc<[String]>,
    #[serde(default)]
    pub engine_identifiers: Arc<[String]>,
    #[serde(default)]
    pub global_identifiers: Arc<[String]>,
    #[serde(default)]
    pub previous_bindings: Vec<Binding>,
    #[serde(default)]
    pub local_bindings: Vec<Binding>,
    #[serde(default)]
    pub other_identifiers: Arc<[String]>,
    #[serde(default)]
    pub input_identifiers: Arc<[String]>,
    #[serde(default)]
    pub input_types: Arc<[String]>,
    /// Carried for reversal diagnostics; never interpreted.
    #[serde(default)]
    pub shadow_identifiers: Arc<[String]>,
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default = "default_language_level")]
    pub language_level: u32,
}

fn default_language_level() -> u32 {
    DEFAULT_LANGUAGE_LEVEL
}

fn append(list: &Arc<[String]>, item: impl Into<String>) -> Arc<[String]> {
    list.iter().cloned().chain(std::iter::once(item.into())).collect()
}

impl BindingPlan {
    /// Create an empty plan for `expression`.
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            package_imports: Arc::from([]),
            imported_types: Arc::from([]),
            imported_methods: Arc::from([]),
            imported_fields: Arc::from([]),
            engine_identifiers: Arc::from([]),
            global_identifiers: Arc::from([]),
            previous_bindings: Vec::new(),
            local_bindings: Vec::new(),
            other_identifiers: Arc::from([]),
            input_identifiers: Arc::from([]),
            input_types: Arc::from([]),
            shadow_identifiers: Arc::from([]),
            strict_mode: false,
            language_level: DEFAULT_LANGUAGE_LEVEL,
        }
    }

    pub fn with_package_import(mut self, package: impl Into<String>) -> Self {
        self.package_imports = append(&self.package_imports, package);
        self
    }

    pub fn with_imported_type(mut self, ty: impl Into<String>) -> Self {
        self.imported_types = append(&self.imported_types, ty);
        self
    }

    /// Import a static method (`Owner.method`).
    pub fn with_imported_method(mut self, method: impl Into<String>) -> Self {
        self.imported_methods = append(&self.imported_methods, method);
        self
    }

    /// Import a static field (`Owner.FIELD`).
    pub fn with_imported_field(mut self, field: impl Into<String>) -> Self {
        self.imported_fields = append(&self.imported_fields, field);
        self
    }

    pub fn with_engine_identifier(mut self, name: impl Into<String>) -> Self {
        self.engine_identifiers = append(&self.engine_identifiers, name);
        self
    }

    pub fn with_global(mut self, name: impl Into<String>) -> Self {
        self.global_identifiers = append(&self.global_identifiers, name);
        self
    }

    pub fn with_previous(mut self, binding: Binding) -> Self {
        self.previous_bindings.push(binding);
        self
    }

    pub fn with_local(mut self, binding: Binding) -> Self {
        self.local_bindings.push(binding);
        self
    }

    pub fn with_other(mut self, name: impl Into<String>) -> Self {
        self.other_identifiers = append(&self.other_identifiers, name);
        self
    }

    /// Append a fixed positional input.
    pub fn with_input(mut self, identifier: impl Into<String>, ty: impl Into<String>) -> Self {
        self.input_identifiers = append(&self.input_identifiers, identifier);
        self.input_types = append(&self.input_types, ty);
        self
    }

    pub fn with_shadow_identifier(mut self, name: impl Into<String>) -> Self {
        self.shadow_identifiers = append(&self.shadow_identifiers, name);
        self
    }

    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn with_language_level(mut self, level: u32) -> Self {
        self.language_level = level;
        self
    }

    /// Check the plan invariants and derive its slot layout.
    pub fn validate(&self) -> Result<SlotLayout, PlanError> {
        if self.input_identifiers.len() != self.input_types.len() {
            return Err(PlanError::InputTypeCountMismatch {
                identifiers: self.input_identifiers.len(),
                types: self.input_types.len(),
            });
        }
        for (i, identifier) in self.input_identifiers.iter().enumerate() {
            if self.input_identifiers[..i].contains(identifier) {
                return Err(PlanError::DuplicateInput {
                    identifier: identifier.clone(),
                });
            }
        }
        if let Some(binding) = self
            .previous_bindings
            .iter()
            .find(|prev| self.local_bindings.iter().any(|local| local.id == prev.id))
        {
            return Err(PlanError::BindingInBothLists {
                binding: binding.id,
                identifier: binding.identifier.clone(),
            });
        }
        SlotLayout::for_plan(self)
    }

    /// Substitute the binding with identity `old` in both binding lists.
    ///
    /// Returns the number of substitutions made; zero when `old` is not bound.
    pub fn replace_binding(&mut self, old: BindingId, resolved: Binding) -> usize {
        let mut replaced = 0;
        for binding in self
            .previous_bindings
            .iter_mut()
            .chain(self.local_bindings.iter_mut())
            .filter(|binding| binding.id == old)
        {
            *binding = resolved.clone();
            replaced += 1;
        }
        replaced
    }
}
