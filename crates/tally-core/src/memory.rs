//! Working-memory collaborators
//!
//! The matching network and the global store live outside this crate. These
//! traits are the narrow view the accumulator needs of them, plus a small
//! in-memory implementation used by the scenario runner and tests.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tally_foundation::{FactId, Value};

use crate::resolve::PackageScope;

/// An external data item with a stable identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub value: Value,
}

impl Fact {
    pub fn new(id: impl Into<FactId>, value: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }
}

/// The facts matched by earlier patterns of a rule, addressed by pattern offset.
pub trait MatchGroup {
    fn fact(&self, offset: usize) -> Option<&Fact>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MatchGroup for [Fact] {
    fn fact(&self, offset: usize) -> Option<&Fact> {
        self.get(offset)
    }

    fn len(&self) -> usize {
        <[Fact]>::len(self)
    }
}

impl MatchGroup for Vec<Fact> {
    fn fact(&self, offset: usize) -> Option<&Fact> {
        self.get(offset)
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

/// Global store and engine context seen during evaluation.
pub trait WorkingMemory {
    /// Current value of a global. Missing globals evaluate to `null`.
    fn global(&self, name: &str) -> Option<Value>;

    /// Engine-context handle exposed to scripts under `name`.
    fn engine_handle(&self, _name: &str) -> Value {
        Value::Null
    }

    /// Read-only package scope appended to every resolution chain.
    fn package_scope(&self) -> Option<Arc<PackageScope>> {
        None
    }
}

/// Working memory backed by ordered maps.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkingMemory {
    globals: IndexMap<String, Value>,
    handles: IndexMap<String, Value>,
    package: Option<Arc<PackageScope>>,
    next_fact: u64,
}

impl InMemoryWorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_global(name, value);
        self
    }

    pub fn with_engine_handle(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.handles.insert(name.into(), value.into());
        self
    }

    pub fn with_package_scope(mut self, scope: PackageScope) -> Self {
        self.package = Some(Arc::new(scope));
        self
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(name.into(), value.into());
    }

    /// Wrap `value` in a fact with a fresh identity.
    pub fn insert_fact(&mut self, value: impl Into<Value>) -> Fact {
        let id = FactId::new(self.next_fact);
        self.next_fact += 1;
        Fact {
            id,
            value: value.into(),
        }
    }
}

impl WorkingMemory for InMemoryWorkingMemory {
    fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    fn engine_handle(&self, name: &str) -> Value {
        self.handles.get(name).cloned().unwrap_or_default()
    }

    fn package_scope(&self) -> Option<Arc<PackageScope>> {
        self.package.clone()
    }
}
