//! Engine configuration
//!
//! Defaults applied to new binding plans and to the script VM. Loaded from
//! the `config` section of a scenario file; every key is optional.

use serde::{Deserialize, Serialize};
use tally_script::{DEFAULT_MAX_NESTING_DEPTH, DEFAULT_MAX_STACK_DEPTH};

use crate::plan::{BindingPlan, DEFAULT_LANGUAGE_LEVEL};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Strict typing for plans created through [`EngineConfig::plan`].
    pub strict_mode: bool,
    pub language_level: u32,
    /// Operand stack limit of the script VM.
    pub max_stack_depth: usize,
    /// Deepest expression or block nesting a script may use.
    pub max_nesting_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            language_level: DEFAULT_LANGUAGE_LEVEL,
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

impl EngineConfig {
    /// A new plan carrying this configuration's compilation flags.
    pub fn plan(&self, name: impl Into<String>, expression: impl Into<String>) -> BindingPlan {
        BindingPlan::new(name, expression)
            .with_strict_mode(self.strict_mode)
            .with_language_level(self.language_level)
    }
}
