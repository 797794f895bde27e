//! Tally Foundation
//!
//! Core primitives shared by the script backend and the accumulate core:
//! runtime values, declared value types and the stable identifiers used to
//! key facts and bindings.

pub mod ids;
pub mod types;
pub mod value;

pub use ids::{BindingId, FactId};
pub use types::ValueType;
pub use value::Value;
