//! Declared value types
//!
//! Types are what the compiler backend knows about an input slot or a typed
//! declaration. They are deliberately coarse: the scripting layer checks
//! assignments against them in strict mode and nothing else.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Declared type of a slot or variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Unconstrained (`Object`). Accepts anything and carries no type constraint.
    Any,
    /// Primitive boolean.
    Boolean,
    /// Primitive integer (`int`, `long`, `short`, `byte`).
    Integer,
    /// Primitive float (`float`, `double`).
    Float,
    /// Boxed numeric; integer or float, nullable.
    Number,
    /// Text (`String`, `char`).
    Text,
    /// List of values.
    List,
    /// Named record type.
    Record(String),
}

impl ValueType {
    /// Whether the type constrains what may be stored.
    pub fn is_constrained(&self) -> bool {
        !matches!(self, ValueType::Any)
    }

    /// Check that `value` may be stored in a slot of this type.
    ///
    /// Primitive types reject `null`; floats accept integers (widening).
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Any, _) => true,
            (ValueType::Boolean, Value::Boolean(_)) => true,
            (ValueType::Integer, Value::Integer(_)) => true,
            (ValueType::Float, Value::Float(_) | Value::Integer(_)) => true,
            (ValueType::Number, Value::Null | Value::Integer(_) | Value::Float(_)) => true,
            (ValueType::Text, Value::Null | Value::Text(_)) => true,
            (ValueType::List, Value::Null | Value::List(_)) => true,
            (ValueType::Record(_), Value::Null | Value::Record(_)) => true,
            _ => false,
        }
    }

    /// Coerce a value on store; only integer → float widening applies.
    pub fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (ValueType::Float, Value::Integer(i)) => Value::Float(i as f64),
            (_, v) => v,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Any => write!(f, "Object"),
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Integer => write!(f, "int"),
            ValueType::Float => write!(f, "double"),
            ValueType::Number => write!(f, "Number"),
            ValueType::Text => write!(f, "String"),
            ValueType::List => write!(f, "List"),
            ValueType::Record(name) => write!(f, "{name}"),
        }
    }
}
