//! Value arithmetic and comparison used by the executor.
//!
//! Integers use checked arithmetic and truncating division; mixing an
//! integer with a float widens to float. `+` with a text operand
//! concatenates.

use std::cmp::Ordering;

use tally_foundation::Value;

use crate::error::EvalError;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Arith {
    fn symbol(self) -> &'static str {
        match self {
            Arith::Add => "+",
            Arith::Sub => "-",
            Arith::Mul => "*",
            Arith::Div => "/",
            Arith::Rem => "%",
        }
    }
}

pub(crate) fn arithmetic(op: Arith, a: Value, b: Value) -> Result<Value, EvalError> {
    match (op, &a, &b) {
        (Arith::Add, Value::Text(_), _) | (Arith::Add, _, Value::Text(_)) => {
            Ok(Value::Text(format!("{a}{b}")))
        }
        (_, Value::Integer(x), Value::Integer(y)) => integer_arithmetic(op, *x, *y),
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Ok(Value::Float(match op {
                Arith::Add => x + y,
                Arith::Sub => x - y,
                Arith::Mul => x * y,
                Arith::Div => x / y,
                Arith::Rem => x % y,
            })),
            (None, _) => Err(EvalError::mismatch(op.symbol(), "number", a.type_name())),
            (_, None) => Err(EvalError::mismatch(op.symbol(), "number", b.type_name())),
        },
    }
}

fn integer_arithmetic(op: Arith, x: i64, y: i64) -> Result<Value, EvalError> {
    if matches!(op, Arith::Div | Arith::Rem) && y == 0 {
        return Err(EvalError::DivisionByZero);
    }
    let result = match op {
        Arith::Add => x.checked_add(y),
        Arith::Sub => x.checked_sub(y),
        Arith::Mul => x.checked_mul(y),
        Arith::Div => x.checked_div(y),
        Arith::Rem => x.checked_rem(y),
    };
    result.map(Value::Integer).ok_or(EvalError::Overflow {
        operation: op.symbol(),
    })
}

pub(crate) fn negate(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Integer(x) => x
            .checked_neg()
            .map(Value::Integer)
            .ok_or(EvalError::Overflow { operation: "-" }),
        Value::Float(x) => Ok(Value::Float(-x)),
        other => Err(EvalError::mismatch("-", "number", other.type_name())),
    }
}

pub(crate) fn not(value: Value) -> Result<Value, EvalError> {
    match value {
        Value::Boolean(b) => Ok(Value::Boolean(!b)),
        other => Err(EvalError::mismatch("!", "boolean", other.type_name())),
    }
}

/// Equality with numeric widening (`1 == 1.0`).
pub(crate) fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(x), Value::Float(y)) | (Value::Float(y), Value::Integer(x)) => {
            (*x as f64) == *y
        }
        _ => a == b,
    }
}

/// Ordering for relational operators: numbers with widening, or texts.
pub(crate) fn compare(symbol: &'static str, a: &Value, b: &Value) -> Result<Option<Ordering>, EvalError> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(Some(x.cmp(y))),
        (Value::Text(x), Value::Text(y)) => Ok(Some(x.cmp(y))),
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
            (None, _) => Err(EvalError::mismatch(symbol, "number", a.type_name())),
            (_, None) => Err(EvalError::mismatch(symbol, "number", b.type_name())),
        },
    }
}

/// Condition check for jumps: only booleans are accepted.
pub(crate) fn truthy(value: &Value) -> Result<bool, EvalError> {
    value
        .as_bool()
        .ok_or_else(|| EvalError::mismatch("condition", "boolean", value.type_name()))
}
