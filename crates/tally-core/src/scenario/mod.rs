//! Scenario System
//!
//! A Scenario drives one accumulator through an insert/retract lifecycle
//! and checks its result along the way. It is how accumulators are exercised
//! outside a matching network: the scenario plays the network's part,
//! handing facts to the accumulator as they enter and leave the match group.
//!
//! # Protocol
//!
//! - `insert` folds a new fact
//! - `retract` undoes a fact; accumulators without a `reverse` unit are
//!   recomputed from scratch over the remaining facts instead
//! - `update` is a retract of the old payload followed by an insert of the
//!   new one under the same identity
//! - `result` reads the aggregate and optionally compares it to `expect`
//!
//! # File Format
//!
//! ```yaml
//! apiVersion: tally/v1
//! kind: Accumulate
//!
//! metadata:
//!   name: average_order
//!   title: "Average order amount"
//!
//! config:
//!   strictMode: true
//!
//! globals:
//!   minimum: 5
//!
//! accumulate:
//!   variables:
//!     total: Object
//!     count: Object
//!   locals:
//!     - identifier: $amount
//!       field: amount
//!       type: int
//!   init: "total = 0; count = 0;"
//!   action: "total += $amount; count += 1;"
//!   reverse: "total -= $amount; count -= 1;"
//!   result: "count == 0 ? 0 : total / count"
//!
//! steps:
//!   - insert: { key: a, value: { amount: 10 } }
//!   - insert: { key: b, value: { amount: 30 } }
//!   - result: { expect: 20 }
//!   - retract: a
//!   - result: { expect: 30 }
//! ```

mod runner;
mod types;

#[cfg(test)]
mod tests;

pub use runner::*;
pub use types::*;
