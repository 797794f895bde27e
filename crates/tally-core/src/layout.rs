//! Slot layout
//!
//! The single schema shared by the compiler and every resolution context
//! built for a unit. Slots are laid out in segment order:
//!
//! ```text
//! [fact?] [engine handles] [globals] [previous bindings] [local bindings] [other]
//! ```
//!
//! The fact segment holds the fact under evaluation and is present only for
//! units that see one (`action`, `reverse`). Its length is whatever remains
//! of the plan's inputs after the named segments, so it must come out as 0 or 1.

use std::ops::Range;

use tally_script::SlotId;

use crate::error::PlanError;
use crate::plan::BindingPlan;

/// A contiguous group of slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    Fact,
    Engine,
    Globals,
    Previous,
    Locals,
    Other,
}

impl Segment {
    /// Every segment, in slot order.
    pub const ALL: [Segment; 6] = [
        Segment::Fact,
        Segment::Engine,
        Segment::Globals,
        Segment::Previous,
        Segment::Locals,
        Segment::Other,
    ];

    fn position(self) -> usize {
        self as usize
    }
}

/// Ordered `(segment, length)` pairs computed once per plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    lengths: [usize; Segment::ALL.len()],
}

impl SlotLayout {
    /// Derive the layout of `plan` and check that its inputs name the
    /// segments in order.
    pub fn for_plan(plan: &BindingPlan) -> Result<Self, PlanError> {
        let inputs = plan.input_identifiers.len();
        if inputs > usize::from(SlotId::MAX) + 1 {
            return Err(PlanError::TooManyInputs { inputs });
        }

        let named: Vec<&str> = plan
            .engine_identifiers
            .iter()
            .chain(plan.global_identifiers.iter())
            .map(String::as_str)
            .chain(plan.previous_bindings.iter().map(|b| b.identifier.as_str()))
            .chain(plan.local_bindings.iter().map(|b| b.identifier.as_str()))
            .chain(plan.other_identifiers.iter().map(String::as_str))
            .collect();

        let fact = inputs
            .checked_sub(named.len())
            .filter(|fact| *fact <= 1)
            .ok_or(PlanError::LayoutMismatch {
                inputs,
                fixed: named.len(),
            })?;

        for (offset, expected) in named.iter().enumerate() {
            let slot = fact + offset;
            let found = &plan.input_identifiers[slot];
            if found != expected {
                return Err(PlanError::SlotNameMismatch {
                    slot,
                    expected: (*expected).to_string(),
                    found: found.clone(),
                });
            }
        }

        Ok(Self {
            lengths: [
                fact,
                plan.engine_identifiers.len(),
                plan.global_identifiers.len(),
                plan.previous_bindings.len(),
                plan.local_bindings.len(),
                plan.other_identifiers.len(),
            ],
        })
    }

    /// Total number of slots.
    pub fn len(&self) -> usize {
        self.lengths.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_fact_slot(&self) -> bool {
        self.lengths[Segment::Fact.position()] == 1
    }

    pub fn segment_len(&self, segment: Segment) -> usize {
        self.lengths[segment.position()]
    }

    /// Slot range covered by `segment`.
    pub fn range(&self, segment: Segment) -> Range<usize> {
        let start: usize = self.lengths[..segment.position()].iter().sum();
        start..start + self.segment_len(segment)
    }

    /// The trailing aggregate-state segment.
    pub fn other_range(&self) -> Range<usize> {
        self.range(Segment::Other)
    }
}
