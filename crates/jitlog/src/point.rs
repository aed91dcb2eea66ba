//! Labelled points inside traces and their hit counters.

use crate::forest::TraceId;
use crate::stage::StageKind;
use crate::trace::Trace;
use serde::{Deserialize, Serialize};

/// Location of a descr-carrying op, keyed by its descr number in the forest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointInTrace {
    trace: TraceId,
    stage: StageKind,
    op: usize,
    inc_op: Option<usize>,
}

impl PointInTrace {
    /// Point at op `op` of `stage` in `trace`
    #[must_use]
    pub const fn new(trace: TraceId, stage: StageKind, op: usize) -> Self {
        Self {
            trace,
            stage,
            op,
            inc_op: None,
        }
    }

    /// Owning trace
    #[must_use]
    pub const fn trace(&self) -> TraceId {
        self.trace
    }

    /// Stage holding the op
    #[must_use]
    pub const fn stage(&self) -> StageKind {
        self.stage
    }

    /// Index of the op within its stage
    #[must_use]
    pub const fn op(&self) -> usize {
        self.op
    }

    /// Index of the counter increment that follows a copy of the op.
    ///
    /// The index is relative to the stage holding the increment, usually
    /// `asm`, which is not necessarily [`Self::stage`].
    #[must_use]
    pub const fn inc_op(&self) -> Option<usize> {
        self.inc_op
    }

    /// Attach the counter increment; the first one stays
    pub fn set_inc_op(&mut self, index: usize) {
        if self.inc_op.is_none() {
            self.inc_op = Some(index);
        }
    }

    /// Add `count` entries to the counter of this point in `trace`.
    ///
    /// Returns the new total, or `None` when no increment op is attached
    /// (plain labels are not counted).
    pub fn add_up_enter_count(&self, trace: &mut Trace, count: u64) -> Option<u64> {
        let index = self.inc_op?;
        let total = trace.point_counters_mut().entry(index).or_insert(0);
        *total += count;
        Some(*total)
    }
}

/// What a decoded counter event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterKind {
    /// Entries into a trace, keyed by its unique id
    Entry,
    /// Entries into a bridge, keyed by descr number
    Bridge,
    /// Passes over a label, keyed by descr number
    Label,
}

impl CounterKind {
    /// Decode the kind byte of a counter record
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'e' => Some(Self::Entry),
            b'b' => Some(Self::Bridge),
            b'l' => Some(Self::Label),
            _ => None,
        }
    }
}
