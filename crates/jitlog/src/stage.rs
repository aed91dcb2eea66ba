//! Compilation stages of a trace.

use crate::op::Op;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Compilation phase a stage records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Before optimization
    Noopt,
    /// After optimization
    Opt,
    /// Final assembled operations
    Asm,
}

impl StageKind {
    /// Name used in logs and on the command line
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Noopt => "noopt",
            Self::Opt => "opt",
            Self::Asm => "asm",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noopt" => Ok(Self::Noopt),
            "opt" => Ok(Self::Opt),
            "asm" => Ok(Self::Asm),
            other => Err(format!("unknown stage '{other}'")),
        }
    }
}

/// Stage mark emitted by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mark {
    /// Generic trace mark; may re-enter the current unoptimized stage
    Trace,
    /// Optimized trace
    TraceOpt,
    /// Assembled trace
    TraceAsm,
}

impl Mark {
    /// Stage this mark selects
    #[must_use]
    pub const fn stage(self) -> StageKind {
        match self {
            Self::Trace => StageKind::Noopt,
            Self::TraceOpt => StageKind::Opt,
            Self::TraceAsm => StageKind::Asm,
        }
    }
}

/// Ordered operations of one compilation phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    kind: StageKind,
    timeval: u64,
    ops: Vec<Op>,
}

impl Stage {
    /// Create an empty stage opened at forest time `timeval`
    #[must_use]
    pub const fn new(kind: StageKind, timeval: u64) -> Self {
        Self {
            kind,
            timeval,
            ops: Vec::new(),
        }
    }

    /// Which phase this is
    #[must_use]
    pub const fn kind(&self) -> StageKind {
        self.kind
    }

    /// Forest clock when the stage was opened
    #[must_use]
    pub const fn timeval(&self) -> u64 {
        self.timeval
    }

    /// Append an op, returning its index
    pub fn append_op(&mut self, op: Op) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    /// Op at index `i`
    #[must_use]
    pub fn get_op(&self, i: usize) -> Option<&Op> {
        self.ops.get(i)
    }

    /// Most recently appended op
    #[must_use]
    pub fn get_last_op(&self) -> Option<&Op> {
        self.ops.last()
    }

    pub(crate) fn get_last_op_mut(&mut self) -> Option<&mut Op> {
        self.ops.last_mut()
    }

    /// Ops in order, merge points only when `include_debug` is set
    pub fn get_ops(&self, include_debug: bool) -> impl Iterator<Item = &Op> + '_ {
        self.ops
            .iter()
            .filter(move |op| include_debug || !op.is_debug())
    }

    /// All ops, merge points included
    #[must_use]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Number of ops
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether no op was appended yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
