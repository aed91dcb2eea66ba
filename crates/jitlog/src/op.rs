//! Operation records of a trace stage.
//!
//! A stage holds either executable instructions or debug merge points. The
//! two share a sequence but not their capabilities: only instructions carry
//! descrs and machine code, only merge points carry source positions.

use crate::core_dump::{CoreDump, DumpTime, Patch};
use crate::forest::{Addr, DescrNumber};
use crate::marks::{INCREMENT_DEBUG_COUNTER, MP_FILENAME, MP_LINENO, MP_SCOPE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Descriptor attached to an instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descr {
    /// Textual form as logged
    pub text: String,
    /// Numeric identity used for stitching and counters
    pub number: DescrNumber,
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Operation number
    pub opnum: u16,
    /// Operation name
    pub opname: String,
    /// Arguments
    pub args: Vec<String>,
    /// Result variable
    pub result: Option<String>,
    /// Attached descriptor
    pub descr: Option<Descr>,
    /// Guard fail arguments
    pub failargs: Option<Vec<String>>,
    core_dump: Option<CoreDump>,
}

impl Instruction {
    /// Create a new instruction
    #[must_use]
    pub fn new(opnum: u16, opname: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            opnum,
            opname: opname.into(),
            args,
            result: None,
            descr: None,
            failargs: None,
            core_dump: None,
        }
    }

    /// Set the result variable
    #[must_use]
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Attach a descriptor
    #[must_use]
    pub fn with_descr(mut self, text: impl Into<String>, number: DescrNumber) -> Self {
        self.descr = Some(Descr {
            text: text.into(),
            number,
        });
        self
    }

    /// Set guard fail arguments
    #[must_use]
    pub fn with_failargs(mut self, failargs: Vec<String>) -> Self {
        self.failargs = Some(failargs);
        self
    }

    /// Attach captured machine code
    #[must_use]
    pub fn with_core_dump(mut self, dump: CoreDump) -> Self {
        self.core_dump = Some(dump);
        self
    }

    /// Whether this is a guard
    #[must_use]
    pub fn is_guard(&self) -> bool {
        self.opname.contains("guard")
    }

    /// Captured machine code, if the instruction was assembled
    #[must_use]
    pub fn core_dump(&self) -> Option<&CoreDump> {
        self.core_dump.as_ref()
    }

    fn render(&self, hide_unknown_result: bool) -> String {
        let prefix = match self.result.as_deref() {
            Some("?") if hide_unknown_result => String::new(),
            Some(result) => format!("{result} = "),
            None => String::new(),
        };
        let descr = self
            .descr
            .as_ref()
            .map(|d| format!(", @{}", d.text))
            .unwrap_or_default();
        format!("{prefix}{}({}{descr})", self.opname, self.args.join(", "))
    }
}

/// Scalar carried by a merge point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePointValue {
    /// String value
    Str(String),
    /// Integer value
    Int(i64),
}

impl fmt::Display for MergePointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
        }
    }
}

/// Debug marker recording where in the source a trace was at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePoint {
    /// Semantic tag (`MP_*`) to value
    pub values: BTreeMap<u8, MergePointValue>,
}

impl MergePoint {
    /// Create a merge point from its tagged values
    #[must_use]
    pub fn new(values: BTreeMap<u8, MergePointValue>) -> Self {
        Self { values }
    }

    /// Add a tagged value
    #[must_use]
    pub fn with_value(mut self, tag: u8, value: MergePointValue) -> Self {
        self.values.insert(tag, value);
        self
    }

    /// Enclosing scope, empty when not logged
    #[must_use]
    pub fn get_scope(&self) -> &str {
        match self.values.get(&MP_SCOPE) {
            Some(MergePointValue::Str(s)) => s.as_str(),
            _ => "",
        }
    }

    /// `(filename, lineno)` when both were logged
    #[must_use]
    pub fn get_source_line(&self) -> Option<(&str, i64)> {
        let filename = match self.values.get(&MP_FILENAME)? {
            MergePointValue::Str(s) => s.as_str(),
            MergePointValue::Int(_) => return None,
        };
        let lineno = match self.values.get(&MP_LINENO)? {
            MergePointValue::Int(i) => *i,
            MergePointValue::Str(s) => s.parse().ok()?,
        };
        Some((filename, lineno))
    }
}

/// One entry of a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Executable instruction
    Instr(Instruction),
    /// Debug merge point
    MergePoint(MergePoint),
}

impl Op {
    /// Operation name; merge points have none
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Instr(i) => Some(&i.opname),
            Self::MergePoint(_) => None,
        }
    }

    /// Whether this is a debug marker
    #[must_use]
    pub const fn is_debug(&self) -> bool {
        matches!(self, Self::MergePoint(_))
    }

    /// Whether a descriptor is attached
    #[must_use]
    pub fn has_descr(&self) -> bool {
        self.descr_number().is_some()
    }

    /// Number of the attached descriptor
    #[must_use]
    pub fn descr_number(&self) -> Option<DescrNumber> {
        match self {
            Self::Instr(i) => i.descr.as_ref().map(|d| d.number),
            Self::MergePoint(_) => None,
        }
    }

    /// Whether this is a guard instruction
    #[must_use]
    pub fn is_guard(&self) -> bool {
        matches!(self, Self::Instr(i) if i.is_guard())
    }

    /// Whether this op counts entries into the preceding label
    #[must_use]
    pub fn is_counter_increment(&self) -> bool {
        self.name() == Some(INCREMENT_DEBUG_COUNTER)
    }

    /// The instruction, if this is one
    #[must_use]
    pub const fn as_instr(&self) -> Option<&Instruction> {
        match self {
            Self::Instr(i) => Some(i),
            Self::MergePoint(_) => None,
        }
    }

    /// The merge point, if this is one
    #[must_use]
    pub const fn as_merge_point(&self) -> Option<&MergePoint> {
        match self {
            Self::MergePoint(mp) => Some(mp),
            Self::Instr(_) => None,
        }
    }

    /// Captured machine code
    #[must_use]
    pub fn core_dump(&self) -> Option<&CoreDump> {
        self.as_instr().and_then(Instruction::core_dump)
    }

    /// Attach machine code. Returns `false` for merge points, which never
    /// carry any.
    pub fn set_core_dump(&mut self, dump: CoreDump) -> bool {
        match self {
            Self::Instr(i) => {
                i.core_dump = Some(dump);
                true
            }
            Self::MergePoint(_) => false,
        }
    }

    /// Bytes of this op as of `at`; `None` when nothing was captured
    #[must_use]
    pub fn replay_core_dump(&self, base: Addr, patches: &[Patch], at: DumpTime) -> Option<Vec<u8>> {
        self.core_dump().map(|d| d.replay(base, patches, at))
    }

    /// Human-readable rendering used by listings
    #[must_use]
    pub fn pretty_print(&self) -> String {
        match self {
            Self::Instr(i) => i.render(true),
            Self::MergePoint(mp) => match mp.get_source_line() {
                Some((file, line)) => {
                    format!("debug_merge_point({}, {file}:{line})", mp.get_scope())
                }
                None => format!("debug_merge_point({})", mp.get_scope()),
            },
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instr(i) => f.write_str(&i.render(false)),
            Self::MergePoint(_) => f.write_str("debug_merge_point(xxx)"),
        }
    }
}

impl From<Instruction> for Op {
    fn from(instr: Instruction) -> Self {
        Self::Instr(instr)
    }
}

impl From<MergePoint> for Op {
    fn from(mp: MergePoint) -> Self {
        Self::MergePoint(mp)
    }
}
