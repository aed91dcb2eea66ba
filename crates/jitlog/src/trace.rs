//! Traces: one compiled loop or bridge and its stages.

use crate::core_dump::{DumpTime, Patch};
use crate::forest::{Addr, DescrNumber, TraceId};
use crate::op::{MergePoint, Op};
use crate::result::{ForestError, ForestResult};
use crate::stage::{Mark, Stage, StageKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeBounds;
use std::sync::OnceLock;

/// Loop or bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    /// Compiled loop
    Loop,
    /// Continuation of a failing guard in another trace
    Bridge,
}

impl TraceKind {
    /// Name used in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Loop => "loop",
            Self::Bridge => "bridge",
        }
    }

    /// Parse the logged type string
    pub fn parse(value: &str) -> ForestResult<Self> {
        match value {
            "loop" => Ok(Self::Loop),
            "bridge" => Ok(Self::Bridge),
            other => Err(ForestError::InvalidTraceKind {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive machine-code address range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrRange {
    /// First address
    pub start: Addr,
    /// Last address
    pub end: Addr,
}

impl AddrRange {
    /// Create a new range
    #[must_use]
    pub const fn new(start: Addr, end: Addr) -> Self {
        Self { start, end }
    }

    /// Whether `addr` lies inside the range
    #[must_use]
    pub const fn contains(&self, addr: Addr) -> bool {
        self.start <= addr && addr <= self.end
    }

    /// Whether the two ranges share an address
    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// A compiled loop or bridge
#[derive(Debug, Clone)]
pub struct Trace {
    unique_id: TraceId,
    kind: TraceKind,
    jd_name: Option<String>,
    stamp: usize,
    inputargs: Vec<String>,
    stages: BTreeMap<StageKind, Stage>,
    last_mark: Option<StageKind>,
    addrs: Option<AddrRange>,
    patch_cache: OnceLock<Vec<Patch>>,
    pub(crate) descr_nmr: DescrNumber,
    pub(crate) parent: Option<TraceId>,
    pub(crate) bridges: Vec<TraceId>,
    counter: u64,
    point_counters: BTreeMap<usize, u64>,
    merge_point_files: BTreeMap<String, Vec<i64>>,
}

impl Trace {
    /// Create a trace; `stamp` is its creation position in the forest
    #[must_use]
    pub fn new(unique_id: TraceId, kind: TraceKind, jd_name: Option<String>, stamp: usize) -> Self {
        Self {
            unique_id,
            kind,
            jd_name,
            stamp,
            inputargs: Vec::new(),
            stages: BTreeMap::new(),
            last_mark: None,
            addrs: None,
            patch_cache: OnceLock::new(),
            descr_nmr: 0,
            parent: None,
            bridges: Vec::new(),
            counter: 0,
            point_counters: BTreeMap::new(),
            merge_point_files: BTreeMap::new(),
        }
    }

    /// Unique id assigned by the compiler
    #[must_use]
    pub const fn unique_id(&self) -> TraceId {
        self.unique_id
    }

    /// Loop or bridge
    #[must_use]
    pub const fn kind(&self) -> TraceKind {
        self.kind
    }

    /// Whether this trace is a bridge
    #[must_use]
    pub fn is_bridge(&self) -> bool {
        self.kind == TraceKind::Bridge
    }

    /// Jit driver name
    #[must_use]
    pub fn jd_name(&self) -> Option<&str> {
        self.jd_name.as_deref()
    }

    /// Creation position within the forest
    #[must_use]
    pub const fn stamp(&self) -> usize {
        self.stamp
    }

    /// Input arguments of the trace
    #[must_use]
    pub fn inputargs(&self) -> &[String] {
        &self.inputargs
    }

    /// Replace the input arguments
    pub fn set_inputargs(&mut self, args: Vec<String>) {
        self.inputargs = args;
    }

    /// Enter the stage selected by `mark`, creating it at time `tick`.
    ///
    /// A generic [`Mark::Trace`] while the unoptimized stage is already the
    /// active one keeps appending to it: the optimizer ran twice with the
    /// loop unrolled in between, and the unrolled body belongs to the same
    /// stage.
    pub fn start_mark(&mut self, mark: Mark, tick: u64) -> StageKind {
        let kind = mark.stage();
        if mark == Mark::Trace && self.last_mark == Some(kind) {
            return kind;
        }
        self.last_mark = Some(kind);
        self.stages
            .entry(kind)
            .or_insert_with(|| Stage::new(kind, tick));
        kind
    }

    /// Stage by name
    #[must_use]
    pub fn get_stage(&self, kind: StageKind) -> Option<&Stage> {
        self.stages.get(&kind)
    }

    /// All stages, ordered noopt, opt, asm
    pub fn stages(&self) -> impl Iterator<Item = &Stage> + '_ {
        self.stages.values()
    }

    /// Kind of the most recently entered stage
    #[must_use]
    pub const fn last_mark(&self) -> Option<StageKind> {
        self.last_mark
    }

    /// Most recently entered stage
    #[must_use]
    pub fn get_last_stage(&self) -> Option<&Stage> {
        self.last_mark.and_then(|kind| self.stages.get(&kind))
    }

    pub(crate) fn get_last_stage_mut(&mut self) -> Option<&mut Stage> {
        let kind = self.last_mark?;
        self.stages.get_mut(&kind)
    }

    /// Append `op` to the active stage, returning its stage and index
    pub(crate) fn append_op(&mut self, op: Op) -> ForestResult<(StageKind, usize)> {
        let id = self.unique_id;
        let stage = self
            .get_last_stage_mut()
            .ok_or(ForestError::NoActiveStage { trace: id })?;
        let kind = stage.kind();
        Ok((kind, stage.append_op(op)))
    }

    pub(crate) fn record_merge_point_line(&mut self, filename: &str, lineno: i64) {
        self.merge_point_files
            .entry(filename.to_string())
            .or_default()
            .push(lineno);
    }

    /// Source lines referenced by merge points, per file
    #[must_use]
    pub const fn merge_point_files(&self) -> &BTreeMap<String, Vec<i64>> {
        &self.merge_point_files
    }

    /// First merge point of the optimized stage
    #[must_use]
    pub fn get_first_merge_point(&self) -> Option<&MergePoint> {
        self.get_stage(StageKind::Opt)?
            .ops()
            .iter()
            .find_map(Op::as_merge_point)
    }

    pub(crate) fn set_addr_bounds(&mut self, range: AddrRange) {
        self.addrs = Some(range);
        self.patch_cache = OnceLock::new();
    }

    /// Assigned machine-code range
    #[must_use]
    pub const fn get_addrs(&self) -> Option<AddrRange> {
        self.addrs
    }

    /// Whether the log reported this trace as assembled
    #[must_use]
    pub const fn is_assembled(&self) -> bool {
        self.addrs.is_some()
    }

    /// Whether `addr` lies in the assembled range
    #[must_use]
    pub fn contains_addr(&self, addr: Addr) -> bool {
        self.addrs.is_some_and(|r| r.contains(addr))
    }

    /// Whether a patch at `addr` touches this trace's code
    #[must_use]
    pub fn contains_patch(&self, addr: Addr) -> bool {
        self.contains_addr(addr)
    }

    pub(crate) fn reset_patch_cache(&mut self) {
        self.patch_cache = OnceLock::new();
    }

    /// Patches from the forest's log that land inside this trace, computed
    /// once until the cache is reset
    pub(crate) fn patches_in_range(&self, all: &[Patch]) -> &[Patch] {
        self.patch_cache.get_or_init(|| {
            all.iter()
                .filter(|p| self.contains_patch(p.addr))
                .cloned()
                .collect()
        })
    }

    /// Machine code of the `asm` ops whose position (merge points skipped)
    /// lies in `ops`, as of `at`.
    ///
    /// `all_patches` must be the forest's patch log since the subset is
    /// cached. `None` when the trace has no `asm` stage.
    pub(crate) fn get_core_dump<R>(
        &self,
        all_patches: &[Patch],
        at: DumpTime,
        ops: R,
    ) -> Option<Vec<u8>>
    where
        R: RangeBounds<usize>,
    {
        let stage = self.get_stage(StageKind::Asm)?;
        let patches = self.patches_in_range(all_patches);
        let base = self.addrs.map_or(0, |r| r.start);
        let mut out = Vec::new();
        for (i, op) in stage.get_ops(false).enumerate() {
            if !ops.contains(&i) {
                continue;
            }
            if let Some(bytes) = op.replay_core_dump(base, patches, at) {
                out.extend_from_slice(&bytes);
            }
        }
        Some(out)
    }

    /// Descr this trace was stitched to, 0 if none
    #[must_use]
    pub const fn get_stitched_descr_number(&self) -> DescrNumber {
        self.descr_nmr
    }

    /// Trace this bridge is attached to
    #[must_use]
    pub const fn get_parent(&self) -> Option<TraceId> {
        self.parent
    }

    /// Bridges attached to this trace, in stitch order
    #[must_use]
    pub fn bridges(&self) -> &[TraceId] {
        &self.bridges
    }

    /// Add entries into the trace itself
    pub fn add_up_enter_count(&mut self, count: u64) -> u64 {
        self.counter += count;
        self.counter
    }

    /// Entries into the trace itself
    #[must_use]
    pub const fn counter(&self) -> u64 {
        self.counter
    }

    /// Counters keyed by increment op index
    #[must_use]
    pub const fn point_counters(&self) -> &BTreeMap<usize, u64> {
        &self.point_counters
    }

    pub(crate) fn point_counters_mut(&mut self) -> &mut BTreeMap<usize, u64> {
        &mut self.point_counters
    }

    /// Newline-joined listing of `stage`; empty if the stage is missing
    #[must_use]
    pub fn pretty_print(&self, stage: StageKind) -> String {
        self.get_stage(stage)
            .map(|s| {
                s.ops()
                    .iter()
                    .map(Op::pretty_print)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.unique_id)?;
        if let Some(r) = self.addrs {
            write!(f, " @ {:#x}-{:#x}", r.start, r.end)?;
        }
        Ok(())
    }
}
