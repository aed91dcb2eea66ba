//! The trace forest: every trace of one log and the relations between them.
//!
//! The forest is built by folding decoded log events into it, in log order,
//! by a single writer. Traces live in an arena keyed by their unique id;
//! parent links, bridge lists, the address index, the stitch table and the
//! descr-to-point table all refer to traces by id.

use crate::config::ForestConfig;
use crate::core_dump::{CoreDump, DumpTime, Patch};
use crate::op::Op;
use crate::point::{CounterKind, PointInTrace};
use crate::result::{ForestError, ForestResult};
use crate::source::{cache_file_lines, encode_source_lines, SourceCache, SourceLine};
use crate::stage::{Mark, StageKind};
use crate::trace::{AddrRange, Trace, TraceKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Unique id of a trace as assigned by the compiler
pub type TraceId = i64;
/// Machine address
pub type Addr = i64;
/// Descriptor number
pub type DescrNumber = i64;

/// Counts describing a forest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestSummary {
    /// Log format version
    pub version: u16,
    /// Address width in bytes
    pub word_size: u8,
    /// Machine the log was written on
    pub machine: String,
    /// Number of traces
    pub traces: usize,
    /// Number of loops
    pub loops: usize,
    /// Number of bridges
    pub bridges: usize,
    /// Number of traces with machine code
    pub assembled: usize,
    /// Number of recorded patches
    pub patches: usize,
    /// Number of stitched descrs
    pub stitches: usize,
}

/// Registry of all traces reconstructed from one log
#[derive(Debug)]
pub struct TraceForest {
    version: u16,
    word_size: u8,
    machine: String,
    config: ForestConfig,
    traces: HashMap<TraceId, Trace>,
    addrs: BTreeMap<Addr, TraceId>,
    last_trace: Option<TraceId>,
    timepos: u64,
    patches: Vec<Patch>,
    stitches: HashMap<DescrNumber, TraceId>,
    descr_to_point: HashMap<DescrNumber, PointInTrace>,
    source_lines: SourceCache,
    filepath: Option<PathBuf>,
}

impl TraceForest {
    /// Create an empty forest for a log written by `machine`
    #[must_use]
    pub fn new(version: u16, is_32bit: bool, machine: impl Into<String>) -> Self {
        Self {
            version,
            word_size: if is_32bit { 4 } else { 8 },
            machine: machine.into(),
            config: ForestConfig::default(),
            traces: HashMap::new(),
            addrs: BTreeMap::new(),
            last_trace: None,
            timepos: 0,
            patches: Vec::new(),
            stitches: HashMap::new(),
            descr_to_point: HashMap::new(),
            source_lines: SourceCache::new(),
            filepath: None,
        }
    }

    /// Use a custom configuration
    #[must_use]
    pub fn with_config(mut self, config: ForestConfig) -> Self {
        self.config = config;
        self
    }

    /// Remember the log file this forest was read from
    #[must_use]
    pub fn with_filepath(mut self, path: impl Into<PathBuf>) -> Self {
        self.filepath = Some(path.into());
        self
    }

    /// Log format version
    #[must_use]
    pub const fn version(&self) -> u16 {
        self.version
    }

    /// Address width in bytes, 4 or 8
    #[must_use]
    pub const fn word_size(&self) -> u8 {
        self.word_size
    }

    /// Machine name from the log header
    #[must_use]
    pub fn machine(&self) -> &str {
        &self.machine
    }

    /// Configuration
    #[must_use]
    pub const fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Log file backing this forest
    #[must_use]
    pub fn filepath(&self) -> Option<&Path> {
        self.filepath.as_deref()
    }

    /// Current logical time
    #[must_use]
    pub const fn timepos(&self) -> u64 {
        self.timepos
    }

    /// Advance the logical clock by one
    pub fn time_tick(&mut self) {
        self.timepos += 1;
    }

    // ---------------------------------------------------------------------
    // Traces
    // ---------------------------------------------------------------------

    /// Register a new trace and make it the active one
    pub fn add_trace(
        &mut self,
        kind: TraceKind,
        unique_id: TraceId,
        jd_name: Option<String>,
    ) -> ForestResult<&Trace> {
        if self.traces.contains_key(&unique_id) {
            return Err(ForestError::DuplicateTrace { id: unique_id });
        }
        let trace = Trace::new(unique_id, kind, jd_name, self.traces.len());
        debug!(id = unique_id, %kind, time = self.timepos, "trace started");
        self.last_trace = Some(unique_id);
        Ok(&*self.traces.entry(unique_id).or_insert(trace))
    }

    /// Trace by unique id
    #[must_use]
    pub fn get_trace(&self, id: TraceId) -> Option<&Trace> {
        self.traces.get(&id)
    }

    fn trace_mut(&mut self, id: TraceId) -> ForestResult<&mut Trace> {
        self.traces
            .get_mut(&id)
            .ok_or(ForestError::UnknownTrace { id })
    }

    /// All traces in creation order
    #[must_use]
    pub fn traces(&self) -> Vec<&Trace> {
        let mut traces: Vec<&Trace> = self.traces.values().collect();
        traces.sort_by_key(|t| t.stamp());
        traces
    }

    /// Number of traces
    #[must_use]
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// Whether no trace was registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Id of the trace subsequent operations go to
    pub fn active_trace_id(&self) -> ForestResult<TraceId> {
        self.last_trace.ok_or(ForestError::NoActiveTrace)
    }

    /// Trace subsequent operations go to
    #[must_use]
    pub fn active_trace(&self) -> Option<&Trace> {
        self.last_trace.and_then(|id| self.traces.get(&id))
    }

    /// Enter a stage of `id`, making it the active trace
    pub fn start_mark(&mut self, id: TraceId, mark: Mark) -> ForestResult<StageKind> {
        let tick = self.timepos;
        let stage = self.trace_mut(id)?.start_mark(mark, tick);
        self.last_trace = Some(id);
        Ok(stage)
    }

    /// Set the input arguments of `id`
    pub fn set_inputargs(&mut self, id: TraceId, args: Vec<String>) -> ForestResult<()> {
        self.trace_mut(id)?.set_inputargs(args);
        Ok(())
    }

    /// Append an op to the active stage of `id`, returning its index.
    ///
    /// Side effects on the forest:
    /// - a non-zero descr registers a [`PointInTrace`] unless one already
    ///   holds that number;
    /// - a counter increment attaches itself to the point of the op right
    ///   before it;
    /// - a merge point with a source position is remembered for
    ///   [`Self::extract_source_code_lines`].
    pub fn add_instr(&mut self, id: TraceId, op: impl Into<Op>) -> ForestResult<usize> {
        let op = op.into();
        let descr = op.descr_number();
        let is_increment = op.is_counter_increment();
        let source = op
            .as_merge_point()
            .and_then(|mp| mp.get_source_line())
            .map(|(file, line)| (file.to_string(), line));

        let trace = self
            .traces
            .get_mut(&id)
            .ok_or(ForestError::UnknownTrace { id })?;
        let (stage, index) = trace.append_op(op)?;

        match descr {
            Some(0) => warn!(trace = id, index, "descr number of an operation should not be 0x0"),
            Some(nmr) => {
                self.descr_to_point
                    .entry(nmr)
                    .or_insert_with(|| PointInTrace::new(id, stage, index));
            }
            None => {}
        }

        if is_increment {
            let prev = index
                .checked_sub(1)
                .and_then(|i| trace.get_stage(stage)?.get_op(i))
                .and_then(Op::descr_number);
            match prev.and_then(|nmr| self.descr_to_point.get_mut(&nmr)) {
                Some(point) if point.trace() == id => {
                    point.set_inc_op(index);
                }
                _ => debug!(trace = id, index, "counter increment without a preceding label"),
            }
        }

        if let Some((file, line)) = source {
            trace.record_merge_point_line(&file, line);
        }
        Ok(index)
    }

    /// Attach machine code to the last op of the active stage of `id`.
    ///
    /// Returns `false` when there is no op or the op is a merge point.
    pub fn set_core_dump_to_last_op(
        &mut self,
        id: TraceId,
        rel_pos: usize,
        bytes: Vec<u8>,
    ) -> ForestResult<bool> {
        let trace = self.trace_mut(id)?;
        let stage = trace
            .get_last_stage_mut()
            .ok_or(ForestError::NoActiveStage { trace: id })?;
        let attached = stage
            .get_last_op_mut()
            .is_some_and(|op| op.set_core_dump(CoreDump::new(rel_pos, bytes)));
        if !attached {
            warn!(trace = id, rel_pos, "core dump has no instruction to attach to");
        }
        Ok(attached)
    }

    /// Op at `index` of `stage` in trace `id`
    #[must_use]
    pub fn get_op(&self, id: TraceId, stage: StageKind, index: usize) -> Option<&Op> {
        self.traces.get(&id)?.get_stage(stage)?.get_op(index)
    }

    // ---------------------------------------------------------------------
    // Address space and patches
    // ---------------------------------------------------------------------

    fn find_overlap(&self, range: AddrRange, skip: TraceId) -> Option<(TraceId, AddrRange)> {
        for (_, &owner) in self.addrs.range(..=range.end).rev() {
            if owner == skip {
                continue;
            }
            let resident = self.traces.get(&owner)?.get_addrs()?;
            return resident.intersects(&range).then_some((owner, resident));
        }
        None
    }

    /// Assign the inclusive code range `start..=end` to trace `id`.
    ///
    /// Fails if any address of the range belongs to another trace.
    pub fn set_addr_bounds(&mut self, id: TraceId, start: Addr, end: Addr) -> ForestResult<()> {
        let range = AddrRange::new(start, end);
        if !self.traces.contains_key(&id) {
            return Err(ForestError::UnknownTrace { id });
        }
        if let Some((resident, at)) = self.find_overlap(range, id) {
            return Err(ForestError::AddressOverlap {
                start,
                end,
                resident,
                resident_start: at.start,
            });
        }
        let trace = self.trace_mut(id)?;
        let previous = trace.get_addrs();
        trace.set_addr_bounds(range);
        if let Some(old) = previous {
            self.addrs.remove(&old.start);
        }
        self.addrs.insert(start, id);
        debug!(trace = id, start, end, "address range assigned");
        Ok(())
    }

    fn trace_id_at(&self, addr: Addr) -> Option<TraceId> {
        let (_, &id) = self.addrs.range(..=addr).next_back()?;
        self.traces
            .get(&id)
            .is_some_and(|t| t.contains_addr(addr))
            .then_some(id)
    }

    /// Trace whose code range contains `addr`
    #[must_use]
    pub fn get_trace_by_addr(&self, addr: Addr) -> Option<&Trace> {
        self.trace_id_at(addr).and_then(|id| self.traces.get(&id))
    }

    /// Record a write of `content` at `addr` that happened at `time`
    pub fn patch_memory(&mut self, addr: Addr, content: Vec<u8>, time: u64) {
        if let Some(id) = self.trace_id_at(addr) {
            if let Some(trace) = self.traces.get_mut(&id) {
                trace.reset_patch_cache();
            }
        }
        self.patches.push(Patch::new(time, addr, content));
    }

    /// Every recorded patch, in arrival order
    #[must_use]
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Machine code of trace `id` as of `at`, restricted to the `asm` op
    /// positions in `ops`
    #[must_use]
    pub fn get_core_dump<R>(&self, id: TraceId, at: DumpTime, ops: R) -> Option<Vec<u8>>
    where
        R: RangeBounds<usize>,
    {
        self.traces.get(&id)?.get_core_dump(&self.patches, at, ops)
    }

    // ---------------------------------------------------------------------
    // Stitching and counters
    // ---------------------------------------------------------------------

    fn link_to_point(&mut self, descr: DescrNumber, child: TraceId, context: &'static str) {
        let Some(parent) = self.descr_to_point.get(&descr).map(PointInTrace::trace) else {
            warn!(context, descr, trace = child, "no point registered for descr, parent left unset");
            return;
        };
        let previous = self.traces.get(&child).and_then(Trace::get_parent);
        if let Some(old) = previous.filter(|&old| old != parent) {
            if let Some(old_parent) = self.traces.get_mut(&old) {
                old_parent.bridges.retain(|&b| b != child);
            }
        }
        if let Some(trace) = self.traces.get_mut(&child) {
            trace.parent = Some(parent);
        }
        if let Some(parent_trace) = self.traces.get_mut(&parent) {
            if !parent_trace.bridges.contains(&child) {
                parent_trace.bridges.push(child);
            }
        }
    }

    /// Attach the bridge assembled at `addr_to` to the point labelled
    /// `descr`. A bridge can be stitched only once.
    pub fn stitch_bridge(&mut self, descr: DescrNumber, addr_to: Addr) -> ForestResult<TraceId> {
        let bridge_id = self
            .trace_id_at(addr_to)
            .ok_or(ForestError::NoTraceAtAddress { addr: addr_to })?;
        let bridge = self.trace_mut(bridge_id)?;
        if bridge.descr_nmr != 0 {
            return Err(ForestError::AlreadyStitched {
                trace: bridge_id,
                existing: bridge.descr_nmr,
                descr,
            });
        }
        bridge.descr_nmr = descr;
        self.stitches.insert(descr, bridge_id);
        self.link_to_point(descr, bridge_id, "stitch bridge");
        Ok(bridge_id)
    }

    /// Re-point `descr` at the trace assembled at `addr_to`, replacing any
    /// earlier link of that trace.
    pub fn redirect_assembler(
        &mut self,
        descr: DescrNumber,
        new_descr: DescrNumber,
        addr_to: Addr,
    ) -> ForestResult<TraceId> {
        let id = self
            .trace_id_at(addr_to)
            .ok_or(ForestError::NoTraceAtAddress { addr: addr_to })?;
        self.trace_mut(id)?.descr_nmr = descr;
        self.stitches.insert(descr, id);
        debug!(descr, new_descr, trace = id, "assembler redirected");
        self.link_to_point(descr, id, "redirect assembler");
        Ok(id)
    }

    /// Point registered for `descr`
    #[must_use]
    pub fn get_point_in_trace_by_descr(&self, descr: DescrNumber) -> Option<&PointInTrace> {
        self.descr_to_point.get(&descr)
    }

    /// Trace stitched to `descr`
    #[must_use]
    pub fn get_stitch_target(&self, descr: DescrNumber) -> Option<TraceId> {
        self.stitches.get(&descr).copied()
    }

    /// Apply a decoded counter event; returns the new total, `None` when
    /// it does not resolve to a counted trace or point
    pub fn add_up_enter_count(&mut self, kind: CounterKind, key: i64, count: u64) -> Option<u64> {
        match kind {
            CounterKind::Entry => self
                .traces
                .get_mut(&key)
                .map(|t| t.add_up_enter_count(count)),
            CounterKind::Bridge | CounterKind::Label => {
                let point = self.descr_to_point.get(&key)?;
                let trace = self.traces.get_mut(&point.trace())?;
                point.add_up_enter_count(trace, count)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Source lines
    // ---------------------------------------------------------------------

    /// Read the source files named by merge points and cache the lines
    /// around every referenced line. Returns the number of files read.
    pub fn extract_source_code_lines(&mut self) -> usize {
        let mut wanted: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for trace in self.traces.values() {
            for (file, lines) in trace.merge_point_files() {
                wanted.entry(file.clone()).or_default().extend(
                    lines
                        .iter()
                        .filter_map(|&l| u32::try_from(l).ok())
                        .filter(|&l| l > 0),
                );
            }
        }

        let mut read = 0;
        for (file, linenos) in wanted {
            let path = Path::new(&file);
            if !path.exists() {
                warn!(file = %file, "source file named by merge points does not exist");
                continue;
            }
            let contents = match fs::read(path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!(file = %file, error = %e, "source file could not be read");
                    continue;
                }
            };
            let saved = self.source_lines.entry(file).or_default();
            cache_file_lines(
                &contents,
                &linenos,
                self.config.line_gap,
                self.config.tab_width,
                saved,
            );
            read += 1;
        }
        read
    }

    /// Cache a source line decoded from the log; the first one recorded for
    /// a position stays
    pub fn add_source_code_line(&mut self, filename: &str, lineno: u32, indent: u8, line: String) {
        let lines = self.source_lines.entry(filename.to_string()).or_default();
        if lines.contains_key(&lineno) {
            warn!(file = filename, lineno, "source line recorded twice, keeping the first");
            return;
        }
        lines.insert(lineno, SourceLine::new(indent, line));
    }

    /// Cached source line
    #[must_use]
    pub fn get_source_line(&self, filename: &str, lineno: u32) -> Option<&SourceLine> {
        self.source_lines.get(filename)?.get(&lineno)
    }

    /// The whole source cache
    #[must_use]
    pub const fn source_lines(&self) -> &SourceCache {
        &self.source_lines
    }

    /// Encode the source cache as log trailer blocks
    pub fn encode_source_code_lines(&self) -> ForestResult<Vec<u8>> {
        encode_source_lines(&self.source_lines)
    }

    /// Append the encoded source cache to the file at `path`
    pub fn append_source_trailer(&self, path: &Path) -> ForestResult<()> {
        let blob = self.encode_source_code_lines()?;
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(&blob)?;
        debug!(path = %path.display(), bytes = blob.len(), "source trailer appended");
        Ok(())
    }

    /// Append the source cache to the log this forest was read from.
    /// Returns `false` when the forest has no backing file.
    pub fn copy_and_add_source_code_tags(&self) -> ForestResult<bool> {
        let Some(path) = self.filepath.as_deref() else {
            return Ok(false);
        };
        self.append_source_trailer(path)?;
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Reporting
    // ---------------------------------------------------------------------

    /// Counts describing this forest
    #[must_use]
    pub fn summary(&self) -> ForestSummary {
        let bridges = self.traces.values().filter(|t| t.is_bridge()).count();
        ForestSummary {
            version: self.version,
            word_size: self.word_size,
            machine: self.machine.clone(),
            traces: self.traces.len(),
            loops: self.traces.len() - bridges,
            bridges,
            assembled: self.traces.values().filter(|t| t.is_assembled()).count(),
            patches: self.patches.len(),
            stitches: self.stitches.len(),
        }
    }
}

impl fmt::Display for ForestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TraceForest(version={}, machine={}, word_size={}, traces={} (loops={}, bridges={}, assembled={}), patches={}, stitches={})",
            self.version,
            self.machine,
            self.word_size,
            self.traces,
            self.loops,
            self.bridges,
            self.assembled,
            self.patches,
            self.stitches
        )
    }
}

impl fmt::Display for TraceForest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.summary().fmt(f)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::marks::{INCREMENT_DEBUG_COUNTER, MP_FILENAME, MP_LINENO};
    use crate::op::{Instruction, MergePoint, MergePointValue};

    fn forest() -> TraceForest {
        TraceForest::new(1, false, "x86_64")
    }

    fn label(descr: DescrNumber) -> Instruction {
        Instruction::new(1, "label", Vec::new()).with_descr(format!("TargetToken({descr})"), descr)
    }

    fn assembled(forest: &mut TraceForest, kind: TraceKind, id: TraceId, start: Addr, end: Addr) {
        forest.add_trace(kind, id, None).unwrap();
        forest.set_addr_bounds(id, start, end).unwrap();
    }

    mod trace_registry_tests {
        use super::*;

        #[test]
        fn test_add_trace_stamps_and_activates() {
            let mut f = forest();
            assert_eq!(f.add_trace(TraceKind::Loop, 10, None).unwrap().stamp(), 0);
            assert_eq!(
                f.add_trace(TraceKind::Bridge, 11, Some("pypyjit".into()))
                    .unwrap()
                    .stamp(),
                1
            );
            assert_eq!(f.active_trace_id().unwrap(), 11);
            let ids: Vec<_> = f.traces().iter().map(|t| t.unique_id()).collect();
            assert_eq!(ids, vec![10, 11]);
        }

        #[test]
        fn test_duplicate_trace_is_fatal() {
            let mut f = forest();
            f.add_trace(TraceKind::Loop, 1, None).unwrap();
            assert!(matches!(
                f.add_trace(TraceKind::Loop, 1, None),
                Err(ForestError::DuplicateTrace { id: 1 })
            ));
        }

        #[test]
        fn test_time_tick() {
            let mut f = forest();
            f.time_tick();
            f.time_tick();
            assert_eq!(f.timepos(), 2);
        }

        #[test]
        fn test_stage_opened_at_current_time() {
            let mut f = forest();
            f.add_trace(TraceKind::Loop, 1, None).unwrap();
            f.time_tick();
            f.start_mark(1, Mark::TraceOpt).unwrap();
            let stage = f.get_trace(1).unwrap().get_stage(StageKind::Opt).unwrap();
            assert_eq!(stage.timeval(), 1);
        }

        #[test]
        fn test_unknown_trace() {
            let mut f = forest();
            assert!(matches!(
                f.start_mark(4, Mark::Trace),
                Err(ForestError::UnknownTrace { id: 4 })
            ));
            assert!(matches!(f.active_trace_id(), Err(ForestError::NoActiveTrace)));
        }
    }

    mod address_tests {
        use super::*;

        #[test]
        fn test_overlap_is_fatal() {
            let mut f = forest();
            assembled(&mut f, TraceKind::Loop, 1, 0x1000, 0x10ff);
            f.add_trace(TraceKind::Bridge, 2, None).unwrap();
            let err = f.set_addr_bounds(2, 0x10f0, 0x1200).unwrap_err();
            assert!(matches!(
                err,
                ForestError::AddressOverlap {
                    resident: 1,
                    resident_start: 0x1000,
                    ..
                }
            ));
            // range ending inside another trace
            assert!(f.set_addr_bounds(2, 0x0f00, 0x1000).is_err());
            // adjacent range is fine
            f.set_addr_bounds(2, 0x1100, 0x11ff).unwrap();
        }

        #[test]
        fn test_same_trace_can_move() {
            let mut f = forest();
            assembled(&mut f, TraceKind::Loop, 1, 0x1000, 0x10ff);
            f.set_addr_bounds(1, 0x1080, 0x11ff).unwrap();
            assert!(f.get_trace_by_addr(0x1000).is_none());
            assert_eq!(f.get_trace_by_addr(0x1100).unwrap().unique_id(), 1);
        }

        #[test]
        fn test_lookup_by_contained_address() {
            let mut f = forest();
            assembled(&mut f, TraceKind::Loop, 1, 0x1000, 0x10ff);
            assembled(&mut f, TraceKind::Loop, 2, 0x2000, 0x20ff);
            assert_eq!(f.get_trace_by_addr(0x1000).unwrap().unique_id(), 1);
            assert_eq!(f.get_trace_by_addr(0x10ff).unwrap().unique_id(), 1);
            assert!(f.get_trace_by_addr(0x1100).is_none());
            assert_eq!(f.get_trace_by_addr(0x2050).unwrap().unique_id(), 2);
            assert!(f.get_trace_by_addr(0x0fff).is_none());
        }
    }

    mod instr_tests {
        use super::*;

        #[test]
        fn test_first_registered_point_wins() {
            let mut f = forest();
            f.add_trace(TraceKind::Loop, 1, None).unwrap();
            f.start_mark(1, Mark::TraceOpt).unwrap();
            f.add_instr(1, label(0x40)).unwrap();
            f.add_instr(1, Instruction::new(2, "guard_true", vec!["i0".into()]).with_descr("g", 0x40))
                .unwrap();
            let point = f.get_point_in_trace_by_descr(0x40).unwrap();
            assert_eq!(point.op(), 0);
            assert_eq!(point.trace(), 1);
        }

        #[test]
        fn test_zero_descr_not_registered() {
            let mut f = forest();
            f.add_trace(TraceKind::Loop, 1, None).unwrap();
            f.start_mark(1, Mark::TraceOpt).unwrap();
            f.add_instr(1, label(0)).unwrap();
            assert!(f.get_point_in_trace_by_descr(0).is_none());
        }

        #[test]
        fn test_increment_attaches_to_preceding_label() {
            let mut f = forest();
            f.add_trace(TraceKind::Loop, 1, None).unwrap();
            f.start_mark(1, Mark::TraceAsm).unwrap();
            f.add_instr(1, label(0x50)).unwrap();
            f.add_instr(1, Instruction::new(9, INCREMENT_DEBUG_COUNTER, Vec::new()))
                .unwrap();
            assert_eq!(f.get_point_in_trace_by_descr(0x50).unwrap().inc_op(), Some(1));

            assert_eq!(f.add_up_enter_count(CounterKind::Label, 0x50, 3), Some(3));
            assert_eq!(f.add_up_enter_count(CounterKind::Label, 0x50, 4), Some(7));
            assert_eq!(f.get_trace(1).unwrap().point_counters().get(&1), Some(&7));
        }

        #[test]
        fn test_increment_in_asm_attaches_to_label_first_seen_in_opt() {
            let mut f = forest();
            f.add_trace(TraceKind::Loop, 1, None).unwrap();
            f.start_mark(1, Mark::TraceOpt).unwrap();
            f.add_instr(1, label(0x50)).unwrap();
            f.start_mark(1, Mark::TraceAsm).unwrap();
            f.add_instr(1, label(0x50)).unwrap();
            f.add_instr(1, Instruction::new(9, INCREMENT_DEBUG_COUNTER, Vec::new()))
                .unwrap();

            let point = f.get_point_in_trace_by_descr(0x50).unwrap();
            assert_eq!(point.stage(), StageKind::Opt);
            assert_eq!(point.inc_op(), Some(1));
            assert_eq!(f.add_up_enter_count(CounterKind::Label, 0x50, 2), Some(2));
            assert_eq!(f.get_trace(1).unwrap().point_counters().get(&1), Some(&2));
        }

        #[test]
        fn test_increment_after_label_of_other_trace_is_ignored() {
            let mut f = forest();
            f.add_trace(TraceKind::Loop, 1, None).unwrap();
            f.start_mark(1, Mark::TraceAsm).unwrap();
            f.add_instr(1, label(0x50)).unwrap();
            f.add_trace(TraceKind::Loop, 2, None).unwrap();
            f.start_mark(2, Mark::TraceAsm).unwrap();
            f.add_instr(2, label(0x50)).unwrap();
            f.add_instr(2, Instruction::new(9, INCREMENT_DEBUG_COUNTER, Vec::new()))
                .unwrap();
            assert_eq!(f.get_point_in_trace_by_descr(0x50).unwrap().inc_op(), None);
        }

        #[test]
        fn test_increment_without_label_is_ignored() {
            let mut f = forest();
            f.add_trace(TraceKind::Loop, 1, None).unwrap();
            f.start_mark(1, Mark::TraceAsm).unwrap();
            f.add_instr(1, Instruction::new(9, INCREMENT_DEBUG_COUNTER, Vec::new()))
                .unwrap();
            f.add_instr(1, Instruction::new(9, INCREMENT_DEBUG_COUNTER, Vec::new()))
                .unwrap();
            assert_eq!(f.get_trace(1).unwrap().get_stage(StageKind::Asm).unwrap().len(), 2);
        }

        #[test]
        fn test_entry_counter() {
            let mut f = forest();
            f.add_trace(TraceKind::Loop, 1, None).unwrap();
            assert_eq!(f.add_up_enter_count(CounterKind::Entry, 1, 5), Some(5));
            assert_eq!(f.add_up_enter_count(CounterKind::Entry, 2, 5), None);
            assert_eq!(f.add_up_enter_count(CounterKind::Bridge, 0x99, 5), None);
        }

        #[test]
        fn test_merge_point_records_source_line() {
            let mut f = forest();
            f.add_trace(TraceKind::Loop, 1, None).unwrap();
            f.start_mark(1, Mark::Trace).unwrap();
            let mp = MergePoint::default()
                .with_value(MP_FILENAME, MergePointValue::Str("m.py".into()))
                .with_value(MP_LINENO, MergePointValue::Int(7));
            f.add_instr(1, mp).unwrap();
            let files = f.get_trace(1).unwrap().merge_point_files();
            assert_eq!(files.get("m.py"), Some(&vec![7]));
        }

        #[test]
        fn test_core_dump_on_merge_point_not_applicable() {
            let mut f = forest();
            f.add_trace(TraceKind::Loop, 1, None).unwrap();
            f.start_mark(1, Mark::TraceAsm).unwrap();
            assert!(!f.set_core_dump_to_last_op(1, 0, vec![0x90]).unwrap());
            f.add_instr(1, MergePoint::default()).unwrap();
            assert!(!f.set_core_dump_to_last_op(1, 0, vec![0x90]).unwrap());
            f.add_instr(1, label(1)).unwrap();
            assert!(f.set_core_dump_to_last_op(1, 0, vec![0x90]).unwrap());
        }
    }

    mod stitch_tests {
        use super::*;

        fn loop_with_guard(f: &mut TraceForest) {
            assembled(f, TraceKind::Loop, 1, 0x1000, 0x10ff);
            f.start_mark(1, Mark::TraceAsm).unwrap();
            f.add_instr(1, Instruction::new(3, "guard_false", Vec::new()).with_descr("g", 0x77))
                .unwrap();
        }

        #[test]
        fn test_stitch_links_parent_once() {
            let mut f = forest();
            loop_with_guard(&mut f);
            assembled(&mut f, TraceKind::Bridge, 2, 0x2000, 0x20ff);
            assert_eq!(f.stitch_bridge(0x77, 0x2000).unwrap(), 2);

            let bridge = f.get_trace(2).unwrap();
            assert_eq!(bridge.get_parent(), Some(1));
            assert_eq!(bridge.get_stitched_descr_number(), 0x77);
            assert_eq!(f.get_trace(1).unwrap().bridges(), &[2]);
            assert_eq!(f.get_stitch_target(0x77), Some(2));
        }

        #[test]
        fn test_stitch_twice_fails() {
            let mut f = forest();
            loop_with_guard(&mut f);
            assembled(&mut f, TraceKind::Bridge, 2, 0x2000, 0x20ff);
            f.stitch_bridge(0x77, 0x2000).unwrap();
            assert!(matches!(
                f.stitch_bridge(0x78, 0x2010),
                Err(ForestError::AlreadyStitched { trace: 2, existing: 0x77, descr: 0x78 })
            ));
            assert_eq!(f.get_trace(1).unwrap().bridges(), &[2]);
        }

        #[test]
        fn test_stitch_without_point_leaves_link_unset() {
            let mut f = forest();
            assembled(&mut f, TraceKind::Bridge, 2, 0x2000, 0x20ff);
            f.stitch_bridge(0x55, 0x2000).unwrap();
            let bridge = f.get_trace(2).unwrap();
            assert_eq!(bridge.get_parent(), None);
            assert_eq!(bridge.get_stitched_descr_number(), 0x55);
        }

        #[test]
        fn test_stitch_unknown_address() {
            let mut f = forest();
            assert!(matches!(
                f.stitch_bridge(1, 0x9000),
                Err(ForestError::NoTraceAtAddress { addr: 0x9000 })
            ));
        }

        #[test]
        fn test_redirect_moves_child_without_duplicates() {
            let mut f = forest();
            loop_with_guard(&mut f);
            assembled(&mut f, TraceKind::Loop, 3, 0x3000, 0x30ff);
            f.start_mark(3, Mark::TraceAsm).unwrap();
            f.add_instr(3, label(0x88)).unwrap();
            assembled(&mut f, TraceKind::Bridge, 2, 0x2000, 0x20ff);

            f.stitch_bridge(0x77, 0x2000).unwrap();
            f.redirect_assembler(0x88, 0x89, 0x2000).unwrap();
            f.redirect_assembler(0x88, 0x89, 0x2000).unwrap();

            assert_eq!(f.get_trace(2).unwrap().get_parent(), Some(3));
            assert!(f.get_trace(1).unwrap().bridges().is_empty());
            assert_eq!(f.get_trace(3).unwrap().bridges(), &[2]);
            assert_eq!(f.get_trace(2).unwrap().get_stitched_descr_number(), 0x88);
        }
    }

    mod source_tests {
        use super::*;

        #[test]
        fn test_add_source_code_line_keeps_first() {
            let mut f = forest();
            f.add_source_code_line("a.py", 1, 0, "x = 1".into());
            f.add_source_code_line("a.py", 1, 4, "y = 2".into());
            assert_eq!(f.get_source_line("a.py", 1), Some(&SourceLine::new(0, "x = 1")));
            assert!(f.get_source_line("a.py", 2).is_none());
            assert!(f.get_source_line("b.py", 1).is_none());
        }

        #[test]
        fn test_missing_source_file_skipped() {
            let mut f = forest();
            f.add_trace(TraceKind::Loop, 1, None).unwrap();
            f.start_mark(1, Mark::TraceOpt).unwrap();
            let mp = MergePoint::default()
                .with_value(MP_FILENAME, MergePointValue::Str("/nonexistent/x.py".into()))
                .with_value(MP_LINENO, MergePointValue::Int(1));
            f.add_instr(1, mp).unwrap();
            assert_eq!(f.extract_source_code_lines(), 0);
            assert!(f.source_lines().is_empty());
        }

        #[test]
        fn test_copy_without_filepath() {
            let f = forest();
            assert!(!f.copy_and_add_source_code_tags().unwrap());
        }
    }

    #[test]
    fn test_summary_display() {
        let mut f = forest();
        assembled(&mut f, TraceKind::Loop, 1, 0x1000, 0x10ff);
        f.add_trace(TraceKind::Bridge, 2, None).unwrap();
        f.patch_memory(0x1000, vec![0xCC], 0);
        let summary = f.summary();
        assert_eq!(summary.loops, 1);
        assert_eq!(summary.bridges, 1);
        assert_eq!(summary.assembled, 1);
        assert_eq!(summary.patches, 1);
        assert!(f.to_string().starts_with("TraceForest(version=1, machine=x86_64, word_size=8"));
    }
}
