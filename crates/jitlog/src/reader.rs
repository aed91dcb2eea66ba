//! Decoding of the binary mark stream into a [`TraceForest`].
//!
//! The reader owns the decoder state that only matters while reading: the
//! opnum to name table, the declared merge-point value types and the common
//! string prefixes. Everything that describes the traces goes to the forest.

use crate::forest::{Addr, TraceForest, TraceId};
use crate::marks::*;
use crate::op::{Instruction, MergePoint, MergePointValue};
use crate::point::CounterKind;
use crate::result::{ForestError, ForestResult};
use crate::stage::Mark;
use crate::trace::TraceKind;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Value type of a merge-point field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueType {
    Str,
    Int,
}

/// Little-endian byte cursor over a log
#[derive(Debug)]
struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    const fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    const fn offset(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize, what: &'static str) -> ForestResult<&'a [u8]> {
        let bytes = self
            .pos
            .checked_add(len)
            .and_then(|end| self.data.get(self.pos..end))
            .ok_or(ForestError::UnexpectedEof {
                offset: self.pos,
                what,
            })?;
        self.pos += len;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, what: &'static str) -> ForestResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &'static str) -> ForestResult<u8> {
        Ok(self.array::<1>(what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> ForestResult<u16> {
        Ok(u16::from_le_bytes(self.array(what)?))
    }

    fn u32(&mut self, what: &'static str) -> ForestResult<u32> {
        Ok(u32::from_le_bytes(self.array(what)?))
    }

    fn u64(&mut self, what: &'static str) -> ForestResult<u64> {
        Ok(u64::from_le_bytes(self.array(what)?))
    }

    fn addr(&mut self, word_size: u8, what: &'static str) -> ForestResult<Addr> {
        if word_size == 4 {
            Ok(Addr::from(i32::from_le_bytes(self.array(what)?)))
        } else {
            Ok(i64::from_le_bytes(self.array(what)?))
        }
    }

    fn blob(&mut self, what: &'static str) -> ForestResult<&'a [u8]> {
        let len = self.u32(what)? as usize;
        self.take(len, what)
    }

    fn string(&mut self, what: &'static str) -> ForestResult<String> {
        let offset = self.pos;
        let bytes = self.blob(what)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| ForestError::InvalidUtf8 { what, offset })
    }
}

fn split_list(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(',').map(str::to_string).collect()
}

/// Streaming decoder feeding one forest
#[derive(Debug)]
pub struct JitlogReader<'a> {
    cursor: ByteCursor<'a>,
    forest: TraceForest,
    resops: HashMap<u16, String>,
    mp_types: Vec<(u8, ValueType)>,
    prefixes: HashMap<u8, String>,
}

impl<'a> JitlogReader<'a> {
    /// Read the header of `data` and prepare an empty forest
    pub fn new(data: &'a [u8]) -> ForestResult<Self> {
        let mut cursor = ByteCursor::new(data);
        if cursor.u8("header mark").ok() != Some(MARK_JITLOG_HEADER) {
            return Err(ForestError::NotAJitlog);
        }
        let version = cursor.u16("version")?;
        let is_32bit = cursor.u8("word size flag")? != 0;
        let machine = cursor.string("machine")?;
        debug!(version, is_32bit, machine = %machine, "jitlog header");
        Ok(Self {
            cursor,
            forest: TraceForest::new(version, is_32bit, machine),
            resops: HashMap::new(),
            mp_types: Vec::new(),
            prefixes: HashMap::new(),
        })
    }

    /// Forest built so far
    #[must_use]
    pub const fn forest(&self) -> &TraceForest {
        &self.forest
    }

    /// Decode every remaining mark and hand out the forest
    pub fn read_all(mut self) -> ForestResult<TraceForest> {
        while !self.cursor.at_end() {
            self.read_mark()?;
            self.forest.time_tick();
        }
        debug!(traces = self.forest.len(), time = self.forest.timepos(), "jitlog decoded");
        Ok(self.forest)
    }

    fn addr(&mut self, what: &'static str) -> ForestResult<Addr> {
        let word_size = self.forest.word_size();
        self.cursor.addr(word_size, what)
    }

    /// Decode a single mark
    pub fn read_mark(&mut self) -> ForestResult<()> {
        let offset = self.cursor.offset();
        let marker = self.cursor.u8("mark")?;
        match marker {
            MARK_RESOP_META => self.read_resop_meta(),
            MARK_START_TRACE => self.read_start_trace(),
            MARK_INPUT_ARGS => {
                let args = self.cursor.string("input args")?;
                let id = self.forest.active_trace_id()?;
                self.forest.set_inputargs(id, split_list(&args))
            }
            MARK_TRACE => self.read_stage_mark(Mark::Trace),
            MARK_TRACE_OPT => self.read_stage_mark(Mark::TraceOpt),
            MARK_TRACE_ASM => self.read_stage_mark(Mark::TraceAsm),
            MARK_RESOP => self.read_resop(false),
            MARK_RESOP_DESCR => self.read_resop(true),
            MARK_ASM_ADDR => {
                let id = self.addr("trace id")?;
                let start = self.addr("code start")?;
                let end = self.addr("code end")?;
                self.forest.set_addr_bounds(id, start, end)
            }
            MARK_ASM => {
                let rel_pos = self.cursor.u16("relative position")?;
                let bytes = self.cursor.blob("machine code")?.to_vec();
                let id = self.forest.active_trace_id()?;
                self.forest
                    .set_core_dump_to_last_op(id, usize::from(rel_pos), bytes)
                    .map(|_| ())
            }
            MARK_ASM_PATCH => {
                let addr = self.addr("patch address")?;
                let content = self.cursor.blob("patch content")?.to_vec();
                let time = self.forest.timepos();
                self.forest.patch_memory(addr, content, time);
                Ok(())
            }
            MARK_STITCH_BRIDGE => {
                let descr = self.addr("descr number")?;
                let target = self.addr("bridge address")?;
                self.forest.stitch_bridge(descr, target).map(|_| ())
            }
            MARK_REDIRECT_ASSEMBLER => {
                let descr = self.addr("descr number")?;
                let new_descr = self.addr("new descr number")?;
                let target = self.addr("target address")?;
                self.forest
                    .redirect_assembler(descr, new_descr, target)
                    .map(|_| ())
            }
            MARK_JITLOG_COUNTER => self.read_counter(),
            MARK_INIT_MERGE_POINT => self.read_merge_point_types(),
            MARK_COMMON_PREFIX => {
                let tag = self.cursor.u8("prefix tag")?;
                let prefix = self.cursor.string("common prefix")?;
                self.prefixes.insert(tag, prefix);
                Ok(())
            }
            MARK_MERGE_POINT => self.read_merge_point(),
            MARK_ABORT_TRACE => {
                let id: TraceId = self.addr("trace id")?;
                debug!(trace = id, "trace aborted");
                Ok(())
            }
            MARK_SOURCE_CODE => self.read_source_block(),
            other => Err(ForestError::UnknownMarker {
                marker: other,
                offset,
            }),
        }
    }

    fn read_resop_meta(&mut self) -> ForestResult<()> {
        let count = self.cursor.u16("resop count")?;
        for _ in 0..count {
            let opnum = self.cursor.u16("opnum")?;
            let name = self.cursor.string("opname")?;
            self.resops.insert(opnum, name);
        }
        Ok(())
    }

    fn read_start_trace(&mut self) -> ForestResult<()> {
        let id = self.addr("trace id")?;
        let kind = TraceKind::parse(&self.cursor.string("trace type")?)?;
        let _trace_nmr = self.addr("trace number")?;
        let jd_name = self.cursor.string("jit driver name")?;
        let jd_name = (!jd_name.is_empty()).then_some(jd_name);
        self.forest.add_trace(kind, id, jd_name)?;
        Ok(())
    }

    fn read_stage_mark(&mut self, mark: Mark) -> ForestResult<()> {
        let id = self.addr("trace id")?;
        self.forest.start_mark(id, mark)?;
        Ok(())
    }

    fn read_resop(&mut self, with_descr: bool) -> ForestResult<()> {
        let opnum = self.cursor.u16("opnum")?;
        let fields = self.cursor.string("operation fields")?;
        let mut parts = split_list(&fields);
        let descr_text = if with_descr { parts.pop() } else { None };
        let opname = match self.resops.get(&opnum) {
            Some(name) => name.clone(),
            None => {
                warn!(opnum, "operation number missing from the resop table");
                format!("<opnum {opnum}>")
            }
        };

        let result = if parts.is_empty() {
            None
        } else {
            Some(parts.remove(0)).filter(|r| !r.is_empty())
        };
        let mut instr = Instruction::new(opnum, opname, parts);
        instr.result = result;
        if with_descr {
            let number = self.addr("descr number")?;
            let failargs = self.cursor.string("failargs")?;
            instr = instr.with_descr(descr_text.unwrap_or_default(), number);
            if !failargs.is_empty() {
                instr = instr.with_failargs(split_list(&failargs));
            }
        }

        let id = self.forest.active_trace_id()?;
        self.forest.add_instr(id, instr)?;
        Ok(())
    }

    fn read_counter(&mut self) -> ForestResult<()> {
        let key = self.addr("counter key")?;
        let kind_byte = self.cursor.u8("counter kind")?;
        let count = self.cursor.u64("count")?;
        match CounterKind::from_byte(kind_byte) {
            Some(kind) => {
                if self.forest.add_up_enter_count(kind, key, count).is_none() {
                    debug!(key, ?kind, "counter does not resolve to a trace or point");
                }
            }
            None => warn!(kind = kind_byte, key, "unknown counter kind"),
        }
        Ok(())
    }

    fn read_merge_point_types(&mut self) -> ForestResult<()> {
        let count = self.cursor.u8("merge point type count")?;
        self.mp_types.clear();
        for _ in 0..count {
            let tag = self.cursor.u8("merge point tag")?;
            let value = self.cursor.u8("merge point value type")?;
            let ty = match value {
                b's' => ValueType::Str,
                b'i' => ValueType::Int,
                _ => return Err(ForestError::InvalidMergePointType { tag, value }),
            };
            self.mp_types.push((tag, ty));
        }
        Ok(())
    }

    fn read_merge_point(&mut self) -> ForestResult<()> {
        let mut mp = MergePoint::default();
        for i in 0..self.mp_types.len() {
            let (tag, ty) = self.mp_types[i];
            let value = match ty {
                ValueType::Str => {
                    let suffix = self.cursor.string("merge point value")?;
                    match self.prefixes.get(&tag) {
                        Some(prefix) => MergePointValue::Str(format!("{prefix}{suffix}")),
                        None => MergePointValue::Str(suffix),
                    }
                }
                ValueType::Int => {
                    MergePointValue::Int(self.cursor.u64("merge point value")? as i64)
                }
            };
            mp = mp.with_value(tag, value);
        }
        let id = self.forest.active_trace_id()?;
        self.forest.add_instr(id, mp)?;
        Ok(())
    }

    fn read_source_block(&mut self) -> ForestResult<()> {
        let filename = self.cursor.string("source filename")?;
        let count = self.cursor.u16("source line count")?;
        for _ in 0..count {
            let lineno = self.cursor.u16("source lineno")?;
            let indent = self.cursor.u8("source indent")?;
            let text = self.cursor.string("source line")?;
            self.forest
                .add_source_code_line(&filename, u32::from(lineno), indent, text);
        }
        Ok(())
    }
}

/// Decode a complete jitlog held in memory
pub fn parse_jitlog(data: &[u8]) -> ForestResult<TraceForest> {
    JitlogReader::new(data)?.read_all()
}

/// Decode the jitlog at `path`; the forest remembers the path for
/// [`TraceForest::copy_and_add_source_code_tags`]
pub fn read_jitlog(path: &Path) -> ForestResult<TraceForest> {
    let data = std::fs::read(path)?;
    Ok(parse_jitlog(&data)?.with_filepath(path))
}
