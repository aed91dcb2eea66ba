//! Mark bytes and merge-point semantic tags of the jitlog format.
//!
//! Every record in a jitlog starts with one of the `MARK_*` bytes. Strings
//! are a little-endian `u32` length followed by the raw bytes; addresses are
//! little-endian signed integers of the forest's word size.

/// `u16 count` then `count × (u16 opnum, string name)`
pub const MARK_RESOP_META: u8 = 0x11;
/// `u16 opnum, string "result,arg,..."`
pub const MARK_RESOP: u8 = 0x12;
/// `u16 opnum, string "result,arg,...,descr", addr descr_number, string failargs`
pub const MARK_RESOP_DESCR: u8 = 0x13;
/// `string "arg,..."` for the active trace
pub const MARK_INPUT_ARGS: u8 = 0x10;
/// `addr unique_id, addr start, addr end`
pub const MARK_ASM_ADDR: u8 = 0x14;
/// `u16 relative offset, string raw bytes` for the last op of the active stage
pub const MARK_ASM: u8 = 0x15;
/// `addr unique_id`: enter the generic trace stage
pub const MARK_TRACE: u8 = 0x16;
/// `addr unique_id`: enter the optimized stage
pub const MARK_TRACE_OPT: u8 = 0x17;
/// `addr unique_id`: enter the assembled stage
pub const MARK_TRACE_ASM: u8 = 0x18;
/// `addr descr_number, addr target`
pub const MARK_STITCH_BRIDGE: u8 = 0x19;
/// `addr unique_id, string type, addr trace_nmr, string jd_name`
pub const MARK_START_TRACE: u8 = 0x1a;
/// `addr key, u8 kind, u64 count`
pub const MARK_JITLOG_COUNTER: u8 = 0x1b;
/// `u8 count` then `count × (u8 semantic tag, u8 value type)`; types are `s` or `i`
pub const MARK_INIT_MERGE_POINT: u8 = 0x1c;
/// `u16 version, u8 is_32bit, string machine`
pub const MARK_JITLOG_HEADER: u8 = 0x1d;
/// One value per declared merge-point type: `string` for `s`, `u64` for `i`
pub const MARK_MERGE_POINT: u8 = 0x1e;
/// `u8 semantic tag, string prefix`
pub const MARK_COMMON_PREFIX: u8 = 0x1f;
/// `addr unique_id`
pub const MARK_ABORT_TRACE: u8 = 0x20;
/// Source trailer block, see [`crate::encode_source_lines`]
pub const MARK_SOURCE_CODE: u8 = 0x21;
/// `addr descr_number, addr new_descr_number, addr target`
pub const MARK_REDIRECT_ASSEMBLER: u8 = 0x22;
/// `addr address, string content`
pub const MARK_ASM_PATCH: u8 = 0x23;

/// Merge point value naming the source file
pub const MP_FILENAME: u8 = 0x1;
/// Merge point value naming the source line
pub const MP_LINENO: u8 = 0x2;
/// Merge point value naming the bytecode index
pub const MP_INDEX: u8 = 0x4;
/// Merge point value naming the enclosing scope (function name)
pub const MP_SCOPE: u8 = 0x8;
/// Merge point value naming the bytecode opcode
pub const MP_OPCODE: u8 = 0x10;

/// Name of the operation that counts entries into the preceding label
pub const INCREMENT_DEBUG_COUNTER: &str = "increment_debug_counter";
