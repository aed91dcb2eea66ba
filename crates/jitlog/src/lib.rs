//! Jitlog: trace forest reconstruction for JIT compiler logs
//!
//! A tracing JIT writes a binary log while it compiles: every loop and
//! bridge it records, the operations of each compilation stage, the machine
//! code it emits and the patches it later applies to that code. This crate
//! folds such a log into a [`TraceForest`] that can be queried afterwards.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────────────────┐
//! │ jitlog bytes │───►│ JitlogReader │───►│ TraceForest              │
//! │ (marks)      │    │ decoder state│    │  traces ─ stages ─ ops   │
//! └──────────────┘    └──────────────┘    │  addrs, patches, points  │
//!                                          │  source line cache       │
//!                                          └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use jitlog::{DumpTime, Instruction, Mark, TraceForest, TraceKind, StageKind};
//!
//! let mut forest = TraceForest::new(1, false, "x86_64");
//! forest.add_trace(TraceKind::Loop, 1, None).unwrap();
//! forest.start_mark(1, Mark::TraceAsm).unwrap();
//! forest.add_instr(1, Instruction::new(1, "label", vec![])).unwrap();
//! forest.set_core_dump_to_last_op(1, 0, vec![0x90, 0x90]).unwrap();
//! forest.set_addr_bounds(1, 0x1000, 0x1001).unwrap();
//! forest.time_tick();
//! forest.patch_memory(0x1000, vec![0xCC], forest.timepos());
//!
//! assert_eq!(forest.get_core_dump(1, DumpTime::Latest, ..), Some(vec![0xCC, 0x90]));
//! assert_eq!(forest.get_core_dump(1, DumpTime::Initial, ..), Some(vec![0x90, 0x90]));
//! assert_eq!(forest.get_trace(1).unwrap().pretty_print(StageKind::Asm), "label()");
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

mod config;
mod core_dump;
mod forest;
pub mod marks;
mod op;
mod point;
mod reader;
mod result;
mod source;
mod stage;
mod trace;

pub use config::ForestConfig;
pub use core_dump::{apply_patches, CoreDump, DumpTime, Patch};
pub use forest::{Addr, DescrNumber, ForestSummary, TraceForest, TraceId};
pub use op::{Descr, Instruction, MergePoint, MergePointValue, Op};
pub use point::{CounterKind, PointInTrace};
pub use reader::{parse_jitlog, read_jitlog, JitlogReader};
pub use result::{ForestError, ForestResult};
pub use source::{
    cache_file_lines, encode_source_lines, iter_ranges, LineRanges, SourceCache, SourceLine,
    DEFAULT_LINE_GAP,
};
pub use stage::{Mark, Stage, StageKind};
pub use trace::{AddrRange, Trace, TraceKind};
