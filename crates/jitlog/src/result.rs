//! Result and error types for jitlog.

use crate::forest::{Addr, DescrNumber, TraceId};
use thiserror::Error;

/// Result type for forest operations
pub type ForestResult<T> = Result<T, ForestError>;

/// Errors that abort ingestion of a log
#[derive(Debug, Error)]
pub enum ForestError {
    /// Two traces claim overlapping machine code
    #[error("Address range {start:#x}..={end:#x} overlaps trace {resident} (resident at {resident_start:#x})")]
    AddressOverlap {
        /// Start of the rejected range
        start: Addr,
        /// End of the rejected range
        end: Addr,
        /// Trace already occupying the region
        resident: TraceId,
        /// Start address of the resident trace
        resident_start: Addr,
    },

    /// A bridge can only be stitched once
    #[error("Trace {trace} is already stitched to descr {existing:#x}, refusing descr {descr:#x}")]
    AlreadyStitched {
        /// Bridge trace id
        trace: TraceId,
        /// Descr number it is already stitched to
        existing: DescrNumber,
        /// Descr number of the rejected stitch
        descr: DescrNumber,
    },

    /// Trace id registered twice
    #[error("Trace {id} is already registered")]
    DuplicateTrace {
        /// Trace id
        id: TraceId,
    },

    /// No trace resides at the given address
    #[error("No trace found at address {addr:#x}")]
    NoTraceAtAddress {
        /// Address looked up
        addr: Addr,
    },

    /// Trace id not known to the forest
    #[error("Unknown trace {id}")]
    UnknownTrace {
        /// Trace id
        id: TraceId,
    },

    /// An event needs an active trace but none was started
    #[error("No active trace")]
    NoActiveTrace,

    /// An operation arrived before any stage mark for its trace
    #[error("Trace {trace} has no active stage")]
    NoActiveStage {
        /// Trace id
        trace: TraceId,
    },

    /// Input does not start with a jitlog header
    #[error("Not a jitlog: missing header mark")]
    NotAJitlog,

    /// Input ended in the middle of a record
    #[error("Unexpected end of log at offset {offset} while reading {what}")]
    UnexpectedEof {
        /// Byte offset where reading stopped
        offset: usize,
        /// What was being decoded
        what: &'static str,
    },

    /// Mark byte without a decoder
    #[error("Unknown marker {marker:#04x} at offset {offset}")]
    UnknownMarker {
        /// Marker byte
        marker: u8,
        /// Byte offset of the marker
        offset: usize,
    },

    /// Trace type string other than `loop` or `bridge`
    #[error("Invalid trace type '{value}'")]
    InvalidTraceKind {
        /// Decoded type string
        value: String,
    },

    /// Merge-point type table declares a value type other than `s` or `i`
    #[error("Invalid merge point value type {value:#04x} for tag {tag:#04x}")]
    InvalidMergePointType {
        /// Semantic tag
        tag: u8,
        /// Declared value type byte
        value: u8,
    },

    /// String field is not UTF-8
    #[error("Invalid UTF-8 in {what} at offset {offset}")]
    InvalidUtf8 {
        /// What was being decoded
        what: &'static str,
        /// Byte offset of the field
        offset: usize,
    },

    /// Source cache does not fit the trailer header widths
    #[error("Source trailer overflow: {message}")]
    TrailerOverflow {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
