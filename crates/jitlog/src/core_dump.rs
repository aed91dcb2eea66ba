//! Time-ordered replay of memory patches onto captured machine code.
//!
//! The compiler backpatches code it already emitted (forward jump targets,
//! guard redirection). The log records the unpatched bytes of every
//! assembled instruction plus each later patch with the logical time it
//! happened, so the bytes "as of" any point of the timeline can be rebuilt.

use crate::forest::Addr;
use serde::{Deserialize, Serialize};

/// One recorded write into assembled code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Forest clock when the patch was recorded
    pub time: u64,
    /// Absolute target address
    pub addr: Addr,
    /// Bytes written at `addr`
    pub content: Vec<u8>,
}

impl Patch {
    /// Create a new patch
    #[must_use]
    pub fn new(time: u64, addr: Addr, content: impl Into<Vec<u8>>) -> Self {
        Self {
            time,
            addr,
            content: content.into(),
        }
    }
}

/// Machine code captured for one instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreDump {
    /// Offset of the instruction within its trace's code
    pub rel_pos: usize,
    /// Unpatched bytes
    pub bytes: Vec<u8>,
}

impl CoreDump {
    /// Create a new core dump fragment
    #[must_use]
    pub fn new(rel_pos: usize, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            rel_pos,
            bytes: bytes.into(),
        }
    }

    /// Replay `patches` onto this fragment of a trace based at `base`
    #[must_use]
    pub fn replay(&self, base: Addr, patches: &[Patch], at: DumpTime) -> Vec<u8> {
        apply_patches(&self.bytes, self.rel_pos, base, patches, at)
    }
}

/// Point of the logical timeline a core dump is reconstructed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DumpTime {
    /// Before any patch was recorded
    Initial,
    /// As of the given forest clock value (patches at that time included)
    At(u64),
    /// After every recorded patch
    #[default]
    Latest,
}

impl DumpTime {
    /// Whether a patch recorded at `time` had happened by this point
    #[must_use]
    pub const fn includes(self, time: u64) -> bool {
        match self {
            Self::Initial => false,
            Self::At(t) => time <= t,
            Self::Latest => true,
        }
    }
}

/// Rebuild the bytes of one instruction as of `at`.
///
/// `raw` are the unpatched bytes of an instruction placed `rel_pos` bytes
/// into a trace whose code starts at `base`. Patches are applied in slice
/// order; later ones win on overlap. A patch starting before the
/// instruction or at/after its end targets another instruction and is
/// ignored; one running past the end is clipped.
#[must_use]
pub fn apply_patches(
    raw: &[u8],
    rel_pos: usize,
    base: Addr,
    patches: &[Patch],
    at: DumpTime,
) -> Vec<u8> {
    let mut buf = raw.to_vec();
    let Ok(rel_pos) = i64::try_from(rel_pos) else {
        return buf;
    };
    for patch in patches {
        if !at.includes(patch.time) {
            continue;
        }
        let patch_start = patch.addr.wrapping_sub(base).wrapping_sub(rel_pos);
        let Ok(start) = usize::try_from(patch_start) else {
            continue;
        };
        if start >= buf.len() {
            continue;
        }
        let len = patch.content.len().min(buf.len() - start);
        buf[start..start + len].copy_from_slice(&patch.content[..len]);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOPS: [u8; 4] = [0x90, 0x90, 0x90, 0x90];

    #[test]
    fn test_initial_returns_raw_bytes() {
        let patches = vec![Patch::new(0, 0x1000, vec![0xCC])];
        let out = apply_patches(&NOPS, 0, 0x1000, &patches, DumpTime::Initial);
        assert_eq!(out, NOPS);
    }

    #[test]
    fn test_patch_after_query_time_is_skipped() {
        let patches = vec![Patch::new(5, 0x1000, vec![0xCC])];
        assert_eq!(
            apply_patches(&NOPS, 0, 0x1000, &patches, DumpTime::At(0)),
            NOPS
        );
        assert_eq!(
            apply_patches(&NOPS, 0, 0x1000, &patches, DumpTime::At(5)),
            vec![0xCC, 0x90, 0x90, 0x90]
        );
    }

    #[test]
    fn test_patch_relative_to_instruction_offset() {
        // instruction lives 8 bytes into the trace, patch hits its second byte
        let patches = vec![Patch::new(1, 0x1009, vec![0xAA, 0xBB])];
        let out = apply_patches(&NOPS, 8, 0x1000, &patches, DumpTime::Latest);
        assert_eq!(out, vec![0x90, 0xAA, 0xBB, 0x90]);
    }

    #[test]
    fn test_patch_clipped_at_end() {
        let patches = vec![Patch::new(1, 0x1002, vec![1, 2, 3, 4, 5])];
        let out = apply_patches(&NOPS, 0, 0x1000, &patches, DumpTime::Latest);
        assert_eq!(out, vec![0x90, 0x90, 1, 2]);
    }

    #[test]
    fn test_patch_outside_window_ignored() {
        let patches = vec![
            Patch::new(1, 0x0fff, vec![0xCC, 0xCC]),
            Patch::new(1, 0x1004, vec![0xCC]),
            Patch::new(1, 0x2000, vec![0xCC]),
        ];
        let out = apply_patches(&NOPS, 0, 0x1000, &patches, DumpTime::Latest);
        assert_eq!(out, NOPS);
    }

    #[test]
    fn test_empty_patch_content_is_noop() {
        let patches = vec![Patch::new(1, 0x1001, Vec::new())];
        let out = apply_patches(&NOPS, 0, 0x1000, &patches, DumpTime::Latest);
        assert_eq!(out, NOPS);
    }

    #[test]
    fn test_later_patch_overrides_earlier() {
        let patches = vec![
            Patch::new(2, 0x1000, vec![0x11, 0x22]),
            Patch::new(1, 0x1001, vec![0x33]),
        ];
        let out = apply_patches(&NOPS, 0, 0x1000, &patches, DumpTime::Latest);
        assert_eq!(out, vec![0x11, 0x33, 0x90, 0x90]);
    }

    #[test]
    fn test_dump_time_includes() {
        assert!(!DumpTime::Initial.includes(0));
        assert!(DumpTime::At(3).includes(3));
        assert!(!DumpTime::At(3).includes(4));
        assert!(DumpTime::Latest.includes(u64::MAX));
        assert_eq!(DumpTime::default(), DumpTime::Latest);
    }

    #[test]
    fn test_core_dump_replay() {
        let dump = CoreDump::new(4, NOPS);
        let patches = vec![Patch::new(0, 0x1007, vec![0xC3])];
        assert_eq!(
            dump.replay(0x1000, &patches, DumpTime::Latest),
            vec![0x90, 0x90, 0x90, 0xC3]
        );
    }
}
