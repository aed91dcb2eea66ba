//! Source lines referenced by merge points.
//!
//! Merge points name `(file, line)` pairs. Resolving them reads each file
//! once and keeps only the lines in coalesced ranges around the referenced
//! numbers. The resulting cache can be appended to the log as a trailer so
//! the log stays readable without the sources.

use crate::marks::MARK_SOURCE_CODE;
use crate::result::{ForestError, ForestResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use tracing::debug;

/// Default distance between referenced lines that still share one span
pub const DEFAULT_LINE_GAP: u32 = 50;

/// One cached source line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLine {
    /// Indentation width in columns
    pub indent: u8,
    /// Line text without leading whitespace
    pub text: String,
}

impl SourceLine {
    /// Create a cached line
    #[must_use]
    pub fn new(indent: u8, text: impl Into<String>) -> Self {
        Self {
            indent,
            text: text.into(),
        }
    }

    /// Split a raw line into indentation width and stripped text; every tab
    /// counts `tab_width` columns. Widths above 255 are clamped.
    #[must_use]
    pub fn from_raw(line: &str, tab_width: u8) -> Self {
        let text = line.trim_start();
        let stripped = &line[..line.len() - text.len()];
        let extra = usize::from(tab_width.saturating_sub(1));
        let width: usize = stripped
            .chars()
            .map(|c| if c == '\t' { 1 + extra } else { 1 })
            .sum();
        let indent = u8::try_from(width).unwrap_or_else(|_| {
            debug!(width, "indentation wider than 255 columns, clamped");
            u8::MAX
        });
        Self {
            indent,
            text: text.to_string(),
        }
    }
}

/// Cached lines of every resolved file
pub type SourceCache = BTreeMap<String, BTreeMap<u32, SourceLine>>;

/// Inclusive line spans covering a set of line numbers
#[derive(Debug, Clone)]
pub struct LineRanges {
    sorted: Vec<u32>,
    pos: usize,
    gap: u32,
}

impl Iterator for LineRanges {
    type Item = RangeInclusive<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = *self.sorted.get(self.pos)?;
        let mut last = first;
        self.pos += 1;
        while let Some(&next) = self.sorted.get(self.pos) {
            if next - last > self.gap {
                break;
            }
            last = next;
            self.pos += 1;
        }
        Some(first..=last)
    }
}

/// Coalesce `linenos` into spans, splitting wherever two neighbouring line
/// numbers are more than `gap` apart.
///
/// The input is not modified; each call yields a fresh iterator.
#[must_use]
pub fn iter_ranges(linenos: &[u32], gap: u32) -> LineRanges {
    let mut sorted = linenos.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    LineRanges { sorted, pos: 0, gap }
}

/// Store the lines of `contents` covered by the spans around `linenos`.
///
/// Line numbers are 1-based; spans reaching past the end of the file stop
/// at the last line.
pub fn cache_file_lines(
    contents: &str,
    linenos: &[u32],
    gap: u32,
    tab_width: u8,
    into: &mut BTreeMap<u32, SourceLine>,
) {
    let lines: Vec<&str> = contents.lines().collect();
    for span in iter_ranges(linenos, gap) {
        for lineno in span {
            let Some(raw) = lineno
                .checked_sub(1)
                .and_then(|i| lines.get(i as usize))
            else {
                break;
            };
            into.insert(lineno, SourceLine::from_raw(raw, tab_width));
        }
    }
}

fn overflow(message: String) -> ForestError {
    ForestError::TrailerOverflow { message }
}

/// Encode the cache as source-code trailer blocks.
///
/// Per file: `MARK_SOURCE_CODE`, `u32` filename length, UTF-8 filename,
/// `u16` line count, then per line `u16 lineno, u8 indent, u32 length` and
/// the UTF-8 text. All integers little endian.
pub fn encode_source_lines(cache: &SourceCache) -> ForestResult<Vec<u8>> {
    let mut out = Vec::new();
    for (filename, lines) in cache {
        out.push(MARK_SOURCE_CODE);
        let name_len = u32::try_from(filename.len())
            .map_err(|_| overflow(format!("filename of {} bytes", filename.len())))?;
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(filename.as_bytes());
        let count = u16::try_from(lines.len())
            .map_err(|_| overflow(format!("{} lines cached for {filename}", lines.len())))?;
        out.extend_from_slice(&count.to_le_bytes());
        for (&lineno, line) in lines {
            let lineno = u16::try_from(lineno)
                .map_err(|_| overflow(format!("line {lineno} of {filename}")))?;
            let text_len = u32::try_from(line.text.len())
                .map_err(|_| overflow(format!("line {lineno} of {filename} is too long")))?;
            out.extend_from_slice(&lineno.to_le_bytes());
            out.push(line.indent);
            out.extend_from_slice(&text_len.to_le_bytes());
            out.extend_from_slice(line.text.as_bytes());
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ranges(linenos: &[u32]) -> Vec<RangeInclusive<u32>> {
        iter_ranges(linenos, DEFAULT_LINE_GAP).collect()
    }

    #[test]
    fn test_iter_ranges_splits_on_gap() {
        assert_eq!(ranges(&[5, 6, 7, 200, 201]), vec![5..=7, 200..=201]);
    }

    #[test]
    fn test_iter_ranges_empty() {
        assert!(ranges(&[]).is_empty());
    }

    #[test]
    fn test_iter_ranges_single() {
        assert_eq!(ranges(&[42]), vec![42..=42]);
    }

    #[test]
    fn test_iter_ranges_unsorted_with_duplicates() {
        assert_eq!(ranges(&[120, 10, 10, 60]), vec![10..=120]);
        assert_eq!(ranges(&[300, 10, 10, 60]), vec![10..=60, 300..=300]);
    }

    #[test]
    fn test_iter_ranges_gap_boundary() {
        assert_eq!(ranges(&[1, 51]), vec![1..=51]);
        assert_eq!(ranges(&[1, 52]), vec![1..=1, 52..=52]);
    }

    #[test]
    fn test_iter_ranges_restartable() {
        let input = vec![9, 3, 500];
        let first: Vec<_> = iter_ranges(&input, 50).collect();
        let second: Vec<_> = iter_ranges(&input, 50).collect();
        assert_eq!(first, second);
        assert_eq!(input, vec![9, 3, 500]);
    }

    #[test]
    fn test_source_line_indent() {
        let line = SourceLine::from_raw("    return x", 8);
        assert_eq!(line, SourceLine::new(4, "return x"));
        let tabbed = SourceLine::from_raw("\t  y = 1", 8);
        assert_eq!(tabbed.indent, 10);
        assert_eq!(tabbed.text, "y = 1");
    }

    #[test]
    fn test_source_line_indent_clamps() {
        let deep = format!("{}pass", "\t".repeat(40));
        let line = SourceLine::from_raw(&deep, 8);
        assert_eq!(line.indent, u8::MAX);
        assert_eq!(line.text, "pass");
    }

    #[test]
    fn test_cache_file_lines_stops_at_eof() {
        let mut lines = BTreeMap::new();
        cache_file_lines("a\n  b\nc\n", &[2, 9], 50, 8, &mut lines);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines.get(&2), Some(&SourceLine::new(2, "b")));
        assert_eq!(lines.get(&3), Some(&SourceLine::new(0, "c")));
    }

    #[test]
    fn test_encode_layout() {
        let mut cache = SourceCache::new();
        cache
            .entry("a.py".to_string())
            .or_default()
            .insert(3, SourceLine::new(4, "x = 1"));
        let blob = encode_source_lines(&cache).unwrap();
        let mut expected = vec![MARK_SOURCE_CODE, 4, 0, 0, 0];
        expected.extend_from_slice(b"a.py");
        expected.extend_from_slice(&[1, 0]);
        expected.extend_from_slice(&[3, 0, 4, 5, 0, 0, 0]);
        expected.extend_from_slice(b"x = 1");
        assert_eq!(blob, expected);
    }

    #[test]
    fn test_encode_rejects_wide_lineno() {
        let mut cache = SourceCache::new();
        cache
            .entry("big.py".to_string())
            .or_default()
            .insert(70_000, SourceLine::new(0, "x"));
        assert!(matches!(
            encode_source_lines(&cache),
            Err(ForestError::TrailerOverflow { .. })
        ));
    }
}
