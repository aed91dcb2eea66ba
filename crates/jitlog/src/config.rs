//! Forest configuration

use crate::source::DEFAULT_LINE_GAP;
use serde::{Deserialize, Serialize};

/// Settings that shape derived data of a forest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Largest distance between referenced lines that are read as one span
    pub line_gap: u32,
    /// Columns a tab counts for when measuring indentation
    pub tab_width: u8,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            line_gap: DEFAULT_LINE_GAP,
            tab_width: 8,
        }
    }
}

impl ForestConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the line gap
    #[must_use]
    pub const fn with_line_gap(mut self, gap: u32) -> Self {
        self.line_gap = gap;
        self
    }

    /// Set the tab width
    #[must_use]
    pub const fn with_tab_width(mut self, width: u8) -> Self {
        self.tab_width = width;
        self
    }
}
