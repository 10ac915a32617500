//! Generated-line to script-line correspondence.
//!
//! The unit writer records an entry every time generation crosses into a new
//! script statement. When the external compiler reports a diagnostic against
//! the generated source, the driver maps it back through this table to a
//! position the script author can act on.

use crate::location::SourceLocation;
use serde::{Deserialize, Serialize};

/// One correspondence record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    /// 1-based line in the generated source.
    pub generated_line: u32,
    /// Script position generation was at when this line started.
    pub source: SourceLocation,
}

/// Maps generated-source lines back to script positions.
///
/// Entries are appended in generated-line order during generation; lookup is
/// "latest entry at or before the queried line", so one entry covers every
/// generated line until the next statement begins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineMap {
    entries: Vec<LineEntry>,
}

impl LineMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that generated output at `generated_line` corresponds to
    /// `source`. Must be called with non-decreasing generated lines.
    pub fn record(&mut self, generated_line: u32, source: SourceLocation) {
        debug_assert!(
            self.entries
                .last()
                .map(|e| e.generated_line <= generated_line)
                .unwrap_or(true),
            "line map entries must be recorded in generated-line order"
        );
        // Same generated line recorded twice keeps the latest statement.
        if let Some(last) = self.entries.last_mut() {
            if last.generated_line == generated_line {
                last.source = source;
                return;
            }
        }
        self.entries.push(LineEntry {
            generated_line,
            source,
        });
    }

    /// Map a generated-source line to the script position it came from.
    pub fn lookup(&self, generated_line: u32) -> Option<&SourceLocation> {
        let idx = self
            .entries
            .partition_point(|e| e.generated_line <= generated_line);
        if idx == 0 {
            None
        } else {
            Some(&self.entries[idx - 1].source)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LineEntry] {
        &self.entries
    }
}
