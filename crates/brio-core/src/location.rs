//! Source positions attached to parsed nodes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a node in the original script source.
///
/// The parser attaches one of these to every statement; the code generator
/// threads them into the [`LineMap`](crate::line_map::LineMap) so external
/// compiler diagnostics can be mapped back to the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Script file the node came from.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Placeholder for synthesized nodes that have no script position.
    pub fn unknown() -> Self {
        Self {
            file: "<unknown>".to_string(),
            line: 0,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}
