//! Indented text building for generated source units.

use brio_core::line_map::LineMap;
use brio_core::location::SourceLocation;

const INDENT: &str = "    ";

/// Accumulates the text of one generated source unit.
///
/// Tracks the current generated line and records a [`LineMap`] entry each
/// time generation moves to a new script statement, so diagnostics against
/// the generated source can be mapped back.
#[derive(Debug)]
pub struct UnitWriter {
    out: String,
    depth: usize,
    line: u32,
    at_line_start: bool,
    line_map: LineMap,
}

impl UnitWriter {
    pub fn new() -> Self {
        Self {
            out: String::new(),
            depth: 0,
            line: 1,
            at_line_start: true,
            line_map: LineMap::new(),
        }
    }

    /// Note the script position generation is currently at. The next line
    /// written is attributed to it.
    pub fn set_location(&mut self, location: &SourceLocation) {
        self.line_map.record(self.line, location.clone());
    }

    pub fn print(&mut self, text: &str) {
        if self.at_line_start && !text.is_empty() {
            for _ in 0..self.depth {
                self.out.push_str(INDENT);
            }
            self.at_line_start = false;
        }
        self.out.push_str(text);
    }

    pub fn println(&mut self, text: &str) {
        self.print(text);
        self.newline();
    }

    /// End the current line without writing anything else.
    pub fn newline(&mut self) {
        self.out.push('\n');
        self.line += 1;
        self.at_line_start = true;
    }

    /// A blank separator line.
    pub fn blank(&mut self) {
        if !self.at_line_start {
            self.newline();
        }
        self.newline();
    }

    pub fn push_depth(&mut self) {
        self.depth += 1;
    }

    pub fn pop_depth(&mut self) {
        debug_assert!(self.depth > 0, "unbalanced pop_depth");
        self.depth = self.depth.saturating_sub(1);
    }

    /// Current 1-based generated line.
    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn finish(self) -> (String, LineMap) {
        (self.out, self.line_map)
    }
}

impl Default for UnitWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape a script string for embedding in a generated string literal.
pub fn escape_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indentation() {
        let mut w = UnitWriter::new();
        w.println("fn main() {");
        w.push_depth();
        w.println("body();");
        w.pop_depth();
        w.println("}");
        let (text, _) = w.finish();
        assert_eq!(text, "fn main() {\n    body();\n}\n");
    }

    #[test]
    fn test_line_map_records() {
        let mut w = UnitWriter::new();
        w.println("header");
        w.set_location(&SourceLocation::new("a.brio", 3));
        w.println("stmt one;");
        w.println("stmt one continued;");
        w.set_location(&SourceLocation::new("a.brio", 4));
        w.println("stmt two;");
        let (_, map) = w.finish();
        assert_eq!(map.lookup(1), None);
        assert_eq!(map.lookup(2).unwrap().line, 3);
        assert_eq!(map.lookup(3).unwrap().line, 3);
        assert_eq!(map.lookup(4).unwrap().line, 4);
    }

    #[test]
    fn test_escape_str() {
        assert_eq!(escape_str("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
        assert_eq!(escape_str("\u{1}"), "\\u{1}");
    }
}
