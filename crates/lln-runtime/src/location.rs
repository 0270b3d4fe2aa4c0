//! Source locations reported by the engine.

use std::fmt;

/// Owned copy of an engine location.
///
/// The engine's location points into its line buffer, which is only valid
/// while the record is current, so the text of the current and previous
/// line is copied here for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub file: String,
    pub row: usize,
    pub col: usize,
    pub line: Option<String>,
    pub prev_line: Option<String>,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, row: usize, col: usize) -> Self {
        Self {
            file: file.into(),
            row,
            col,
            line: None,
            prev_line: None,
        }
    }

    pub fn with_lines(mut self, line: Option<String>, prev_line: Option<String>) -> Self {
        self.line = line;
        self.prev_line = prev_line;
        self
    }

    /// Render `message` with a source excerpt and a caret under the column:
    ///
    /// ```text
    /// hello.lln:3:1: Command '!nope' doesn't exist.
    ///    1 | ...
    ///    2 | !printf("b", 2)
    ///    3 | !nope("c")
    ///        ^
    /// ```
    pub fn render_context(&self, message: &str) -> String {
        let mut out = format!("{}: {}\n", self, message);
        if let Some(prev) = &self.prev_line {
            if self.row > 2 {
                out.push_str(&format!("{:>4} | ...\n", (self.row - 2) % 10000));
            }
            out.push_str(&format!("{:>4} | {}\n", self.row.saturating_sub(1) % 10000, prev));
        }
        if let Some(line) = &self.line {
            out.push_str(&format!("{:>4} | {}\n", self.row % 10000, line));
            // "NNNN | " is seven columns wide.
            let pad = self.col.saturating_sub(1) + 7;
            out.push_str(&" ".repeat(pad));
            out.push_str("^\n");
        }
        out
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.row, self.col)
    }
}
