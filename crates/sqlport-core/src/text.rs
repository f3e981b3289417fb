//! Text position utilities for char offset and line:column conversions.
//!
//! ## Coordinate Conventions
//!
//! - Lines are **1-indexed** (matching how analyzers and reports number them)
//! - Columns are **0-indexed** and count chars (Unicode scalar values), not bytes
//! - Char offsets are **0-indexed**
//! - `\n` terminates a line; a preceding `\r` is ordinary line content
//!
//! Everything the rewriter exchanges with its collaborators is char based, so the
//! byte-based helpers here exist only to slice `&str` safely.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Position
// ============================================================================

/// A (line, column) coordinate in some snapshot of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// 1-indexed line number.
    pub line: u32,
    /// 0-indexed char column.
    pub col: u32,
}

impl Position {
    /// Create a new position.
    pub fn new(line: u32, col: u32) -> Self {
        Position { line, col }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

// ============================================================================
// Char-based Conversions
// ============================================================================

/// Convert a char offset to a position.
///
/// If `offset` exceeds the text length, returns the position at end of text.
pub fn char_offset_to_position(text: &str, offset: usize) -> Position {
    let mut line = 1u32;
    let mut col = 0u32;

    for (i, ch) in text.chars().enumerate() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }

    Position { line, col }
}

/// The position reached after writing `s` starting at `pos`.
pub fn advance_position(pos: Position, s: &str) -> Position {
    match s.rfind('\n') {
        Some(idx) => Position::new(
            pos.line + count_newlines(s) as u32,
            s[idx + 1..].chars().count() as u32,
        ),
        None => Position::new(pos.line, pos.col + s.chars().count() as u32),
    }
}

/// Convert a position to a char offset.
///
/// Returns `None` if the line does not exist or the column lies beyond the
/// line's content (the position just past the last char of a line is valid).
pub fn position_to_char_offset(text: &str, pos: Position) -> Option<usize> {
    if pos.line == 0 {
        return None;
    }
    let mut offset = 0usize;
    for (index, line) in text.split_inclusive('\n').enumerate() {
        if index + 1 == pos.line as usize {
            let width = line_width(line);
            if pos.col as usize > width {
                return None;
            }
            return Some(offset + pos.col as usize);
        }
        offset += line.chars().count();
    }
    // A position on the (empty) line after a trailing newline, or on line 1 of
    // an empty text, is the end of the text.
    let line_count = text.split_inclusive('\n').count();
    if pos.col == 0 && pos.line as usize == line_count + 1 && (text.is_empty() || text.ends_with('\n')) {
        return Some(offset);
    }
    None
}

/// Convert a char index within `s` to a byte index.
///
/// The index equal to the char count maps to `s.len()`.
pub fn char_to_byte(s: &str, char_index: usize) -> Option<usize> {
    if char_index == 0 {
        return Some(0);
    }
    let mut count = 0usize;
    for (byte, _) in s.char_indices() {
        if count == char_index {
            return Some(byte);
        }
        count += 1;
    }
    (count == char_index).then_some(s.len())
}

// ============================================================================
// Line Index
// ============================================================================

/// Precomputed line starts for repeated offset/position lookups on one text.
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Char offset at which each line starts; `starts[0] == 0`.
    starts: Vec<usize>,
    /// Total char count of the text.
    len: usize,
}

impl LineIndex {
    /// Index the lines of `text`.
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        let mut len = 0usize;
        for ch in text.chars() {
            len += 1;
            if ch == '\n' {
                starts.push(len);
            }
        }
        LineIndex { starts, len }
    }

    /// Total char count of the indexed text.
    pub fn char_len(&self) -> usize {
        self.len
    }

    /// Number of lines, counting an empty last line after a trailing `\n`.
    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Position of a char offset, or `None` past the end of the text.
    pub fn position(&self, offset: usize) -> Option<Position> {
        if offset > self.len {
            return None;
        }
        let idx = self.starts.partition_point(|&s| s <= offset) - 1;
        Some(Position::new(idx as u32 + 1, (offset - self.starts[idx]) as u32))
    }

    /// Char offset of a position, or `None` if it lies outside its line.
    pub fn offset(&self, pos: Position) -> Option<usize> {
        let line = pos.line as usize;
        if line == 0 || line > self.starts.len() {
            return None;
        }
        let start = self.starts[line - 1];
        let end = if line < self.starts.len() {
            self.starts[line] - 1
        } else {
            self.len
        };
        let col = pos.col as usize;
        (col <= end - start).then_some(start + col)
    }
}

// ============================================================================
// Line Utilities
// ============================================================================

/// Split text into lines, each keeping its `\n` terminator.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Strip a single trailing `\n` from a line.
pub fn line_content(line: &str) -> &str {
    line.strip_suffix('\n').unwrap_or(line)
}

/// Char width of a line, excluding its `\n` terminator.
pub fn line_width(line: &str) -> usize {
    line_content(line).chars().count()
}

/// Number of `\n` chars in `s`.
pub fn count_newlines(s: &str) -> usize {
    s.bytes().filter(|&b| b == b'\n').count()
}

/// Char width of the last line of `s` (everything after the final `\n`).
pub fn last_line_width(s: &str) -> usize {
    match s.rfind('\n') {
        Some(idx) => s[idx + 1..].chars().count(),
        None => s.chars().count(),
    }
}

/// Leading spaces and tabs of `s`.
pub fn leading_whitespace(s: &str) -> &str {
    let trimmed = s.trim_start_matches([' ', '\t']);
    &s[..s.len() - trimmed.len()]
}

// ============================================================================
// Comment and Summary Helpers
// ============================================================================

/// Make `text` safe to place inside a `/* ... */` block comment.
///
/// Block comments nest in T-SQL, so both `/*` and `*/` are broken apart with a
/// space.
pub fn comment_safe(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    let mut prev: Option<char> = None;
    for ch in text.chars() {
        if matches!((prev, ch), (Some('/'), '*') | (Some('*'), '/')) {
            out.push(' ');
        }
        out.push(ch);
        prev = Some(ch);
    }
    out
}

/// Comment out every line of `text` with a `-- ` line comment.
///
/// Line structure is preserved: the result has exactly as many `\n` chars as
/// the input.
pub fn line_commented(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for line in text.split_inclusive('\n') {
        out.push_str("-- ");
        out.push_str(line);
    }
    out
}

/// Collapse all whitespace runs to single spaces and truncate to `width` chars.
///
/// Truncated text ends with `...` (included in the width).
pub fn summarize(text: &str, width: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let collapsed = comment_safe(&collapsed);
    if collapsed.chars().count() <= width {
        return collapsed;
    }
    let keep = width.saturating_sub(3);
    let mut out: String = collapsed.chars().take(keep).collect();
    out.push_str("...");
    out
}

// ============================================================================
// Tests
// ============================================================================
