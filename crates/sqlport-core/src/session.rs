//! Rewrite Driver: applies one file's directives iteration by iteration.
//!
//! A [`RewriteSession`] owns everything a file's rewrite needs (its directives,
//! subranges, ledger and line map) so files never share mutable state.
//!
//! ## States
//!
//! ```text
//! Idle -> CopyingSnapshot -> Scanning <-> Applying -> (next iteration | Finalizing) -> Done
//!                                  \________________________________/
//!                                            Aborted
//! ```
//!
//! Each iteration streams the previous snapshot line by line into a new one,
//! stopping at each scheduled directive's remapped start to extract the matched
//! text and write its replacement.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::changelog::{self, ChangeRecord, RewriteLogEntry};
use crate::directive::RewriteDirective;
use crate::error::{RewriteError, RewriteResult};
use crate::ledger::{DeltaColumn, FileLineMap, OffsetLedger};
use crate::recipes::{self, Embedded, RecipeInput};
use crate::schedule;
use crate::subrange::{BlockText, SubrangeTable};
use crate::text::{
    advance_position, count_newlines, last_line_width, leading_whitespace, summarize, LineIndex,
    Position,
};

/// Driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    CopyingSnapshot,
    Scanning,
    Applying,
    Finalizing,
    Done,
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::CopyingSnapshot => "copying_snapshot",
            SessionState::Scanning => "scanning",
            SessionState::Applying => "applying",
            SessionState::Finalizing => "finalizing",
            SessionState::Done => "done",
            SessionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Knobs of one rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Maximum width of change-log summaries.
    pub summary_width: usize,
    /// Append the change-log comment block to the rewritten text.
    pub append_change_log: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            summary_width: 60,
            append_change_log: true,
        }
    }
}

/// Result of a finished rewrite.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    /// The rewritten text, change log included.
    pub text: String,
    pub entries: Vec<RewriteLogEntry>,
    pub line_map: FileLineMap,
    /// Directive ids per iteration.
    pub iterations: Vec<Vec<u32>>,
    /// SHA-256 (hex) of the original text.
    pub source_sha256: String,
}

impl RewriteOutcome {
    /// Number of applied directives.
    pub fn applied(&self) -> usize {
        self.entries.len()
    }

    /// Final-file line of an original line.
    pub fn final_line(&self, original_line: u32) -> u32 {
        self.line_map.final_line(original_line)
    }
}

/// Hex SHA-256 of some bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ============================================================================
// Snapshot Streaming
// ============================================================================

/// Read cursor over the snapshot an iteration consumes.
struct Scanner<'a> {
    text: &'a str,
    byte: usize,
    line_start: usize,
    pos: Position,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Scanner {
            text,
            byte: 0,
            line_start: 0,
            pos: Position::new(1, 0),
        }
    }

    /// Copy everything before `target` to `out`.
    fn copy_until(&mut self, target: Position, out: &mut SnapshotWriter) -> Result<(), String> {
        if target < self.pos {
            return Err(format!(
                "start {} lies before the scan position {}",
                target, self.pos
            ));
        }
        while self.pos.line < target.line {
            let rest = &self.text[self.byte..];
            let Some(newline) = rest.find('\n') else {
                return Err(format!(
                    "line {} is past the end of the snapshot ({} lines)",
                    target.line, self.pos.line
                ));
            };
            out.push_str(&rest[..=newline]);
            self.byte += newline + 1;
            self.line_start = self.byte;
            self.pos = Position::new(self.pos.line + 1, 0);
        }
        let want = (target.col - self.pos.col) as usize;
        let rest = &self.text[self.byte..];
        let mut taken = 0usize;
        let mut end = 0usize;
        for (i, ch) in rest.char_indices() {
            if taken == want {
                break;
            }
            if ch == '\n' {
                break;
            }
            taken += 1;
            end = i + ch.len_utf8();
        }
        if taken < want {
            return Err(format!(
                "column {} is beyond the width {} of line {}",
                target.col,
                self.pos.col as usize + taken,
                target.line
            ));
        }
        out.push_str(&rest[..end]);
        self.byte += end;
        self.pos = target;
        Ok(())
    }

    /// Consume the next `chars` chars, or `None` if the snapshot ends first.
    fn take(&mut self, chars: usize) -> Option<&'a str> {
        let rest = &self.text[self.byte..];
        let end = if chars == 0 {
            0
        } else {
            let (i, ch) = rest.char_indices().nth(chars - 1)?;
            i + ch.len_utf8()
        };
        let taken = &rest[..end];
        self.byte += end;
        if let Some(newline) = taken.rfind('\n') {
            self.line_start = self.byte - (taken.len() - newline - 1);
        }
        self.pos = advance_position(self.pos, taken);
        Some(taken)
    }

    /// Text of the current line before the cursor.
    fn line_prefix(&self) -> &'a str {
        &self.text[self.line_start..self.byte]
    }

    fn rest(&self) -> &'a str {
        &self.text[self.byte..]
    }
}

/// The snapshot an iteration produces, with its write position.
struct SnapshotWriter {
    buf: String,
    pos: Position,
}

impl SnapshotWriter {
    fn with_capacity(capacity: usize) -> Self {
        SnapshotWriter {
            buf: String::with_capacity(capacity),
            pos: Position::new(1, 0),
        }
    }

    fn push_str(&mut self, s: &str) {
        self.buf.push_str(s);
        self.pos = advance_position(self.pos, s);
    }

    fn position(&self) -> Position {
        self.pos
    }

    fn into_string(self) -> String {
        self.buf
    }
}

// ============================================================================
// Session
// ============================================================================

/// One file's rewrite run.
#[derive(Debug)]
pub struct RewriteSession {
    name: String,
    source: Option<PathBuf>,
    original: String,
    source_sha256: String,
    original_index: LineIndex,
    directives: Vec<RewriteDirective>,
    subranges: SubrangeTable,
    options: SessionOptions,
    state: SessionState,
    ledger: OffsetLedger,
    line_map: FileLineMap,
    records: Vec<ChangeRecord>,
}

impl RewriteSession {
    /// Create a session over in-memory text.
    pub fn new(
        name: impl Into<String>,
        original: impl Into<String>,
        directives: Vec<RewriteDirective>,
        subranges: SubrangeTable,
        options: SessionOptions,
    ) -> Self {
        let original = original.into();
        RewriteSession {
            name: name.into(),
            source: None,
            source_sha256: sha256_hex(original.as_bytes()),
            original_index: LineIndex::new(&original),
            original,
            directives,
            subranges,
            options,
            state: SessionState::Idle,
            ledger: OffsetLedger::new(),
            line_map: FileLineMap::new(),
            records: Vec::new(),
        }
    }

    /// Create a session over a file; the file must be unchanged at finalization.
    pub fn open(
        path: &Path,
        directives: Vec<RewriteDirective>,
        subranges: SubrangeTable,
        options: SessionOptions,
    ) -> RewriteResult<Self> {
        let original = fs::read_to_string(path).map_err(|e| RewriteError::io(path, e))?;
        let mut session = RewriteSession::new(
            path.display().to_string(),
            original,
            directives,
            subranges,
            options,
        );
        session.source = Some(path.to_path_buf());
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn ledger(&self) -> &OffsetLedger {
        &self.ledger
    }

    pub fn line_map(&self) -> &FileLineMap {
        &self.line_map
    }

    /// Apply every directive and finalize.
    ///
    /// On failure the session ends in [`SessionState::Aborted`] and nothing is
    /// returned.
    pub fn run(&mut self) -> RewriteResult<RewriteOutcome> {
        if self.state != SessionState::Idle {
            return Err(RewriteError::bookkeeping(
                0,
                format!("session already ran (state {})", self.state),
            ));
        }
        info!(file = %self.name, directives = self.directives.len(), "rewriting");
        match self.drive() {
            Ok(outcome) => {
                self.state = SessionState::Done;
                info!(
                    file = %self.name,
                    applied = outcome.applied(),
                    iterations = outcome.iterations.len(),
                    "rewrite finished"
                );
                Ok(outcome)
            }
            Err(err) => {
                let state = self.state;
                self.state = SessionState::Aborted;
                match &err {
                    RewriteError::OverlapConflict { first, second } => warn!(
                        file = %self.name,
                        first = %first,
                        second = %second,
                        "rewrite aborted: overlapping directives"
                    ),
                    other => warn!(file = %self.name, state = %state, error = %other, "rewrite aborted"),
                }
                Err(err)
            }
        }
    }

    fn drive(&mut self) -> RewriteResult<RewriteOutcome> {
        self.validate()?;
        let schedule = schedule::plan(&self.directives)?;

        let mut snapshot = self.original.clone();
        for (i, iteration) in schedule.iterations().iter().enumerate() {
            self.state = SessionState::CopyingSnapshot;
            debug!(file = %self.name, iteration = i, directives = iteration.len(), "iteration");
            snapshot = self.run_iteration(i, &snapshot, iteration)?;
            self.ledger.finish_iteration();
        }

        self.state = SessionState::Finalizing;
        let iterations = schedule.ids(&self.directives);
        self.finalize(snapshot, iterations)
    }

    fn validate(&self) -> RewriteResult<()> {
        let mut seen = HashSet::new();
        for directive in &self.directives {
            if !seen.insert(directive.id) {
                return Err(RewriteError::invalid_directive(directive.id, "duplicate directive id"));
            }
            directive.validate(&self.original_index)?;
            self.subranges.validate_for(directive)?;
        }
        Ok(())
    }

    fn run_iteration(
        &mut self,
        iteration: usize,
        snapshot: &str,
        indices: &[usize],
    ) -> RewriteResult<String> {
        let index = LineIndex::new(snapshot);
        let mut scanner = Scanner::new(snapshot);
        let mut writer = SnapshotWriter::with_capacity(snapshot.len() + snapshot.len() / 4);

        for &i in indices {
            self.state = SessionState::Scanning;
            let directive = self.directives[i].clone();
            let id = directive.id;

            let start = self.ledger.remap_position(directive.start);
            let end = self.ledger.remap_position(directive.end);
            let extra = self.ledger.remap_length(directive.start, directive.end) as usize;
            let length = directive.span.len() + extra;

            scanner
                .copy_until(start, &mut writer)
                .map_err(|reason| RewriteError::bookkeeping(id, reason))?;

            self.state = SessionState::Applying;
            let indent = leading_whitespace(scanner.line_prefix());
            let matched = scanner.take(length).ok_or_else(|| {
                RewriteError::bookkeeping(
                    id,
                    format!("match of {} chars at {} runs past the end of the snapshot", length, start),
                )
            })?;
            if scanner.pos != end {
                return Err(RewriteError::bookkeeping(
                    id,
                    format!(
                        "match of {} chars from {} ends at {}, ledger expects {}",
                        length, start, scanner.pos, end
                    ),
                ));
            }

            let block = match directive.block_id() {
                Some(_) => Some(self.resolve_block(&directive, matched, &index, start)?),
                None => None,
            };
            let input = RecipeInput {
                directive: &directive,
                matched,
                indent,
                block,
            };
            let replacement = recipes::apply(&input).map_err(|e| {
                RewriteError::bookkeeping(id, format!("{} recipe failed: {}", directive.kind, e))
            })?;

            let mut text = replacement.text;
            let matched_chars = matched.chars().count();
            let matched_lines = count_newlines(matched);
            if text.chars().count() < matched_chars || count_newlines(&text) < matched_lines {
                return Err(RewriteError::bookkeeping(
                    id,
                    format!(
                        "replacement shrinks the match ({} chars, {} lines -> {} chars, {} lines)",
                        matched_chars,
                        matched_lines,
                        text.chars().count(),
                        count_newlines(&text)
                    ),
                ));
            }

            // Text after a multi-line replacement must not move left.
            let inserted_lines = count_newlines(&text) - matched_lines;
            if count_newlines(&text) > 0 {
                let tail_col = end.col + self.ledger.current().shift_at(end.line, end.col);
                let width = last_line_width(&text) as u32;
                if width < tail_col {
                    text.push_str(&" ".repeat((tail_col - width) as usize));
                }
            }

            let out_start = writer.position();
            writer.push_str(&text);
            let out_end = writer.position();
            if let Some(embedded) = replacement.embedded {
                self.relocate_nested(iteration, &index, start, end, out_start, &text, embedded);
            }
            self.record_deltas(id, start, end, out_end, text.chars().count() - matched_chars)?;
            self.line_map.record(directive.end.line, inserted_lines as u32);

            let mut last_char = text.chars();
            last_char.next_back();
            let seq = self.records.len() as u32 + 1;
            self.records.push(ChangeRecord {
                seq,
                directive: id,
                kind: directive.kind.name(),
                summary: summarize(&replacement.plain, self.options.summary_width),
                iteration,
                first: out_start,
                last: advance_position(out_start, last_char.as_str()),
            });
            debug!(
                file = %self.name,
                directive = id,
                kind = %directive.kind,
                start = %start,
                growth = text.chars().count() - matched_chars,
                lines = inserted_lines,
                "applied directive"
            );
        }

        self.state = SessionState::Scanning;
        writer.push_str(scanner.rest());
        Ok(writer.into_string())
    }

    /// Record how the text after a replacement moved.
    ///
    /// `start`/`end` are the match bounds in this iteration's input and
    /// `out_end` is where the text after the match now begins.
    fn record_deltas(
        &mut self,
        id: u32,
        start: Position,
        end: Position,
        out_end: Position,
        growth: usize,
    ) -> RewriteResult<()> {
        let current = self.ledger.current();
        let shift = i64::from(out_end.col) - i64::from(end.col + current.shift_at(end.line, end.col));
        let carry = i64::from(out_end.line)
            - i64::from(end.line + current.lines_inserted_before(end.line) + current.carry_at(end.line, end.col));
        let whole = i64::from(out_end.line + 1)
            - i64::from(end.line + 1 + current.lines_inserted_before(end.line + 1));

        let (Ok(shift), Ok(carry), Ok(whole)) =
            (u32::try_from(shift), u32::try_from(carry), u32::try_from(whole))
        else {
            return Err(RewriteError::bookkeeping(
                id,
                format!(
                    "negative delta at {} (shift {}, carry {}, lines {})",
                    end, shift, carry, whole
                ),
            ));
        };

        self.ledger.record(start.line, DeltaColumn::Grown(start.col), growth as u32);
        self.ledger.record(end.line, DeltaColumn::Shifted(end.col), shift);
        self.ledger.record(end.line, DeltaColumn::Carried(end.col), carry);
        self.ledger.record(end.line, DeltaColumn::WholeLines, whole);
        Ok(())
    }

    /// Move the records of earlier rewrites inside `[start, end)` to where the
    /// replacement reproduces them.
    ///
    /// Records outside the embedded copy keep following the ledger.
    #[allow(clippy::too_many_arguments)]
    fn relocate_nested(
        &mut self,
        iteration: usize,
        index: &LineIndex,
        start: Position,
        end: Position,
        out_start: Position,
        text: &str,
        embedded: Embedded,
    ) {
        let Some(match_offset) = index.offset(start) else {
            return;
        };
        let locate = |pos: Position| -> Option<Position> {
            if pos < start || pos >= end {
                return None;
            }
            let rel = index.offset(pos)?.checked_sub(match_offset)?;
            let at = embedded.locate(rel)?;
            let byte = text.char_indices().nth(at).map_or(text.len(), |(i, _)| i);
            Some(advance_position(out_start, &text[..byte]))
        };

        let ledger = &self.ledger;
        for record in self.records.iter_mut().filter(|r| r.iteration < iteration) {
            let later = record.iteration + 1;
            let first = locate(ledger.remap_from(later, record.first));
            let last = locate(ledger.remap_from(later, record.last));
            if let (Some(first), Some(last)) = (first, last) {
                record.first = first;
                record.last = last;
                record.iteration = iteration;
            }
        }
    }

    /// Map a block directive's subranges into its matched text.
    fn resolve_block<'m>(
        &self,
        directive: &RewriteDirective,
        matched: &'m str,
        index: &LineIndex,
        start: Position,
    ) -> RewriteResult<BlockText<'m>> {
        let Some(subranges) = directive.block_id().and_then(|b| self.subranges.get(b)) else {
            return Err(RewriteError::invalid_directive(directive.id, "block has no subranges"));
        };
        let match_offset = index.offset(start).ok_or_else(|| {
            RewriteError::bookkeeping(directive.id, format!("start {} is not in the snapshot", start))
        })?;
        subranges.resolve(directive.id, matched, |offset| {
            let original = self.original_index.position(offset)?;
            let current = self.ledger.remap_position(original);
            index.offset(current)?.checked_sub(match_offset)
        })
    }

    fn finalize(&mut self, snapshot: String, iterations: Vec<Vec<u32>>) -> RewriteResult<RewriteOutcome> {
        let entries: Vec<RewriteLogEntry> = self
            .records
            .iter()
            .map(|record| record.finalize(&self.ledger))
            .collect();

        let mut text = snapshot;
        if self.options.append_change_log && !entries.is_empty() {
            changelog::append(&mut text, &entries);
        }

        self.verify_source()?;

        Ok(RewriteOutcome {
            text,
            entries,
            line_map: self.line_map.clone(),
            iterations,
            source_sha256: self.source_sha256.clone(),
        })
    }

    /// The source file must still hold the text the session started from.
    fn verify_source(&self) -> RewriteResult<()> {
        let Some(path) = &self.source else {
            return Ok(());
        };
        let bytes = fs::read(path).map_err(|e| RewriteError::io(path, e))?;
        if sha256_hex(&bytes) != self.source_sha256 {
            return Err(RewriteError::io(
                path,
                io::Error::other("source file changed while it was being rewritten"),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::test_support::{directive_at, directive_for};
    use crate::directive::{BlockId, BlockRecipe, Payload, RewriteKind, Span};
    use crate::subrange::Subranges;

    fn template(text: &str) -> Payload {
        Payload::Template(text.to_string())
    }

    fn run(text: &str, directives: Vec<RewriteDirective>) -> RewriteResult<RewriteOutcome> {
        run_with(text, directives, SubrangeTable::new())
    }

    fn run_with(
        text: &str,
        directives: Vec<RewriteDirective>,
        subranges: SubrangeTable,
    ) -> RewriteResult<RewriteOutcome> {
        let options = SessionOptions {
            append_change_log: false,
            ..SessionOptions::default()
        };
        RewriteSession::new("test.sql", text, directives, subranges, options).run()
    }

    mod scanner_tests {
        use super::*;

        #[test]
        fn copy_until_streams_lines_and_columns() {
            let mut scanner = Scanner::new("ab\ncdé\nf");
            let mut out = SnapshotWriter::with_capacity(16);
            scanner.copy_until(Position::new(2, 2), &mut out).unwrap();
            assert_eq!(out.buf, "ab\ncd");
            assert_eq!(scanner.line_prefix(), "cd");
            assert_eq!(scanner.take(3), Some("é\nf"));
            assert_eq!(scanner.pos, Position::new(3, 1));
            assert_eq!(scanner.line_prefix(), "f");
        }

        #[test]
        fn copy_until_rejects_columns_past_line_end() {
            let mut scanner = Scanner::new("ab\ncd");
            let mut out = SnapshotWriter::with_capacity(8);
            let err = scanner.copy_until(Position::new(1, 5), &mut out).unwrap_err();
            assert!(err.contains("beyond the width 2 of line 1"), "{}", err);
        }

        #[test]
        fn take_past_end_fails() {
            let mut scanner = Scanner::new("abc");
            assert_eq!(scanner.take(4), None);
            assert_eq!(scanner.take(3), Some("abc"));
        }
    }

    mod driver_tests {
        use super::*;

        #[test]
        fn zero_directives_reproduce_input_exactly() {
            let text = "SELECT 1;\r\n  GO\n\n-- trailing";
            let session_options = SessionOptions::default();
            let outcome = RewriteSession::new("a.sql", text, vec![], SubrangeTable::new(), session_options)
                .run()
                .unwrap();
            assert_eq!(outcome.text, text);
            assert!(outcome.iterations.is_empty());
        }

        #[test]
        fn single_line_growth_keeps_next_line_in_place() {
            let text = "X\nY\n";
            let directives = vec![
                directive_at(text, 1, 0, 1, RewriteKind::LiteralReplace, template("XX")),
                directive_at(text, 2, 2, 3, RewriteKind::LiteralReplace, template("YY")),
            ];
            let outcome = run(text, directives).unwrap();
            assert_eq!(outcome.text, "XX/*ORIGINAL: X*/\nYY/*ORIGINAL: Y*/\n");
            assert_eq!(outcome.final_line(2), 2);
        }

        #[test]
        fn nested_record_follows_its_copy_into_a_multi_line_wrap() {
            let text = "SELECT f(a) FROM t\n";
            let directives = vec![
                directive_for(text, 1, "f(a)", RewriteKind::ExprWrap, template("\nCOALESCE({}, 0)")),
                directive_for(text, 2, "a", RewriteKind::LiteralReplace, template("b")),
            ];
            let outcome = run(text, directives).unwrap();
            let lines: Vec<&str> = outcome.text.lines().collect();
            assert_eq!(lines[0], "SELECT /*REWRITTEN*/");
            assert!(lines[1].starts_with("COALESCE(f(b/*ORIGINAL: a*/), 0)"));
            assert!(lines[1].ends_with(" FROM t"));

            let entry = |id: u32| outcome.entries.iter().find(|e| e.directive == id).unwrap();
            assert_eq!((entry(2).first_line, entry(2).last_line), (2, 2));
            assert_eq!((entry(1).first_line, entry(1).last_line), (1, 2));
        }

        #[test]
        fn tail_after_multi_line_replacement_is_preserved() {
            let text = "SELECT a, b FROM t\nWHERE c = 1\n";
            let directives = vec![
                directive_for(text, 1, "a", RewriteKind::CommentAndAppend, template("/*x*/ {}")),
                directive_for(text, 2, "c", RewriteKind::LiteralReplace, template("cc")),
            ];
            let outcome = run(text, directives).unwrap();
            assert_eq!(
                outcome.text,
                "SELECT /*a*/\n/*x*/ a , b FROM t\nWHERE cc/*ORIGINAL: c*/ = 1\n"
            );
            assert_eq!(outcome.final_line(2), 3);
            assert_eq!(outcome.line_map.inserted_after(1), 1);
        }

        #[test]
        fn nested_directive_is_visible_to_its_container() {
            let text = "SELECT CHECKSUM(UCASE_X) FROM t";
            let directives = vec![
                directive_for(text, 1, "CHECKSUM(UCASE_X)", RewriteKind::ExprWrap, template("BINARY_CHECKSUM({})")),
                directive_for(text, 2, "UCASE_X", RewriteKind::LiteralReplace, template("UPPER(x)")),
            ];
            let outcome = run(text, directives).unwrap();
            assert_eq!(outcome.iterations, vec![vec![2], vec![1]]);
            assert!(outcome
                .text
                .starts_with("SELECT /*REWRITTEN*/BINARY_CHECKSUM(CHECKSUM(UPPER(x)/*ORIGINAL: UCASE_X*/))"));
            assert!(outcome.text.ends_with(" FROM t"));
        }

        #[test]
        fn block_subranges_follow_nested_rewrites() {
            let text = "  ALTER TABLE t ADD a INT, b AS CHECKSUM(x);\nGO\n";
            let stmt = "ALTER TABLE t ADD a INT, b AS CHECKSUM(x);";
            let outer = directive_for(
                text,
                1,
                stmt,
                RewriteKind::BlockReplace(BlockRecipe::SplitMultiActionAlter),
                Payload::Block(BlockId(5)),
            );
            let inner = directive_for(text, 2, "CHECKSUM(x)", RewriteKind::ExprWrap, template("BINARY_CHECKSUM({})"));
            let mut table = SubrangeTable::new();
            table.insert(
                BlockId(5),
                Subranges::default()
                    .with("action[0]", Span::new(20, 25))
                    .with("action[1]", Span::new(27, 43)),
            );
            let outcome = run_with(text, vec![outer, inner], table).unwrap();
            let lines: Vec<&str> = outcome.text.lines().collect();
            assert!(lines[0].starts_with("  -- ALTER TABLE t ADD a INT, b AS /*REWRITTEN*/"));
            assert_eq!(lines[1], "  ALTER TABLE t ADD a INT;");
            assert!(lines[2].starts_with("  ALTER TABLE t ADD b AS /*REWRITTEN*/BINARY_CHECKSUM(CHECKSUM(x))"));
            assert_eq!(lines[3], "GO");
        }

        #[test]
        fn recipe_failure_aborts_with_bookkeeping_error() {
            let text = "SELECT f FROM t";
            let directives = vec![directive_for(
                text,
                3,
                "f",
                RewriteKind::ExprWrapStripCall,
                template("g({})"),
            )];
            let mut session = RewriteSession::new(
                "a.sql",
                text,
                directives,
                SubrangeTable::new(),
                SessionOptions::default(),
            );
            let err = session.run().unwrap_err();
            assert!(matches!(err, RewriteError::BookkeepingInconsistency { directive: 3, .. }));
            assert_eq!(session.state(), SessionState::Aborted);
        }

        #[test]
        fn partial_overlap_aborts_before_rewriting() {
            let text = "abcdefghij";
            let directives = vec![
                directive_at(text, 1, 0, 5, RewriteKind::LiteralReplace, template("x")),
                directive_at(text, 2, 3, 8, RewriteKind::LiteralReplace, template("y")),
            ];
            assert!(matches!(run(text, directives), Err(RewriteError::OverlapConflict { .. })));
        }

        #[test]
        fn duplicate_ids_are_invalid() {
            let text = "abcdefghij";
            let directives = vec![
                directive_at(text, 1, 0, 2, RewriteKind::LiteralReplace, template("x")),
                directive_at(text, 1, 4, 6, RewriteKind::LiteralReplace, template("y")),
            ];
            assert!(matches!(
                run(text, directives),
                Err(RewriteError::InvalidDirective { directive: 1, .. })
            ));
        }

        #[test]
        fn session_runs_only_once() {
            let mut session =
                RewriteSession::new("a.sql", "x", vec![], SubrangeTable::new(), SessionOptions::default());
            session.run().unwrap();
            assert_eq!(session.state(), SessionState::Done);
            assert!(session.run().is_err());
        }
    }

    mod file_tests {
        use super::*;

        #[test]
        fn changed_source_fails_verification() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("a.sql");
            fs::write(&path, "SELECT 1\n").unwrap();
            let mut session =
                RewriteSession::open(&path, vec![], SubrangeTable::new(), SessionOptions::default()).unwrap();
            fs::write(&path, "SELECT 2\n").unwrap();
            assert!(matches!(session.run(), Err(RewriteError::Io { .. })));
        }
    }
}
