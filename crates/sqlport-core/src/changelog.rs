//! Change log of applied rewrites, appended to the rewritten file as a comment.

use serde::{Deserialize, Serialize};

use crate::ledger::OffsetLedger;
use crate::text::Position;

/// Header line of the appended comment block.
pub const LOG_HEADER: &str = "sqlport rewrite log";

/// One applied directive, with its lines in the final file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteLogEntry {
    pub first_line: u32,
    /// Application order, starting at 1.
    pub seq: u32,
    pub last_line: u32,
    pub summary: String,
    pub kind: String,
    /// Id of the directive that produced the entry.
    pub directive: u32,
}

/// Where a replacement landed in the snapshot its iteration wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub seq: u32,
    pub directive: u32,
    pub kind: String,
    pub summary: String,
    /// Iteration that applied the directive.
    pub iteration: usize,
    /// First char of the replacement in that iteration's output.
    pub first: Position,
    /// Last char of the replacement in that iteration's output.
    pub last: Position,
}

impl ChangeRecord {
    /// Carry the record's positions through every later iteration.
    ///
    /// A record inside a later block rewrite follows the ledger, which leaves it
    /// on its line inside the block's commented-out original.
    pub fn finalize(&self, ledger: &OffsetLedger) -> RewriteLogEntry {
        let later = self.iteration + 1;
        RewriteLogEntry {
            first_line: ledger.remap_from(later, self.first).line,
            seq: self.seq,
            last_line: ledger.remap_from(later, self.last).line,
            summary: self.summary.clone(),
            kind: self.kind.clone(),
            directive: self.directive,
        }
    }
}

/// Render entries as a block comment, one line per entry.
pub fn render_block(entries: &[RewriteLogEntry]) -> String {
    let mut out = String::from("/*\n");
    out.push_str(&format!(" * {}: {} rewrite(s)\n", LOG_HEADER, entries.len()));
    for entry in entries {
        out.push_str(&format!(
            " * #{} lines {}-{} [{}] {}\n",
            entry.seq, entry.first_line, entry.last_line, entry.kind, entry.summary
        ));
    }
    out.push_str(" */\n");
    out
}

/// Append the log block after the last line of `text`.
pub fn append(text: &mut String, entries: &[RewriteLogEntry]) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&render_block(entries));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::DeltaColumn;

    fn entry(seq: u32, first: u32, last: u32) -> RewriteLogEntry {
        RewriteLogEntry {
            first_line: first,
            seq,
            last_line: last,
            summary: format!("summary {}", seq),
            kind: "expr-wrap".to_string(),
            directive: seq + 10,
        }
    }

    #[test]
    fn block_has_one_line_per_entry() {
        let block = render_block(&[entry(1, 3, 3), entry(2, 5, 9)]);
        assert_eq!(
            block,
            "/*\n * sqlport rewrite log: 2 rewrite(s)\n * #1 lines 3-3 [expr-wrap] summary 1\n * #2 lines 5-9 [expr-wrap] summary 2\n */\n"
        );
    }

    #[test]
    fn append_starts_on_a_fresh_line() {
        let mut text = String::from("SELECT 1");
        append(&mut text, &[entry(1, 1, 1)]);
        assert!(text.starts_with("SELECT 1\n/*\n"));
    }

    #[test]
    fn records_follow_later_iterations() {
        let mut ledger = OffsetLedger::new();
        ledger.finish_iteration();
        // Iteration 1 inserts three lines after line 2.
        ledger.record(2, DeltaColumn::WholeLines, 3);
        ledger.finish_iteration();
        let record = ChangeRecord {
            seq: 1,
            directive: 4,
            kind: "literal-replace".to_string(),
            summary: "x".to_string(),
            iteration: 0,
            first: Position::new(4, 2),
            last: Position::new(5, 0),
        };
        let entry = record.finalize(&ledger);
        assert_eq!((entry.first_line, entry.last_line), (7, 8));

        // A record of the last iteration is already final.
        let last = ChangeRecord {
            iteration: 1,
            ..record
        };
        assert_eq!(last.finalize(&ledger).first_line, 4);
    }
}
