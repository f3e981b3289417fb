//! Offset Ledger: where and by how much each iteration moved the text.
//!
//! Every iteration owns one [`IterationDeltaMap`], keyed by positions in that
//! iteration's *input* snapshot. Queries fold over the maps in order, re-basing
//! the coordinate after each iteration, so a position computed against the
//! original text ends up in the coordinates of the current snapshot.
//!
//! An applied directive leaves four kinds of entries:
//!
//! - [`DeltaColumn::Grown`] at the match start: chars the matched text grew by.
//!   Only [`OffsetLedger::remap_length`] reads these.
//! - [`DeltaColumn::Shifted`] at the match end: chars the text after the match
//!   moved right on its line.
//! - [`DeltaColumn::Carried`] at the match end: lines the text after the match
//!   moved down.
//! - [`DeltaColumn::WholeLines`] on the match's last line: lines inserted
//!   between it and the next line.
//!
//! All counts are non-negative; replacements only ever grow.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::text::Position;

// ============================================================================
// Iteration Delta Map
// ============================================================================

/// The column key of a delta entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeltaColumn {
    /// Chars added inside a match starting at this column.
    Grown(u32),
    /// Chars text at or after this column moved right.
    Shifted(u32),
    /// Lines text at or after this column moved down.
    Carried(u32),
    /// Lines inserted after this line (the whole-line sentinel).
    WholeLines,
}

/// Deltas recorded by one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationDeltaMap {
    lines: BTreeMap<u32, BTreeMap<DeltaColumn, u32>>,
}

impl IterationDeltaMap {
    pub fn new() -> Self {
        IterationDeltaMap::default()
    }

    /// Add `delta` to the entry at `(line, column)`. Zero deltas are not stored.
    pub fn record(&mut self, line: u32, column: DeltaColumn, delta: u32) {
        if delta == 0 {
            return;
        }
        *self
            .lines
            .entry(line)
            .or_default()
            .entry(column)
            .or_insert(0) += delta;
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// All entries as `(line, column, delta)` in line order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, DeltaColumn, u32)> + '_ {
        self.lines
            .iter()
            .flat_map(|(&line, cols)| cols.iter().map(move |(&col, &delta)| (line, col, delta)))
    }

    /// Whole lines inserted after lines strictly before `line`.
    pub fn lines_inserted_before(&self, line: u32) -> u32 {
        self.lines
            .range(..line)
            .filter_map(|(_, cols)| cols.get(&DeltaColumn::WholeLines))
            .sum()
    }

    /// Sum of the `Shifted` entries on `line` at columns `<= col`.
    pub fn shift_at(&self, line: u32, col: u32) -> u32 {
        self.sum_on_line(line, |c| matches!(c, DeltaColumn::Shifted(at) if at <= col))
    }

    /// Sum of the `Carried` entries on `line` at columns `<= col`.
    pub fn carry_at(&self, line: u32, col: u32) -> u32 {
        self.sum_on_line(line, |c| matches!(c, DeltaColumn::Carried(at) if at <= col))
    }

    fn sum_on_line(&self, line: u32, pick: impl Fn(DeltaColumn) -> bool) -> u32 {
        self.lines
            .get(&line)
            .map(|cols| {
                cols.iter()
                    .filter(|(&c, _)| pick(c))
                    .map(|(_, &delta)| delta)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Map a position of this iteration's input snapshot to its output snapshot.
    pub fn map_position(&self, pos: Position) -> Position {
        Position::new(
            pos.line + self.lines_inserted_before(pos.line) + self.carry_at(pos.line, pos.col),
            pos.col + self.shift_at(pos.line, pos.col),
        )
    }

    /// Growth recorded at match starts within `[start, end)`.
    pub fn growth_within(&self, start: Position, end: Position) -> u32 {
        if start >= end {
            return 0;
        }
        self.lines
            .range(start.line..=end.line)
            .flat_map(|(&line, cols)| cols.iter().map(move |(&col, &delta)| (line, col, delta)))
            .filter_map(|(line, col, delta)| match col {
                DeltaColumn::Grown(at) => {
                    let here = Position::new(line, at);
                    (start <= here && here < end).then_some(delta)
                }
                _ => None,
            })
            .sum()
    }
}

// ============================================================================
// Offset Ledger
// ============================================================================

/// Per-iteration delta maps of one file.
///
/// Maps for finished iterations are read-only; the map of the iteration being
/// applied collects entries through [`OffsetLedger::record`] and becomes visible
/// to queries only after [`OffsetLedger::finish_iteration`].
#[derive(Debug, Clone, Default)]
pub struct OffsetLedger {
    finished: Vec<IterationDeltaMap>,
    current: IterationDeltaMap,
}

impl OffsetLedger {
    pub fn new() -> Self {
        OffsetLedger::default()
    }

    /// Number of finished iterations.
    pub fn iterations(&self) -> usize {
        self.finished.len()
    }

    /// The finished map of iteration `i`.
    pub fn iteration(&self, i: usize) -> Option<&IterationDeltaMap> {
        self.finished.get(i)
    }

    /// The map being filled for the current iteration.
    pub fn current(&self) -> &IterationDeltaMap {
        &self.current
    }

    /// Record a delta for the current iteration.
    pub fn record(&mut self, line: u32, column: DeltaColumn, delta: u32) {
        self.current.record(line, column, delta);
    }

    /// Seal the current iteration's map and start an empty one.
    pub fn finish_iteration(&mut self) {
        self.finished.push(std::mem::take(&mut self.current));
    }

    /// Map an original position through iterations `from..` of the finished maps.
    pub fn remap_from(&self, from: usize, pos: Position) -> Position {
        self.finished
            .iter()
            .skip(from)
            .fold(pos, |pos, map| map.map_position(pos))
    }

    /// Map an original position into the current snapshot.
    pub fn remap_position(&self, pos: Position) -> Position {
        self.remap_from(0, pos)
    }

    /// Line of an original line's start in the current snapshot.
    pub fn remap_line(&self, original_line: u32) -> u32 {
        self.remap_position(Position::new(original_line, 0)).line
    }

    /// Column of an original position in the current snapshot.
    pub fn remap_col(&self, original_line: u32, original_col: u32) -> u32 {
        self.remap_position(Position::new(original_line, original_col)).col
    }

    /// Chars an original range `[start, end)` has grown by since it was measured.
    pub fn remap_length(&self, start: Position, end: Position) -> u32 {
        let mut start = start;
        let mut end = end;
        let mut extra = 0;
        for map in &self.finished {
            extra += map.growth_within(start, end);
            start = map.map_position(start);
            end = map.map_position(end);
        }
        extra
    }
}

// ============================================================================
// File Line Map
// ============================================================================

/// Lines inserted after each original line, across all iterations.
///
/// Translates original line numbers to final-file line numbers for hyperlinks,
/// independent of the per-iteration remapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileLineMap {
    inserted_after: BTreeMap<u32, u32>,
}

impl FileLineMap {
    pub fn new() -> Self {
        FileLineMap::default()
    }

    /// Note `count` lines inserted after original line `line`.
    pub fn record(&mut self, line: u32, count: u32) {
        if count > 0 {
            *self.inserted_after.entry(line).or_insert(0) += count;
        }
    }

    /// Lines inserted after `line` across all iterations.
    pub fn inserted_after(&self, line: u32) -> u32 {
        self.inserted_after.get(&line).copied().unwrap_or(0)
    }

    /// Final-file line of an original line.
    pub fn final_line(&self, original_line: u32) -> u32 {
        original_line + self.inserted_after.range(..original_line).map(|(_, n)| n).sum::<u32>()
    }

    /// Total lines inserted.
    pub fn total_inserted(&self) -> u32 {
        self.inserted_after.values().sum()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn p(line: u32, col: u32) -> Position {
        Position::new(line, col)
    }

    mod delta_map_tests {
        use super::*;

        #[test]
        fn zero_deltas_are_not_recorded() {
            let mut map = IterationDeltaMap::new();
            map.record(3, DeltaColumn::Shifted(4), 0);
            assert!(map.is_empty());
        }

        #[test]
        fn shift_applies_at_and_after_its_column() {
            let mut map = IterationDeltaMap::new();
            map.record(1, DeltaColumn::Shifted(5), 3);
            assert_eq!(map.map_position(p(1, 4)), p(1, 4));
            assert_eq!(map.map_position(p(1, 5)), p(1, 8));
            assert_eq!(map.map_position(p(1, 9)), p(1, 12));
            assert_eq!(map.map_position(p(2, 9)), p(2, 9));
        }

        #[test]
        fn whole_lines_move_later_lines_only() {
            let mut map = IterationDeltaMap::new();
            map.record(2, DeltaColumn::WholeLines, 2);
            assert_eq!(map.map_position(p(2, 7)), p(2, 7));
            assert_eq!(map.map_position(p(3, 0)), p(5, 0));
        }

        #[test]
        fn carried_tail_moves_down_and_right() {
            // "a X b" where X (cols 2..3) became two lines ending at col 6.
            let mut map = IterationDeltaMap::new();
            map.record(1, DeltaColumn::Carried(3), 1);
            map.record(1, DeltaColumn::Shifted(3), 3);
            map.record(1, DeltaColumn::WholeLines, 1);
            assert_eq!(map.map_position(p(1, 2)), p(1, 2));
            assert_eq!(map.map_position(p(1, 4)), p(2, 7));
            assert_eq!(map.map_position(p(2, 0)), p(3, 0));
        }

        #[test]
        fn growth_is_counted_from_start_inclusive_to_end_exclusive() {
            let mut map = IterationDeltaMap::new();
            map.record(1, DeltaColumn::Grown(2), 5);
            map.record(1, DeltaColumn::Grown(8), 7);
            map.record(3, DeltaColumn::Grown(0), 11);
            assert_eq!(map.growth_within(p(1, 2), p(1, 8)), 5);
            assert_eq!(map.growth_within(p(1, 3), p(3, 1)), 18);
            assert_eq!(map.growth_within(p(1, 0), p(3, 0)), 12);
        }
    }

    mod ledger_tests {
        use super::*;

        #[test]
        fn single_line_growth_leaves_other_lines_alone() {
            // "X\nY\n": X -> XX in iteration 0.
            let mut ledger = OffsetLedger::new();
            ledger.record(1, DeltaColumn::Grown(0), 1);
            ledger.record(1, DeltaColumn::Shifted(1), 1);
            ledger.finish_iteration();
            assert_eq!(ledger.remap_line(2), 2);
            assert_eq!(ledger.remap_col(2, 0), 0);
            assert_eq!(ledger.remap_col(1, 1), 2);
        }

        #[test]
        fn current_iteration_is_invisible_until_finished() {
            let mut ledger = OffsetLedger::new();
            ledger.record(1, DeltaColumn::WholeLines, 2);
            assert_eq!(ledger.remap_line(4), 4);
            ledger.finish_iteration();
            assert_eq!(ledger.remap_line(4), 6);
        }

        #[test]
        fn positions_rebase_between_iterations() {
            let mut ledger = OffsetLedger::new();
            // Iteration 0: two lines inserted after line 1.
            ledger.record(1, DeltaColumn::WholeLines, 2);
            ledger.finish_iteration();
            // Iteration 1 addresses line 5 of its own input (original line 3).
            ledger.record(5, DeltaColumn::Shifted(0), 4);
            ledger.finish_iteration();
            assert_eq!(ledger.remap_position(p(3, 0)), p(5, 4));
            // Original line 5 is line 7 in iteration 1's input; no shift there.
            assert_eq!(ledger.remap_position(p(5, 0)), p(7, 0));
        }

        #[test]
        fn remap_length_sums_nested_growth_across_iterations() {
            let mut ledger = OffsetLedger::new();
            // Iteration 0: growth of 6 at 1:4 inside the outer span, 9 outside it.
            ledger.record(1, DeltaColumn::Grown(4), 6);
            ledger.record(1, DeltaColumn::Shifted(6), 6);
            ledger.record(1, DeltaColumn::Grown(20), 9);
            ledger.record(1, DeltaColumn::Shifted(21), 9);
            ledger.finish_iteration();
            // Iteration 1: growth of 2 at 1:0, the outer span's start.
            ledger.record(1, DeltaColumn::Grown(0), 2);
            ledger.record(1, DeltaColumn::Shifted(16), 2);
            ledger.finish_iteration();
            assert_eq!(ledger.remap_length(p(1, 0), p(1, 10)), 8);
            assert_eq!(ledger.remap_length(p(1, 10), p(1, 20)), 0);
        }
    }

    mod file_line_map_tests {
        use super::*;

        #[test]
        fn final_line_counts_insertions_before_the_line() {
            let mut map = FileLineMap::new();
            map.record(3, 2);
            map.record(7, 1);
            map.record(9, 0);
            assert_eq!(map.final_line(3), 3);
            assert_eq!(map.final_line(4), 6);
            assert_eq!(map.final_line(8), 11);
            assert_eq!(map.total_inserted(), 3);
            assert_eq!(map.inserted_after(3), 2);
        }
    }
}
