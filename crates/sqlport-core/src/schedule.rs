//! Directive Scheduler: partitions a file's directives into iterations.
//!
//! Each iteration is a set of pairwise disjoint directives, sorted by position,
//! that can be applied in one linear scan. A directive whose range contains
//! another is deferred until every directive inside it has been applied.

use std::cmp::Ordering;

use crate::directive::{DirectiveRange, RewriteDirective};
use crate::error::{RewriteError, RewriteResult};

/// The iterations of one file, as indices into the directive list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    iterations: Vec<Vec<usize>>,
}

impl Schedule {
    /// Iterations in application order; each is sorted ascending by position.
    pub fn iterations(&self) -> &[Vec<usize>] {
        &self.iterations
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    /// Directive ids per iteration.
    pub fn ids(&self, directives: &[RewriteDirective]) -> Vec<Vec<u32>> {
        self.iterations
            .iter()
            .map(|iteration| iteration.iter().map(|&i| directives[i].id).collect())
            .collect()
    }
}

/// Find the first pair of directives that overlap without one containing the other.
///
/// Directives are checked pairwise in start order; the scan for a directive
/// stops at the first later directive that starts at or after its end.
pub fn detect_partial_overlap(directives: &[RewriteDirective]) -> Option<(DirectiveRange, DirectiveRange)> {
    let mut order: Vec<usize> = (0..directives.len()).collect();
    order.sort_by_key(|&i| (directives[i].span.start, directives[i].id));

    for (pos, &i) in order.iter().enumerate() {
        let span_i = directives[i].span;
        for &j in &order[pos + 1..] {
            let span_j = directives[j].span;
            if span_j.start >= span_i.end {
                break;
            }
            if span_i.overlaps(&span_j) && !span_i.contains(&span_j) && !span_j.contains(&span_i) {
                return Some((directives[i].range(), directives[j].range()));
            }
        }
    }
    None
}

/// Outermost first: by start, then longest, then highest id.
///
/// Identical ranges count as nested with the lowest id innermost, so they are
/// applied in id order.
fn nesting_order(a: &RewriteDirective, b: &RewriteDirective) -> Ordering {
    a.span
        .start
        .cmp(&b.span.start)
        .then_with(|| b.span.len().cmp(&a.span.len()))
        .then_with(|| b.id.cmp(&a.id))
}

/// Partition `directives` into iterations.
///
/// Every pass walks the pending directives in [`nesting_order`], keeps the
/// innermost ones and defers their enclosing ones to the next pass.
pub fn plan(directives: &[RewriteDirective]) -> RewriteResult<Schedule> {
    if let Some((first, second)) = detect_partial_overlap(directives) {
        return Err(RewriteError::OverlapConflict { first, second });
    }

    let mut pending: Vec<usize> = (0..directives.len()).collect();
    pending.sort_by(|&a, &b| nesting_order(&directives[a], &directives[b]));

    let mut iterations = Vec::new();
    while !pending.is_empty() {
        let mut current: Vec<usize> = Vec::with_capacity(pending.len());
        let mut deferred: Vec<usize> = Vec::new();

        for &index in &pending {
            let span = directives[index].span;
            // `current` stays disjoint, so only its last entry can contain `span`.
            while let Some(&last) = current.last() {
                if directives[last].span.contains(&span) {
                    current.pop();
                    deferred.push(last);
                } else {
                    break;
                }
            }
            current.push(index);
        }

        current.sort_by_key(|&i| directives[i].span.start);
        iterations.push(current);

        // Deferred directives were popped in nesting order; restore sort order.
        deferred.sort_by(|&a, &b| nesting_order(&directives[a], &directives[b]));
        pending = deferred;
    }

    Ok(Schedule { iterations })
}

// ============================================================================
// Tests
// ============================================================================
