//! Subrange Store: named char ranges inside block directives' matched text.
//!
//! The analyzer fills the table once per file; rewriting only reads it. Ranges
//! are absolute char offsets into the original text, so a block recipe that runs
//! after nested rewrites sees them through [`Subranges::resolve`], which maps each
//! range into the matched text of the current snapshot.

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::directive::{BlockId, RewriteDirective, Span};
use crate::error::{RewriteError, RewriteResult};
use crate::text::char_to_byte;

/// Subranges as they appear in job files: `block_id -> name -> [start, end]`.
pub type RawSubrangeTable = BTreeMap<u32, BTreeMap<String, [usize; 2]>>;

/// Named ranges of one block directive, in original-text char offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subranges {
    ranges: BTreeMap<String, Span>,
}

impl Subranges {
    /// Add a named range.
    pub fn with(mut self, name: impl Into<String>, span: Span) -> Self {
        self.ranges.insert(name.into(), span);
        self
    }

    /// Look up a range by name.
    pub fn get(&self, name: &str) -> Option<Span> {
        self.ranges.get(name).copied()
    }

    /// Iterate over `(name, span)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Span)> {
        self.ranges.iter().map(|(name, span)| (name.as_str(), *span))
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Map every range into the matched text of the current snapshot.
    ///
    /// `locate` turns an original char offset into a char offset relative to the
    /// start of `matched`; it returns `None` when the ledger cannot place it.
    pub fn resolve<'a>(
        &self,
        directive: u32,
        matched: &'a str,
        mut locate: impl FnMut(usize) -> Option<usize>,
    ) -> RewriteResult<BlockText<'a>> {
        let char_len = matched.chars().count();
        let mut ranges = BTreeMap::new();
        for (name, span) in &self.ranges {
            let start = locate(span.start);
            let end = locate(span.end);
            let (start, end) = match (start, end) {
                (Some(s), Some(e)) if s <= e && e <= char_len => (s, e),
                _ => {
                    return Err(RewriteError::bookkeeping(
                        directive,
                        format!("subrange '{}' {} does not map into the matched text", name, span),
                    ))
                }
            };
            // Both bounds are within the char length, so the conversions succeed.
            let (Some(bs), Some(be)) = (char_to_byte(matched, start), char_to_byte(matched, end))
            else {
                return Err(RewriteError::bookkeeping(
                    directive,
                    format!("subrange '{}' splits a char", name),
                ));
            };
            ranges.insert(name.clone(), bs..be);
        }
        Ok(BlockText { text: matched, ranges })
    }
}

/// The subrange table of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubrangeTable {
    blocks: BTreeMap<BlockId, Subranges>,
}

impl SubrangeTable {
    pub fn new() -> Self {
        SubrangeTable::default()
    }

    /// Register the subranges of one block.
    pub fn insert(&mut self, block: BlockId, subranges: Subranges) {
        self.blocks.insert(block, subranges);
    }

    /// Subranges of a block, if the analyzer provided any.
    pub fn get(&self, block: BlockId) -> Option<&Subranges> {
        self.blocks.get(&block)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Build the table from its serialized form.
    ///
    /// Fails with the offending block id when a range has `start > end`.
    pub fn from_raw(raw: RawSubrangeTable) -> Result<Self, (u32, String)> {
        let mut table = SubrangeTable::new();
        for (block, names) in raw {
            let mut subranges = Subranges::default();
            for (name, [start, end]) in names {
                if start > end {
                    return Err((block, format!("subrange '{}' has start {} > end {}", name, start, end)));
                }
                subranges = subranges.with(name, Span::new(start, end));
            }
            table.insert(BlockId(block), subranges);
        }
        Ok(table)
    }

    /// Serialized form of the table.
    pub fn to_raw(&self) -> RawSubrangeTable {
        self.blocks
            .iter()
            .map(|(block, subranges)| {
                let names = subranges
                    .iter()
                    .map(|(name, span)| (name.to_string(), [span.start, span.end]))
                    .collect();
                (block.0, names)
            })
            .collect()
    }

    /// Check that a block directive's subranges exist and lie inside its range.
    pub fn validate_for(&self, directive: &RewriteDirective) -> RewriteResult<()> {
        let Some(block) = directive.block_id() else {
            return Ok(());
        };
        let subranges = self.get(block).ok_or_else(|| {
            RewriteError::invalid_directive(directive.id, format!("no subranges for {}", block))
        })?;
        for (name, span) in subranges.iter() {
            if !directive.span.contains(&span) {
                return Err(RewriteError::invalid_directive(
                    directive.id,
                    format!(
                        "subrange '{}' {} lies outside the directive range {}",
                        name, span, directive.span
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Format the name of the `index`-th entry of an indexed subrange family.
pub fn indexed_name(base: &str, index: usize) -> String {
    format!("{}[{}]", base, index)
}

/// A block directive's matched text with its subranges resolved into it.
#[derive(Debug, Clone)]
pub struct BlockText<'a> {
    text: &'a str,
    /// Byte ranges into `text`.
    ranges: BTreeMap<String, Range<usize>>,
}

impl<'a> BlockText<'a> {
    /// Build a view directly from byte ranges into `text`.
    pub fn from_byte_ranges(
        text: &'a str,
        ranges: impl IntoIterator<Item = (String, Range<usize>)>,
    ) -> Self {
        BlockText {
            text,
            ranges: ranges.into_iter().collect(),
        }
    }

    /// The whole matched text.
    pub fn text(&self) -> &'a str {
        self.text
    }

    /// Byte range of a subrange within the matched text.
    pub fn range(&self, name: &str) -> Option<Range<usize>> {
        self.ranges.get(name).cloned()
    }

    /// Text of a subrange.
    pub fn get(&self, name: &str) -> Option<&'a str> {
        let text = self.text;
        self.ranges.get(name).and_then(|r| text.get(r.clone()))
    }

    /// Text of an optional subrange, treating blank text as absent.
    pub fn non_blank(&self, name: &str) -> Option<&'a str> {
        self.get(name).map(str::trim).filter(|s| !s.is_empty())
    }

    /// Ranges of an indexed family `base[0]`, `base[1]`, ... up to the first gap.
    pub fn indexed_ranges(&self, base: &str) -> Vec<Range<usize>> {
        (0..)
            .map(|i| self.range(&indexed_name(base, i)))
            .take_while(Option::is_some)
            .flatten()
            .collect()
    }

    /// Number of consecutive entries of an indexed family.
    pub fn count(&self, base: &str) -> usize {
        self.indexed_ranges(base).len()
    }
}

// ============================================================================
// Tests
// ============================================================================
