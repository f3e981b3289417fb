//! Rewrite directives: what to replace, where, and with which recipe.
//!
//! A directive names an exact char range of the **original** file and a
//! transformation recipe. Directives for one file are fixed before rewriting
//! starts; the rewriter never invents or drops any.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RewriteError, RewriteResult};
use crate::text::{LineIndex, Position};

/// Placeholder marker inside directive templates.
pub const PLACEHOLDER: &str = "{}";

// ============================================================================
// Span
// ============================================================================

/// Char offsets into the original file.
///
/// Spans are half-open intervals: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Start char offset (inclusive).
    pub start: usize,
    /// End char offset (exclusive).
    pub end: usize,
}

impl Span {
    /// Create a new span.
    ///
    /// # Panics
    /// Panics if `start > end`.
    pub fn new(start: usize, end: usize) -> Self {
        assert!(
            start <= end,
            "Span start ({}) must be <= end ({})",
            start,
            end
        );
        Span { start, end }
    }

    /// Length of the span in chars.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Check if span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Check if this span overlaps with another.
    ///
    /// Adjacent spans (one ends where another starts) do NOT overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Check if this span contains another span entirely.
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A directive's identity and range, as reported in conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveRange {
    pub id: u32,
    pub span: Span,
}

impl DirectiveRange {
    pub fn new(id: u32, span: Span) -> Self {
        DirectiveRange { id, span }
    }
}

impl fmt::Display for DirectiveRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.span)
    }
}

// ============================================================================
// Rewrite Kinds
// ============================================================================

/// Identifier of a block directive's entry in the subrange table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block_{}", self.0)
    }
}

/// Statement transpilers that synthesize a replacement from named subranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockRecipe {
    /// MERGE into a guarded INSERT/UPDATE/DELETE sequence.
    MergeToDml,
    /// One ALTER with N comma-separated actions into N ALTERs.
    SplitMultiActionAlter,
    /// Ordered FOR XML PATH concatenation into STRING_AGG.
    StringAggViaPivot,
    /// Inline index clause into a commented clause plus CREATE INDEX.
    CommentAndAppendIndex,
}

impl BlockRecipe {
    /// Stable name used in job files.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockRecipe::MergeToDml => "merge-to-dml",
            BlockRecipe::SplitMultiActionAlter => "split-multi-action-alter",
            BlockRecipe::StringAggViaPivot => "string-agg-via-pivot",
            BlockRecipe::CommentAndAppendIndex => "comment-and-append-index",
        }
    }
}

/// The recipe a directive applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RewriteKind {
    ExprWrap,
    ExprWrapStripCall,
    LiteralReplace,
    OdbcFunctionCall,
    OdbcLiteral,
    BlockReplace(BlockRecipe),
    CommentAndAppend,
}

const BLOCK_PREFIX: &str = "block:";

const BLOCK_RECIPES: [BlockRecipe; 4] = [
    BlockRecipe::MergeToDml,
    BlockRecipe::SplitMultiActionAlter,
    BlockRecipe::StringAggViaPivot,
    BlockRecipe::CommentAndAppendIndex,
];

impl RewriteKind {
    /// Stable name used in job files and the change log.
    pub fn name(&self) -> String {
        match self {
            RewriteKind::BlockReplace(recipe) => format!("{}{}", BLOCK_PREFIX, recipe.as_str()),
            RewriteKind::ExprWrap => "expr-wrap".to_string(),
            RewriteKind::ExprWrapStripCall => "expr-wrap-strip-call".to_string(),
            RewriteKind::LiteralReplace => "literal-replace".to_string(),
            RewriteKind::OdbcFunctionCall => "odbc-function-call".to_string(),
            RewriteKind::OdbcLiteral => "odbc-literal".to_string(),
            RewriteKind::CommentAndAppend => "comment-and-append".to_string(),
        }
    }

    /// Whether the payload must reference the subrange table.
    pub fn is_block(&self) -> bool {
        matches!(self, RewriteKind::BlockReplace(_))
    }

    /// Required number of placeholders in the template, if the kind uses one.
    pub fn template_placeholders(&self) -> Option<usize> {
        match self {
            RewriteKind::ExprWrap | RewriteKind::ExprWrapStripCall | RewriteKind::CommentAndAppend => {
                Some(1)
            }
            RewriteKind::LiteralReplace => Some(0),
            RewriteKind::OdbcFunctionCall | RewriteKind::OdbcLiteral => None,
            RewriteKind::BlockReplace(_) => None,
        }
    }
}

impl fmt::Display for RewriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for RewriteKind {
    type Err = RewriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "expr-wrap" => RewriteKind::ExprWrap,
            "expr-wrap-strip-call" => RewriteKind::ExprWrapStripCall,
            "literal-replace" => RewriteKind::LiteralReplace,
            "odbc-function-call" => RewriteKind::OdbcFunctionCall,
            "odbc-literal" => RewriteKind::OdbcLiteral,
            "comment-and-append" => RewriteKind::CommentAndAppend,
            other => {
                let recipe = other.strip_prefix(BLOCK_PREFIX).and_then(|name| {
                    BLOCK_RECIPES.iter().find(|recipe| recipe.as_str() == name)
                });
                match recipe {
                    Some(recipe) => RewriteKind::BlockReplace(*recipe),
                    None => return Err(RewriteError::UnknownRewriteKind(other.to_string())),
                }
            }
        };
        Ok(kind)
    }
}

// ============================================================================
// Directive
// ============================================================================

/// What a directive carries besides its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Template text, containing [`PLACEHOLDER`] where the kind requires one.
    Template(String),
    /// Reference into the subrange table.
    Block(BlockId),
}

/// One scheduled text replacement with original-file coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteDirective {
    /// Stable identifier, unique within a file.
    pub id: u32,
    /// Analyzer batch the directive came from (reporting only).
    pub batch_no: u32,
    /// Char range in the original text.
    pub span: Span,
    /// Position of `span.start` in the original text.
    pub start: Position,
    /// Position of `span.end` in the original text.
    pub end: Position,
    pub kind: RewriteKind,
    pub payload: Payload,
}

impl RewriteDirective {
    /// The directive's identity and range.
    pub fn range(&self) -> DirectiveRange {
        DirectiveRange::new(self.id, self.span)
    }

    /// The template text, if the payload is one.
    pub fn template(&self) -> Option<&str> {
        match &self.payload {
            Payload::Template(text) => Some(text),
            Payload::Block(_) => None,
        }
    }

    /// The block id, if the payload is one.
    pub fn block_id(&self) -> Option<BlockId> {
        match self.payload {
            Payload::Block(id) => Some(id),
            Payload::Template(_) => None,
        }
    }

    /// Check this directive against the original text it was computed for.
    pub fn validate(&self, index: &LineIndex) -> RewriteResult<()> {
        if self.span.is_empty() {
            return Err(RewriteError::invalid_directive(self.id, "empty range"));
        }
        if self.span.end > index.char_len() {
            return Err(RewriteError::invalid_directive(
                self.id,
                format!(
                    "range {} exceeds text length {}",
                    self.span,
                    index.char_len()
                ),
            ));
        }
        for (label, offset, claimed) in [
            ("start", self.span.start, self.start),
            ("end", self.span.end, self.end),
        ] {
            let actual = index.position(offset);
            if actual != Some(claimed) {
                return Err(RewriteError::invalid_directive(
                    self.id,
                    format!(
                        "{} position {} does not match offset {} ({})",
                        label,
                        claimed,
                        offset,
                        actual.map(|p| p.to_string()).unwrap_or_default()
                    ),
                ));
            }
        }
        match (&self.payload, self.kind.is_block()) {
            (Payload::Template(_), true) => {
                return Err(RewriteError::invalid_directive(
                    self.id,
                    format!("kind {} needs a block_id payload", self.kind),
                ));
            }
            (Payload::Block(_), false) => {
                return Err(RewriteError::invalid_directive(
                    self.id,
                    format!("kind {} needs a template payload", self.kind),
                ));
            }
            _ => {}
        }
        if let (Some(expected), Some(template)) = (self.kind.template_placeholders(), self.template()) {
            let found = template.matches(PLACEHOLDER).count();
            if found != expected {
                return Err(RewriteError::invalid_directive(
                    self.id,
                    format!(
                        "template for {} must contain {} placeholder(s), found {}",
                        self.kind, expected, found
                    ),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Serialized Form
// ============================================================================

/// Payload as it appears in job files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawPayload {
    Template(String),
    BlockId(u32),
}

/// A directive as it appears in job files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDirective {
    pub id: u32,
    #[serde(default)]
    pub batch_no: u32,
    pub start_pos: usize,
    pub end_pos: usize,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub kind: String,
    pub payload: RawPayload,
}

impl TryFrom<RawDirective> for RewriteDirective {
    type Error = RewriteError;

    fn try_from(raw: RawDirective) -> Result<Self, Self::Error> {
        let kind = raw.kind.parse::<RewriteKind>()?;
        if raw.start_pos > raw.end_pos {
            return Err(RewriteError::invalid_directive(
                raw.id,
                format!("start_pos {} is after end_pos {}", raw.start_pos, raw.end_pos),
            ));
        }
        let payload = match raw.payload {
            RawPayload::Template(text) => Payload::Template(text),
            RawPayload::BlockId(id) => Payload::Block(BlockId(id)),
        };
        Ok(RewriteDirective {
            id: raw.id,
            batch_no: raw.batch_no,
            span: Span::new(raw.start_pos, raw.end_pos),
            start: Position::new(raw.start_line, raw.start_col),
            end: Position::new(raw.end_line, raw.end_col),
            kind,
            payload,
        })
    }
}

impl From<&RewriteDirective> for RawDirective {
    fn from(directive: &RewriteDirective) -> Self {
        RawDirective {
            id: directive.id,
            batch_no: directive.batch_no,
            start_pos: directive.span.start,
            end_pos: directive.span.end,
            start_line: directive.start.line,
            start_col: directive.start.col,
            end_line: directive.end.line,
            end_col: directive.end.col,
            kind: directive.kind.name(),
            payload: match &directive.payload {
                Payload::Template(text) => RawPayload::Template(text.clone()),
                Payload::Block(id) => RawPayload::BlockId(id.0),
            },
        }
    }
}

// ============================================================================
// Test Helpers
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    mod span_tests {
        use super::*;

        #[test]
        fn span_overlap_detection() {
            let span1 = Span::new(10, 20);
            let span2 = Span::new(15, 25);
            let span3 = Span::new(20, 30);

            assert!(span1.overlaps(&span2));
            assert!(span2.overlaps(&span1));
            // Adjacent spans don't overlap
            assert!(!span1.overlaps(&span3));
            assert!(!span3.overlaps(&span1));
        }

        #[test]
        fn span_contains() {
            let outer = Span::new(10, 30);
            let inner = Span::new(15, 25);
            let partial = Span::new(20, 40);

            assert!(outer.contains(&inner));
            assert!(outer.contains(&outer));
            assert!(!inner.contains(&outer));
            assert!(!outer.contains(&partial));
        }

        #[test]
        #[should_panic(expected = "must be <= end")]
        fn span_new_invalid_range_panics() {
            let _ = Span::new(5, 4);
        }
    }

    mod kind_tests {
        use super::*;

        #[test]
        fn kind_names_parse_back() {
            let kinds = [
                RewriteKind::ExprWrap,
                RewriteKind::ExprWrapStripCall,
                RewriteKind::LiteralReplace,
                RewriteKind::OdbcFunctionCall,
                RewriteKind::OdbcLiteral,
                RewriteKind::CommentAndAppend,
                RewriteKind::BlockReplace(BlockRecipe::MergeToDml),
                RewriteKind::BlockReplace(BlockRecipe::SplitMultiActionAlter),
                RewriteKind::BlockReplace(BlockRecipe::StringAggViaPivot),
                RewriteKind::BlockReplace(BlockRecipe::CommentAndAppendIndex),
            ];
            for kind in kinds {
                assert_eq!(kind.name().parse::<RewriteKind>().unwrap(), kind);
            }
        }

        #[test]
        fn unknown_kind_is_rejected() {
            for name in ["ExprWrap", "block:", "block:merge", "frobnicate"] {
                match name.parse::<RewriteKind>() {
                    Err(RewriteError::UnknownRewriteKind(got)) => assert_eq!(got, name),
                    other => panic!("expected UnknownRewriteKind, got {:?}", other),
                }
            }
        }
    }

    mod validation_tests {
        use super::*;

        const TEXT: &str = "SELECT CHECKSUM(a)\nFROM t\n";

        #[test]
        fn well_formed_directive_validates() {
            let d = directive_for(
                TEXT,
                1,
                "CHECKSUM(a)",
                RewriteKind::ExprWrap,
                Payload::Template("HASHBYTES('MD5', {})".to_string()),
            );
            assert_eq!(d.start, Position::new(1, 7));
            assert_eq!(d.end, Position::new(1, 18));
            d.validate(&LineIndex::new(TEXT)).unwrap();
        }

        #[test]
        fn mismatched_position_is_invalid() {
            let mut d = directive_for(
                TEXT,
                1,
                "FROM",
                RewriteKind::LiteralReplace,
                Payload::Template("FROM".to_string()),
            );
            d.start = Position::new(1, 0);
            let err = d.validate(&LineIndex::new(TEXT)).unwrap_err();
            assert!(err.to_string().contains("start position 1:0"), "{}", err);
        }

        #[test]
        fn empty_and_out_of_bounds_ranges_are_invalid() {
            let mut d = directive_at(
                TEXT,
                1,
                3,
                3,
                RewriteKind::ExprWrap,
                Payload::Template("{}".to_string()),
            );
            assert!(d.validate(&LineIndex::new(TEXT)).is_err());
            d.span = Span::new(3, 500);
            assert!(matches!(
                d.validate(&LineIndex::new(TEXT)),
                Err(RewriteError::InvalidDirective { directive: 1, .. })
            ));
        }

        #[test]
        fn payload_must_match_kind() {
            let block_with_template = directive_for(
                TEXT,
                2,
                "FROM t",
                RewriteKind::BlockReplace(BlockRecipe::MergeToDml),
                Payload::Template("x".to_string()),
            );
            assert!(block_with_template.validate(&LineIndex::new(TEXT)).is_err());

            let wrap_without_placeholder = directive_for(
                TEXT,
                3,
                "CHECKSUM(a)",
                RewriteKind::ExprWrap,
                Payload::Template("HASHBYTES('MD5', a)".to_string()),
            );
            assert!(wrap_without_placeholder
                .validate(&LineIndex::new(TEXT))
                .is_err());
        }
    }

    mod serde_tests {
        use super::*;

        #[test]
        fn raw_directive_parses_from_job_json() {
            let json = r#"{
                "id": 4, "batch_no": 2, "start_pos": 7, "end_pos": 18,
                "start_line": 1, "start_col": 7, "end_line": 1, "end_col": 18,
                "kind": "block:merge-to-dml", "payload": { "block_id": 9 }
            }"#;
            let raw: RawDirective = serde_json::from_str(json).unwrap();
            let directive = RewriteDirective::try_from(raw.clone()).unwrap();
            assert_eq!(directive.kind, RewriteKind::BlockReplace(BlockRecipe::MergeToDml));
            assert_eq!(directive.block_id(), Some(BlockId(9)));
            assert_eq!(RawDirective::from(&directive), raw);
        }

        #[test]
        fn raw_directive_with_unknown_kind_fails_fast() {
            let raw = RawDirective {
                id: 1,
                batch_no: 0,
                start_pos: 0,
                end_pos: 1,
                start_line: 1,
                start_col: 0,
                end_line: 1,
                end_col: 1,
                kind: "rewrite-everything".to_string(),
                payload: RawPayload::Template(String::new()),
            };
            let err = RewriteDirective::try_from(raw).unwrap_err();
            assert!(err.aborts_run());
        }
    }
}
