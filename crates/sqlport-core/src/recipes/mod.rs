//! Statement Recipes: pure functions from matched text to replacement text.
//!
//! Every recipe receives the matched text of the current snapshot (nested
//! rewrites already applied) and, for block kinds, its resolved subranges. The
//! result carries the replacement plus a plain rendering of the new text for the
//! change log. Recipes never shrink their input: expression rewrites keep the
//! original in a trailing comment, statement rewrites line-comment it.

mod alter;
mod expr;
mod index;
mod merge;
mod odbc;
mod string_agg;

use thiserror::Error;

use crate::directive::{BlockRecipe, RewriteDirective, RewriteKind};
use crate::subrange::BlockText;
use crate::text::{comment_safe, line_commented};

/// Opening marker of an expression-level rewrite.
pub const REWRITTEN_MARKER: &str = "/*REWRITTEN*/";

/// Why a recipe could not produce a replacement.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecipeError {
    /// A mandatory subrange is missing or blank.
    #[error("missing subrange '{0}'")]
    MissingSubrange(String),

    /// The matched text or a subrange does not have the expected shape.
    #[error("unexpected shape: {0}")]
    Shape(String),

    /// The construct is recognized but cannot be rewritten equivalently.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A block kind reached the recipes without resolved subranges.
    #[error("no subranges resolved for block recipe {0}")]
    NoSubranges(&'static str),
}

impl RecipeError {
    pub(crate) fn shape(message: impl Into<String>) -> Self {
        RecipeError::Shape(message.into())
    }
}

/// Everything a recipe may look at.
#[derive(Debug, Clone)]
pub struct RecipeInput<'a> {
    pub directive: &'a RewriteDirective,
    /// Matched text in the current snapshot.
    pub matched: &'a str,
    /// Leading whitespace of the line the match starts on.
    pub indent: &'a str,
    /// Resolved subranges, present for block kinds.
    pub block: Option<BlockText<'a>>,
}

impl<'a> RecipeInput<'a> {
    fn template(&self) -> Result<&'a str, RecipeError> {
        self.directive
            .template()
            .ok_or_else(|| RecipeError::shape("directive carries no template"))
    }

    fn block(&self, recipe: BlockRecipe) -> Result<&BlockText<'a>, RecipeError> {
        self.block
            .as_ref()
            .ok_or(RecipeError::NoSubranges(recipe.as_str()))
    }

    /// Statement indentation: an `indent` subrange when given, else the line's.
    fn statement_indent(&self) -> &'a str {
        self.block
            .as_ref()
            .and_then(|block| block.get("indent"))
            .filter(|s| s.chars().all(|c| c == ' ' || c == '\t'))
            .unwrap_or(self.indent)
    }
}

/// A recipe's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// Text that replaces the matched text.
    pub text: String,
    /// The new text without markers or commented-out original.
    pub plain: String,
    /// Part of the matched text that `text` reproduces unchanged.
    pub embedded: Option<Embedded>,
}

/// A verbatim copy of `matched[matched_at..matched_at + len]` at char
/// `text_at` of the replacement. Offsets count chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Embedded {
    pub text_at: usize,
    pub matched_at: usize,
    pub len: usize,
}

impl Embedded {
    /// Char offset in the replacement of char `offset` of the matched text.
    pub fn locate(&self, offset: usize) -> Option<usize> {
        let rel = offset.checked_sub(self.matched_at)?;
        (rel < self.len).then_some(self.text_at + rel)
    }
}

/// Run the recipe of `input.directive`'s kind.
pub fn apply(input: &RecipeInput<'_>) -> Result<Replacement, RecipeError> {
    match input.directive.kind {
        RewriteKind::ExprWrap => expr::wrap(input.matched, input.template()?),
        RewriteKind::ExprWrapStripCall => expr::wrap_strip_call(input.matched, input.template()?),
        RewriteKind::LiteralReplace => expr::literal_replace(input.matched, input.template()?),
        RewriteKind::CommentAndAppend => {
            expr::comment_and_append(input.matched, input.template()?, input.indent)
        }
        RewriteKind::OdbcFunctionCall => odbc::function_call(input.matched),
        RewriteKind::OdbcLiteral => odbc::literal(input.matched),
        RewriteKind::BlockReplace(recipe) => {
            let block = input.block(recipe)?;
            let indent = input.statement_indent();
            let id = input.directive.id;
            match recipe {
                BlockRecipe::MergeToDml => merge::merge_to_dml(block, indent, id),
                BlockRecipe::SplitMultiActionAlter => alter::split_actions(block, indent),
                BlockRecipe::StringAggViaPivot => string_agg::string_agg_via_pivot(block),
                BlockRecipe::CommentAndAppendIndex => index::comment_and_append_index(block, indent),
            }
        }
    }
}

// ============================================================================
// Shared Building Blocks
// ============================================================================

/// `/*REWRITTEN*/<new>/*ORIGINAL: <old>*/`.
pub(crate) fn marked(new: &str, original: &str) -> String {
    format!("{}{}{}", REWRITTEN_MARKER, new, original_comment(original))
}

/// `/*ORIGINAL: <old>*/`, with the original made comment-safe.
pub(crate) fn original_comment(original: &str) -> String {
    format!("/*ORIGINAL: {}*/", comment_safe(original))
}

/// A statement-level replacement: the original as line comments, then the new
/// statements one per line at `indent`.
///
/// A match that ended with a line break keeps ending with one, so the text after
/// it stays on its own line.
pub(crate) fn assemble_block(matched: &str, indent: &str, statements: &[String]) -> String {
    let mut out = line_commented(matched);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    let body: Vec<String> = statements
        .iter()
        .map(|statement| format!("{}{}", indent, statement))
        .collect();
    out.push_str(&body.join("\n"));
    if matched.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Byte index of the `)` matching the `(` at byte `open`, skipping string
/// literals and bracketed identifiers.
pub(crate) fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, ch) in text[open..].char_indices() {
        let at = open + i;
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' => quote = Some('\''),
                '[' => quote = Some(']'),
                '"' => quote = Some('"'),
                '(' => depth += 1,
                ')' => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(at);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Strip one pair of enclosing parentheses from `text` (after trimming), if the
/// first `(` is closed by the final `)`.
pub(crate) fn strip_parens(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if !trimmed.starts_with('(') {
        return None;
    }
    let close = matching_paren(trimmed, 0)?;
    (close + 1 == trimmed.len()).then(|| &trimmed[1..close])
}

/// Split `text` at top-level commas (outside parentheses and literals).
pub(crate) fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut last = 0;
    for (i, ch) in text.char_indices() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' => quote = Some('\''),
                '[' => quote = Some(']'),
                '"' => quote = Some('"'),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    parts.push(&text[last..i]);
                    last = i + 1;
                }
                _ => {}
            },
        }
    }
    parts.push(&text[last..]);
    parts
}

// ============================================================================
// Tests
// ============================================================================
