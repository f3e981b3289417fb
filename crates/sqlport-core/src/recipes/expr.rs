//! Template-driven expression rewrites.

use std::sync::LazyLock;

use regex::Regex;

use super::{marked, matching_paren, original_comment, Embedded, RecipeError, Replacement, REWRITTEN_MARKER};
use crate::directive::PLACEHOLDER;
use crate::text::comment_safe;

/// `name (` at the start of a call, allowing qualified and bracketed names.
static CALL_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\[[^\]]+\]|[A-Za-z_@#][\w@#$]*)(?:\s*\.\s*(?:\[[^\]]+\]|[A-Za-z_][\w@#$]*))*\s*\(")
        .unwrap()
});

/// Char offset of the placeholder in `template`.
fn placeholder_at(template: &str) -> Option<usize> {
    template
        .find(PLACEHOLDER)
        .map(|byte| template[..byte].chars().count())
}

/// `part` (a slice of `matched` starting at char `matched_at`) filled into the
/// template, which itself starts at char `prefix` of the replacement.
fn filled(prefix: usize, template: &str, matched_at: usize, part: &str) -> Option<Embedded> {
    placeholder_at(template).map(|at| Embedded {
        text_at: prefix + at,
        matched_at,
        len: part.chars().count(),
    })
}

/// Substitute the matched text into the template.
pub(super) fn wrap(matched: &str, template: &str) -> Result<Replacement, RecipeError> {
    let new = template.replacen(PLACEHOLDER, matched, 1);
    Ok(Replacement {
        text: marked(&new, matched),
        plain: new,
        embedded: filled(REWRITTEN_MARKER.chars().count(), template, 0, matched),
    })
}

/// Substitute the arguments of the matched `name(args)` call into the template.
pub(super) fn wrap_strip_call(matched: &str, template: &str) -> Result<Replacement, RecipeError> {
    let (args_byte, args) = call_arguments(matched)?;
    let new = template.replacen(PLACEHOLDER, args, 1);
    let args_at = matched[..args_byte].chars().count();
    Ok(Replacement {
        text: marked(&new, matched),
        plain: new,
        embedded: filled(REWRITTEN_MARKER.chars().count(), template, args_at, args),
    })
}

/// The template text, with the matched text kept as a trailing comment.
pub(super) fn literal_replace(matched: &str, template: &str) -> Result<Replacement, RecipeError> {
    Ok(Replacement {
        text: format!("{}{}", template, original_comment(matched)),
        plain: template.to_string(),
        embedded: None,
    })
}

/// Comment out the matched text and follow it with the filled template on a new
/// line at the same indentation.
pub(super) fn comment_and_append(
    matched: &str,
    template: &str,
    indent: &str,
) -> Result<Replacement, RecipeError> {
    let new = template.replacen(PLACEHOLDER, matched, 1);
    let commented = format!("/*{}*/\n{}", comment_safe(matched), indent);
    Ok(Replacement {
        embedded: filled(commented.chars().count(), template, 0, matched),
        text: format!("{}{}", commented, new),
        plain: new,
    })
}

/// Byte offset and text of the arguments of `name ( args )`; the closing paren
/// must end the text.
fn call_arguments(matched: &str) -> Result<(usize, &str), RecipeError> {
    let head = CALL_HEAD
        .find(matched)
        .ok_or_else(|| RecipeError::shape(format!("'{}' is not a function call", matched.trim())))?;
    let open = head.end() - 1;
    let close = matching_paren(matched, open)
        .ok_or_else(|| RecipeError::shape("unbalanced parentheses in call"))?;
    if !matched[close + 1..].trim().is_empty() {
        return Err(RecipeError::shape(format!(
            "text after the call's closing parenthesis: '{}'",
            matched[close + 1..].trim()
        )));
    }
    Ok((open + 1, &matched[open + 1..close]))
}
