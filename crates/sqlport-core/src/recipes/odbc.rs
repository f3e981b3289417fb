//! ODBC escape sequences: `{fn ...}` scalar calls and `{d ...}`-style literals.
//!
//! The brace delimiters are turned into comments in place rather than removed,
//! so everything between them keeps its line and column.

use std::sync::LazyLock;

use regex::Regex;

use super::{matching_paren, split_top_level, RecipeError, Replacement};
use crate::text::comment_safe;

static FN_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^(\{\s*fn\s+)([A-Za-z_][A-Za-z0-9_]*)(.*?)(\s*\})$").unwrap()
});

static TYPED_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^(\{\s*(d|ts|t|guid)\s+)('(?:[^']|'')*')(\s*\})$").unwrap()
});

static OUTER_JOIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^(\{\s*oj\s+)(.*?)(\s*\})$").unwrap());

/// Target-dialect name of an ODBC scalar function, if it differs.
fn scalar_function(name: &str) -> Option<&'static str> {
    let target = match name.to_ascii_uppercase().as_str() {
        "UCASE" => "UPPER",
        "LCASE" => "LOWER",
        "LENGTH" => "LEN",
        "IFNULL" => "ISNULL",
        "NOW" | "CURDATE" | "CURRENT_DATE" => "GETDATE",
        "DAYOFMONTH" => "DAY",
        "LOCATE" => "CHARINDEX",
        "DATABASE" => "DB_NAME",
        "USER" => "USER_NAME",
        "TRUNCATE" => "ROUND",
        _ => return None,
    };
    Some(target)
}

/// Target type of an ODBC literal prefix.
fn literal_type(prefix: &str) -> Option<&'static str> {
    let target = match prefix.to_ascii_lowercase().as_str() {
        "d" => "DATE",
        "t" => "TIME",
        "ts" => "DATETIME",
        "guid" => "UNIQUEIDENTIFIER",
        _ => return None,
    };
    Some(target)
}

fn commented(delimiter: &str) -> String {
    format!("/*{}*/", comment_safe(delimiter))
}

/// `{fn NAME(args)}` -> `/*{fn */TARGET(args)/*}*/`.
pub(super) fn function_call(matched: &str) -> Result<Replacement, RecipeError> {
    let caps = FN_CALL
        .captures(matched)
        .ok_or_else(|| RecipeError::shape(format!("'{}' is not an ODBC function call", matched)))?;
    let (open, name, rest, close) = (&caps[1], &caps[2], &caps[3], &caps[4]);

    let target = scalar_function(name).unwrap_or(name);
    let rest = if name.eq_ignore_ascii_case("TRUNCATE") {
        // ROUND truncates when its third argument is non-zero.
        let args_open = rest
            .find('(')
            .ok_or_else(|| RecipeError::shape("TRUNCATE without arguments"))?;
        let args_close = matching_paren(rest, args_open)
            .ok_or_else(|| RecipeError::shape("unbalanced parentheses in TRUNCATE"))?;
        let args = split_top_level(&rest[args_open + 1..args_close]);
        if args.len() != 2 {
            return Err(RecipeError::shape(format!(
                "TRUNCATE takes 2 arguments, got {}",
                args.len()
            )));
        }
        format!("{}, 1{}", &rest[..args_close], &rest[args_close..])
    } else {
        rest.to_string()
    };

    let plain = format!("{}{}", target, rest);
    Ok(Replacement {
        text: format!("{}{}{}", commented(open), plain, commented(close)),
        plain,
        embedded: None,
    })
}

/// `{d 'v'}` -> `/*{d */CAST('v' AS DATE)/*}*/`; `{oj ...}` keeps its content.
pub(super) fn literal(matched: &str) -> Result<Replacement, RecipeError> {
    if let Some(caps) = TYPED_LITERAL.captures(matched) {
        let (open, prefix, value, close) = (&caps[1], &caps[2], &caps[3], &caps[4]);
        let ty = literal_type(prefix)
            .ok_or_else(|| RecipeError::shape(format!("unknown ODBC literal prefix '{}'", prefix)))?;
        let plain = format!("CAST({} AS {})", value, ty);
        return Ok(Replacement {
            text: format!("{}{}{}", commented(open), plain, commented(close)),
            plain,
            embedded: None,
        });
    }
    if let Some(caps) = OUTER_JOIN.captures(matched) {
        let (open, body, close) = (&caps[1], &caps[2], &caps[3]);
        return Ok(Replacement {
            text: format!("{}{}{}", commented(open), body, commented(close)),
            plain: body.to_string(),
            embedded: None,
        });
    }
    Err(RecipeError::shape(format!(
        "'{}' is not an ODBC literal or outer join escape",
        matched
    )))
}
