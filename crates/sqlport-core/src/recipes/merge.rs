//! `MERGE` into a guarded sequence of `DELETE`/`UPDATE`/`INSERT` statements.
//!
//! Branches run in a fixed order: NOT MATCHED BY SOURCE, then MATCHED, then NOT
//! MATCHED [BY TARGET]. Within a category, a later branch skips the rows an
//! earlier branch's `AND` condition selected. When a MATCHED DELETE and an
//! INSERT coexist, the unmatched source rows are captured into a temp table
//! before any DML runs, so deleted target rows do not turn into inserts.
//!
//! Not reproduced: updates that change the join keys of rows a later branch
//! would match, and source column references in the OUTPUT clause of inserts.

use std::sync::LazyLock;

use regex::{NoExpand, Regex};

use super::{assemble_block, matching_paren, strip_parens, RecipeError, Replacement};
use crate::subrange::{indexed_name, BlockText};

static WHEN_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*WHEN\s+(NOT\s+MATCHED(?:\s+BY\s+(SOURCE|TARGET))?|MATCHED)\b(.*)$").unwrap()
});

static THEN_ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bTHEN\s+(UPDATE\s+SET\b|DELETE\b|INSERT\b)").unwrap());

static UPDATE_SET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^UPDATE\s+SET\s+(.+)$").unwrap());

static INSERT_REST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)^INSERT\b\s*(.*)$").unwrap());

static DEFAULT_VALUES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^DEFAULT\s+VALUES$").unwrap());

static VALUES_KEYWORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)^VALUES\b").unwrap());

static AND_KEYWORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)^AND\b").unwrap());

static ACTION_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\$action\b").unwrap());

static INSERTED_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bINSERTED\s*\.\s*(?:\[[^\]]*\]|\w+|\*)").unwrap());

static DELETED_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDELETED\s*\.\s*(?:\[[^\]]*\]|\w+|\*)").unwrap());

/// Which rows a WHEN clause applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Matched,
    NotMatchedByTarget,
    NotMatchedBySource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action<'a> {
    Update { set: &'a str },
    Delete,
    Insert { columns: Option<&'a str>, values: &'a str },
}

impl Action<'_> {
    fn literal(&self) -> &'static str {
        match self {
            Action::Update { .. } => "N'UPDATE'",
            Action::Delete => "N'DELETE'",
            Action::Insert { .. } => "N'INSERT'",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WhenClause<'a> {
    category: Category,
    condition: Option<&'a str>,
    action: Action<'a>,
}

fn parse_when(text: &str) -> Result<WhenClause<'_>, RecipeError> {
    let head = WHEN_HEAD
        .captures(text)
        .ok_or_else(|| RecipeError::shape(format!("not a WHEN clause: '{}'", text.trim())))?;
    let category = match (head.get(1), head.get(2)) {
        (_, Some(by)) if by.as_str().eq_ignore_ascii_case("SOURCE") => Category::NotMatchedBySource,
        (_, Some(_)) => Category::NotMatchedByTarget,
        (Some(m), None) if m.as_str().to_ascii_uppercase().starts_with("NOT") => {
            Category::NotMatchedByTarget
        }
        _ => Category::Matched,
    };

    let rest = head.get(3).map_or("", |m| m.as_str());
    let then = THEN_ACTION
        .captures(rest)
        .ok_or_else(|| RecipeError::shape(format!("WHEN clause without THEN action: '{}'", text.trim())))?;
    let (Some(then_all), Some(action_start)) = (then.get(0), then.get(1)) else {
        return Err(RecipeError::shape("WHEN clause without THEN action"));
    };

    let condition = rest[..then_all.start()].trim();
    let condition = if condition.is_empty() {
        None
    } else {
        let and = AND_KEYWORD
            .find(condition)
            .ok_or_else(|| RecipeError::shape(format!("expected AND before '{}'", condition)))?;
        Some(condition[and.end()..].trim())
    };

    let action_text = rest[action_start.start()..].trim().trim_end_matches(';').trim_end();
    let action = parse_action(action_text)?;

    match (category, &action) {
        (Category::NotMatchedByTarget, Action::Insert { .. }) => {}
        (Category::NotMatchedByTarget, _) => {
            return Err(RecipeError::shape("NOT MATCHED BY TARGET only allows INSERT"));
        }
        (_, Action::Insert { .. }) => {
            return Err(RecipeError::shape("INSERT is only allowed for NOT MATCHED BY TARGET"));
        }
        _ => {}
    }

    Ok(WhenClause {
        category,
        condition,
        action,
    })
}

fn parse_action(text: &str) -> Result<Action<'_>, RecipeError> {
    if let Some(caps) = UPDATE_SET.captures(text) {
        let set = caps.get(1).map_or("", |m| m.as_str()).trim();
        return Ok(Action::Update { set });
    }
    if text.eq_ignore_ascii_case("DELETE") {
        return Ok(Action::Delete);
    }
    let rest = INSERT_REST
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .ok_or_else(|| RecipeError::shape(format!("unknown MERGE action '{}'", text)))?;
    if DEFAULT_VALUES.is_match(rest) {
        return Err(RecipeError::Unsupported(
            "INSERT DEFAULT VALUES has no set-based equivalent".to_string(),
        ));
    }

    let (columns, after) = if rest.starts_with('(') {
        let close = matching_paren(rest, 0)
            .ok_or_else(|| RecipeError::shape("unbalanced INSERT column list"))?;
        (Some(rest[1..close].trim()), rest[close + 1..].trim_start())
    } else {
        (None, rest)
    };
    let keyword = VALUES_KEYWORD
        .find(after)
        .ok_or_else(|| RecipeError::shape(format!("expected VALUES in '{}'", text)))?;
    let values = strip_parens(&after[keyword.end()..])
        .map(str::trim)
        .ok_or_else(|| RecipeError::shape("INSERT VALUES list is not parenthesized"))?;
    Ok(Action::Insert { columns, values })
}

/// Names and table sources of one MERGE.
struct MergeParts<'a> {
    id: u32,
    target: &'a str,
    /// Reference to the target rows: its alias, else its name.
    target_ref: &'a str,
    /// Target as it appears in a FROM clause.
    target_decl: String,
    source: &'a str,
    source_alias: Option<&'a str>,
    /// `alias.column` references to the source, when OUTPUT needs nulling them.
    source_refs: Option<Regex>,
    search: &'a str,
    output: Option<&'a str>,
}

impl MergeParts<'_> {
    fn not_matched_by_source(&self) -> String {
        format!("NOT EXISTS (SELECT 1 FROM {} WHERE {})", self.source, self.search)
    }

    fn not_matched_by_target(&self) -> String {
        format!("NOT EXISTS (SELECT 1 FROM {} WHERE {})", self.target_decl, self.search)
    }

    fn pending_table(&self) -> String {
        format!("#merge_{}_pending", self.id)
    }

    /// The OUTPUT clause as it applies to one branch, with a leading space.
    fn output_for(&self, clause: &WhenClause<'_>) -> String {
        let Some(output) = self.output else {
            return String::new();
        };
        let mut text = ACTION_REF
            .replace_all(output, NoExpand(clause.action.literal()))
            .into_owned();
        match clause.action {
            Action::Delete => {
                text = INSERTED_REF.replace_all(&text, NoExpand("NULL")).into_owned();
            }
            Action::Insert { .. } => {
                text = DELETED_REF.replace_all(&text, NoExpand("NULL")).into_owned();
            }
            Action::Update { .. } => {}
        }
        if clause.category == Category::NotMatchedBySource {
            // Unmatched target rows have no source row.
            if let Some(source_refs) = &self.source_refs {
                text = source_refs.replace_all(&text, "${1}NULL").into_owned();
            }
        }
        format!(" {}", text)
    }
}

/// Pattern for `alias.column` references to the merge source.
fn source_ref_pattern(alias: &str) -> Result<Regex, RecipeError> {
    Regex::new(&format!(
        r"(?i)(^|[^\w.@#$]){}\s*\.\s*(?:\[[^\]]*\]|\w+|\*)",
        regex::escape(alias)
    ))
    .map_err(|e| RecipeError::shape(format!("source alias '{}': {}", alias, e)))
}

fn required<'a>(block: &BlockText<'a>, name: &str) -> Result<&'a str, RecipeError> {
    block
        .non_blank(name)
        .ok_or_else(|| RecipeError::MissingSubrange(name.to_string()))
}

fn where_clause(keyword: &str, parts: &[String]) -> String {
    if parts.is_empty() {
        String::new()
    } else {
        format!(" {} {}", keyword, parts.join(" AND "))
    }
}

fn excluded(condition: &str) -> String {
    format!("(CASE WHEN {} THEN 1 ELSE 0 END) = 0", condition)
}

pub(super) fn merge_to_dml(
    block: &BlockText<'_>,
    indent: &str,
    id: u32,
) -> Result<Replacement, RecipeError> {
    let target = required(block, "merge_target")?;
    let target_alias = block.non_blank("merge_target_alias");
    let source_alias = block.non_blank("merge_source_alias");
    let output = block.non_blank("output_clause");
    let source_refs = match (source_alias, output) {
        (Some(alias), Some(_)) => Some(source_ref_pattern(alias)?),
        _ => None,
    };
    let parts = MergeParts {
        id,
        target,
        target_ref: target_alias.unwrap_or(target),
        target_decl: match target_alias {
            Some(alias) => format!("{} AS {}", target, alias),
            None => target.to_string(),
        },
        source: required(block, "merge_source")?,
        source_alias,
        source_refs,
        search: required(block, "search_condition")?,
        output,
    };

    let clause_count = block.count("when_clause");
    if clause_count == 0 {
        return Err(RecipeError::MissingSubrange(indexed_name("when_clause", 0)));
    }
    let clauses = (0..clause_count)
        .map(|i| {
            let name = indexed_name("when_clause", i);
            block
                .get(&name)
                .ok_or(RecipeError::MissingSubrange(name))
                .and_then(parse_when)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let has_matched_delete = clauses
        .iter()
        .any(|c| c.category == Category::Matched && c.action == Action::Delete);
    let has_insert = clauses.iter().any(|c| c.category == Category::NotMatchedByTarget);
    let capture_pending = has_matched_delete && has_insert;
    if capture_pending && parts.source_alias.is_none() {
        return Err(RecipeError::MissingSubrange("merge_source_alias".to_string()));
    }

    let label = format!("merge_{}", id);
    let err = format!("@{}_err", label);
    let rc = format!("@{}_rc", label);
    let rows = format!("@{}_rows", label);
    let guard = |statements: &mut Vec<String>, accumulate: bool| {
        statements.push(format!("SELECT {} = @@ERROR, {} = @@ROWCOUNT;", err, rc));
        statements.push(format!("IF {} <> 0 GOTO {}_rollback;", err, label));
        if accumulate {
            statements.push(format!("SET {} = {} + {};", rows, rows, rc));
        }
    };

    let mut statements = vec![
        format!("DECLARE {} INT, {} INT, {} INT;", err, rc, rows),
        format!("SET {} = 0;", rows),
        "BEGIN TRANSACTION;".to_string(),
        format!("SAVE TRANSACTION {};", label),
    ];

    if capture_pending {
        let alias = parts.source_alias.unwrap_or_default();
        statements.push(format!(
            "SELECT {}.* INTO {} FROM {} WHERE {};",
            alias,
            parts.pending_table(),
            parts.source,
            parts.not_matched_by_target()
        ));
        guard(&mut statements, false);
    }

    for category in [
        Category::NotMatchedBySource,
        Category::Matched,
        Category::NotMatchedByTarget,
    ] {
        let mut earlier: Vec<&str> = Vec::new();
        for clause in clauses.iter().filter(|c| c.category == category) {
            let mut filters: Vec<String> = Vec::new();
            if category == Category::NotMatchedBySource {
                filters.push(parts.not_matched_by_source());
            }
            if category == Category::NotMatchedByTarget && !capture_pending {
                filters.push(parts.not_matched_by_target());
            }
            if let Some(condition) = clause.condition {
                filters.push(format!("({})", condition));
            }
            filters.extend(earlier.iter().map(|c| excluded(c)));

            statements.push(branch_statement(&parts, clause, &filters, capture_pending));
            guard(&mut statements, true);

            if let Some(condition) = clause.condition {
                earlier.push(condition);
            }
        }
    }

    statements.push("COMMIT TRANSACTION;".to_string());
    statements.push(format!("GOTO {}_done;", label));
    statements.push(format!("{}_rollback:", label));
    statements.push(format!("ROLLBACK TRANSACTION {};", label));
    statements.push("COMMIT TRANSACTION;".to_string());
    statements.push(format!("{}_done:", label));
    if capture_pending {
        let table = parts.pending_table();
        statements.push(format!(
            "IF OBJECT_ID('tempdb..{}') IS NOT NULL DROP TABLE {};",
            table, table
        ));
    }

    Ok(Replacement {
        text: assemble_block(block.text(), indent, &statements),
        plain: statements.join(" "),
        embedded: None,
    })
}

fn branch_statement(
    parts: &MergeParts<'_>,
    clause: &WhenClause<'_>,
    filters: &[String],
    from_pending: bool,
) -> String {
    let output = parts.output_for(clause);
    let joined = clause.category == Category::Matched;
    let from = if joined {
        format!(
            "FROM {} INNER JOIN {} ON {}",
            parts.target_decl, parts.source, parts.search
        )
    } else {
        format!("FROM {}", parts.target_decl)
    };
    match &clause.action {
        Action::Update { set } => format!(
            "UPDATE {} SET {}{} {}{};",
            parts.target_ref,
            set,
            output,
            from,
            where_clause("WHERE", filters)
        ),
        Action::Delete => format!(
            "DELETE {}{} {}{};",
            parts.target_ref,
            output,
            from,
            where_clause("WHERE", filters)
        ),
        Action::Insert { columns, values } => {
            let columns = columns.map(|c| format!(" ({})", c)).unwrap_or_default();
            let source = if from_pending {
                format!(
                    "{} AS {}",
                    parts.pending_table(),
                    parts.source_alias.unwrap_or_default()
                )
            } else {
                parts.source.to_string()
            };
            format!(
                "INSERT INTO {}{}{} SELECT {} FROM {}{};",
                parts.target,
                columns,
                output,
                values,
                source,
                where_clause("WHERE", filters)
            )
        }
    }
}
