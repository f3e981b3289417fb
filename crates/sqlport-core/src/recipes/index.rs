//! Inline index clauses into standalone `CREATE INDEX` statements.
//!
//! Each inline clause is commented out where it stands; the equivalent index
//! statements follow the enclosing statement, one per line.

use super::{RecipeError, Replacement};
use crate::subrange::{indexed_name, BlockText};
use crate::text::comment_safe;

/// One inline index, read from the `*[i]` subranges.
#[derive(Debug)]
struct InlineIndex<'a> {
    name: &'a str,
    columns: &'a str,
    unique: bool,
    clustering: Option<&'a str>,
    filter: Option<&'a str>,
    options: Option<&'a str>,
}

impl InlineIndex<'_> {
    fn create_statement(&self, table: &str) -> String {
        let mut out = String::from("CREATE ");
        if self.unique {
            out.push_str("UNIQUE ");
        }
        if let Some(clustering) = self.clustering {
            out.push_str(&clustering.to_ascii_uppercase());
            out.push(' ');
        }
        out.push_str(&format!("INDEX {} ON {} ({})", self.name, table, self.columns));
        if let Some(filter) = self.filter {
            out.push_str(&format!(" WHERE {}", filter));
        }
        if let Some(options) = self.options {
            out.push_str(&format!(" WITH ({})", options));
        }
        out.push(';');
        out
    }
}

fn read_index<'a>(block: &BlockText<'a>, i: usize) -> Result<InlineIndex<'a>, RecipeError> {
    let name_key = indexed_name("index_name", i);
    let name = block
        .non_blank(&name_key)
        .ok_or(RecipeError::MissingSubrange(name_key))?;
    let columns = block
        .non_blank(&indexed_name("column_list", i))
        .or_else(|| block.non_blank(&indexed_name("column_name", i)))
        .ok_or_else(|| RecipeError::MissingSubrange(indexed_name("column_list", i)))?;
    // A column list may arrive with its parentheses.
    let columns = super::strip_parens(columns).map(str::trim).unwrap_or(columns);
    Ok(InlineIndex {
        name,
        columns,
        unique: block.non_blank(&indexed_name("unique", i)).is_some(),
        clustering: block.non_blank(&indexed_name("clustering", i)),
        filter: block.non_blank(&indexed_name("filter", i)),
        options: block.non_blank(&indexed_name("options", i)),
    })
}

pub(super) fn comment_and_append_index(
    block: &BlockText<'_>,
    indent: &str,
) -> Result<Replacement, RecipeError> {
    let text = block.text();
    let clauses = block.indexed_ranges("index_clause");
    if clauses.is_empty() {
        return Err(RecipeError::MissingSubrange(indexed_name("index_clause", 0)));
    }
    let table = block
        .non_blank("table_name")
        .ok_or_else(|| RecipeError::MissingSubrange("table_name".to_string()))?;
    let indexes = (0..clauses.len())
        .map(|i| read_index(block, i))
        .collect::<Result<Vec<_>, _>>()?;

    let mut ordered = clauses.clone();
    ordered.sort_by_key(|range| range.start);
    let mut out = String::with_capacity(text.len() * 2);
    let mut cursor = 0;
    for range in &ordered {
        if range.start < cursor {
            return Err(RecipeError::shape("index clauses overlap"));
        }
        out.push_str(&text[cursor..range.start]);
        out.push_str("/*");
        out.push_str(&comment_safe(&text[range.clone()]));
        out.push_str("*/");
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);

    let statements: Vec<String> = indexes.iter().map(|index| index.create_statement(table)).collect();
    let ends_with_newline = out.ends_with('\n');
    if !ends_with_newline {
        out.push('\n');
    }
    let body: Vec<String> = statements.iter().map(|s| format!("{}{}", indent, s)).collect();
    out.push_str(&body.join("\n"));
    if ends_with_newline {
        out.push('\n');
    }

    Ok(Replacement {
        text: out,
        plain: statements.join(" "),
        embedded: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_of(text: &str, needle: &str) -> std::ops::Range<usize> {
        let start = text.find(needle).unwrap();
        start..start + needle.len()
    }

    #[test]
    fn table_level_index_is_commented_and_recreated() {
        let text = "CREATE TABLE dbo.t (\n    id INT NOT NULL,\n    name NVARCHAR(50),\n    INDEX ix_name NONCLUSTERED (name) WHERE name IS NOT NULL\n);";
        let clause = ",\n    INDEX ix_name NONCLUSTERED (name) WHERE name IS NOT NULL";
        let block = BlockText::from_byte_ranges(
            text,
            [
                (indexed_name("index_clause", 0), range_of(text, clause)),
                (indexed_name("index_name", 0), range_of(text, "ix_name")),
                ("table_name".to_string(), range_of(text, "dbo.t")),
                (indexed_name("column_list", 0), range_of(text, "(name)")),
                (indexed_name("clustering", 0), range_of(text, "NONCLUSTERED")),
                (indexed_name("filter", 0), range_of(text, "name IS NOT NULL")),
            ],
        );
        let r = comment_and_append_index(&block, "").unwrap();
        assert_eq!(
            r.text,
            "CREATE TABLE dbo.t (\n    id INT NOT NULL,\n    name NVARCHAR(50)/*,\n    INDEX ix_name NONCLUSTERED (name) WHERE name IS NOT NULL*/\n);\n\
             CREATE NONCLUSTERED INDEX ix_name ON dbo.t (name) WHERE name IS NOT NULL;"
        );
    }

    #[test]
    fn column_level_index_uses_column_name_and_options() {
        let text = "CREATE TABLE t (code INT INDEX ix_code UNIQUE WITH (FILLFACTOR = 80))\n";
        let block = BlockText::from_byte_ranges(
            text,
            [
                (indexed_name("index_clause", 0), range_of(text, " INDEX ix_code UNIQUE WITH (FILLFACTOR = 80)")),
                (indexed_name("index_name", 0), range_of(text, "ix_code")),
                ("table_name".to_string(), range_of(text, "t (").start..range_of(text, "t (").start + 1),
                (indexed_name("column_name", 0), range_of(text, "code")),
                (indexed_name("unique", 0), range_of(text, "UNIQUE")),
                (indexed_name("options", 0), range_of(text, "FILLFACTOR = 80")),
            ],
        );
        let r = comment_and_append_index(&block, "  ").unwrap();
        assert_eq!(
            r.text,
            "CREATE TABLE t (code INT/* INDEX ix_code UNIQUE WITH (FILLFACTOR = 80)*/)\n  CREATE UNIQUE INDEX ix_code ON t (code) WITH (FILLFACTOR = 80);\n"
        );
        assert_eq!(r.plain, "CREATE UNIQUE INDEX ix_code ON t (code) WITH (FILLFACTOR = 80);");
    }

    #[test]
    fn missing_columns_are_rejected() {
        let text = "CREATE TABLE t (a INT, INDEX ix (a))";
        let block = BlockText::from_byte_ranges(
            text,
            [
                (indexed_name("index_clause", 0), range_of(text, ", INDEX ix (a)")),
                (indexed_name("index_name", 0), range_of(text, "ix")),
                ("table_name".to_string(), 13..14),
            ],
        );
        assert_eq!(
            comment_and_append_index(&block, ""),
            Err(RecipeError::MissingSubrange("column_list[0]".to_string()))
        );
    }
}
