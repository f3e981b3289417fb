//! One statement with several comma-separated actions into one statement each.

use super::{assemble_block, RecipeError, Replacement};
use crate::subrange::BlockText;

pub(super) fn split_actions(block: &BlockText<'_>, indent: &str) -> Result<Replacement, RecipeError> {
    let text = block.text();
    let actions = block.indexed_ranges("action");
    if actions.len() < 2 {
        return Err(RecipeError::shape(format!(
            "expected at least two action subranges, found {}",
            actions.len()
        )));
    }

    let prefix = text[..actions[0].start].trim_end();
    if prefix.is_empty() {
        return Err(RecipeError::shape("no statement text before the first action"));
    }

    let statements = actions
        .iter()
        .map(|range| {
            let action = text[range.clone()].trim();
            if action.is_empty() {
                Err(RecipeError::shape("blank action subrange"))
            } else {
                Ok(format!("{} {};", prefix, action))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Replacement {
        text: assemble_block(text, indent, &statements),
        plain: statements.join(" "),
        embedded: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subrange::indexed_name;

    fn block<'a>(text: &'a str, actions: &[&str]) -> BlockText<'a> {
        let ranges = actions.iter().enumerate().map(|(i, action)| {
            let start = text.find(action).unwrap();
            (indexed_name("action", i), start..start + action.len())
        });
        BlockText::from_byte_ranges(text, ranges)
    }

    #[test]
    fn each_action_gets_its_own_statement() {
        let text = "ALTER TABLE dbo.t ADD a INT NULL, b VARCHAR(10) NULL;";
        let r = split_actions(&block(text, &["a INT NULL", "b VARCHAR(10) NULL"]), "  ").unwrap();
        assert_eq!(
            r.text,
            "-- ALTER TABLE dbo.t ADD a INT NULL, b VARCHAR(10) NULL;\n  ALTER TABLE dbo.t ADD a INT NULL;\n  ALTER TABLE dbo.t ADD b VARCHAR(10) NULL;"
        );
        assert_eq!(
            r.plain,
            "ALTER TABLE dbo.t ADD a INT NULL; ALTER TABLE dbo.t ADD b VARCHAR(10) NULL;"
        );
    }

    #[test]
    fn multi_line_statement_keeps_line_count() {
        let text = "ALTER TABLE t\n  DROP CONSTRAINT c1,\n  CONSTRAINT c2";
        let r = split_actions(&block(text, &["CONSTRAINT c1", "CONSTRAINT c2"]), "").unwrap();
        assert!(r.text.starts_with("-- ALTER TABLE t\n--   DROP CONSTRAINT c1,\n--   CONSTRAINT c2\n"));
        assert!(r.text.ends_with("ALTER TABLE t\n  DROP CONSTRAINT c2;"));
    }

    #[test]
    fn single_action_is_rejected() {
        let text = "ALTER TABLE t ADD a INT";
        assert!(split_actions(&block(text, &["a INT"]), "").is_err());
    }
}
