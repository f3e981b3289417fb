//! Ordered string concatenation through a `FOR XML PATH` subquery into `STRING_AGG`.

use super::{marked, RecipeError, Replacement};
use crate::subrange::BlockText;

fn required<'a>(block: &BlockText<'a>, name: &str) -> Result<&'a str, RecipeError> {
    block
        .non_blank(name)
        .ok_or_else(|| RecipeError::MissingSubrange(name.to_string()))
}

pub(super) fn string_agg_via_pivot(block: &BlockText<'_>) -> Result<Replacement, RecipeError> {
    let expr = required(block, "agg_expr")?;
    let separator = required(block, "separator")?;
    let from_clause = required(block, "from_clause")?;
    if !from_clause
        .get(..4)
        .is_some_and(|head| head.eq_ignore_ascii_case("FROM"))
    {
        return Err(RecipeError::shape(format!(
            "from_clause must start with FROM: '{}'",
            from_clause
        )));
    }
    let order_by = block.non_blank("order_by").unwrap_or("(SELECT NULL)");

    let new = format!(
        "(SELECT STRING_AGG(agg_src.agg_value, {sep}) WITHIN GROUP (ORDER BY agg_src.agg_seq) \
         FROM (SELECT CONVERT(NVARCHAR(MAX), {expr}) AS agg_value, \
         ROW_NUMBER() OVER (ORDER BY {order_by}) AS agg_seq {from_clause}) AS agg_src)",
        sep = separator,
        expr = expr,
        order_by = order_by,
        from_clause = from_clause,
    );
    Ok(Replacement {
        text: marked(&new, block.text()),
        plain: new,
        embedded: None,
    })
}
