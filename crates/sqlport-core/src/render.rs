//! Hyperlink-ready HTML rendering of a rewritten file.
//!
//! Every output line gets an `L<n>` anchor, numbered the same way the change
//! log and [`crate::ledger::FileLineMap`] number final lines.

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::changelog::RewriteLogEntry;
use crate::text::{line_content, split_lines};

/// Anchor id of a final-file line.
pub fn anchor_id(line: u32) -> String {
    format!("L{}", line)
}

/// Render `text` as an HTML page with one anchor per line, followed by a table
/// of the change log linking each entry to its first line.
pub fn render_html(title: &str, text: &str, entries: &[RewriteLogEntry]) -> String {
    let mut out = String::with_capacity(text.len() * 2 + 512);
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str(&format!("<title>{}</title>\n", encode_text(title)));
    out.push_str("</head>\n<body>\n<pre class=\"sql\">\n");
    for (i, line) in split_lines(text).into_iter().enumerate() {
        out.push_str(&format!(
            "<a id=\"{}\"></a>{}\n",
            anchor_id(i as u32 + 1),
            encode_text(line_content(line))
        ));
    }
    out.push_str("</pre>\n");

    if !entries.is_empty() {
        out.push_str("<table class=\"rewrite-log\">\n");
        out.push_str("<tr><th>#</th><th>Lines</th><th>Kind</th><th>Summary</th></tr>\n");
        for entry in entries {
            out.push_str(&format!(
                "<tr><td>{}</td><td><a href=\"#{}\">{}-{}</a></td><td>{}</td><td>{}</td></tr>\n",
                entry.seq,
                encode_double_quoted_attribute(&anchor_id(entry.first_line)),
                entry.first_line,
                entry.last_line,
                encode_text(&entry.kind),
                encode_text(&entry.summary)
            ));
        }
        out.push_str("</table>\n");
    }
    out.push_str("</body>\n</html>\n");
    out
}

/// Text of each anchored line of a rendering, in line order.
///
/// Inverse of the `<pre>` part of [`render_html`], with entities left encoded.
pub fn anchored_lines(html: &str) -> Vec<(u32, &str)> {
    html.lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("<a id=\"L")?;
            let (number, rest) = rest.split_once('"')?;
            let content = rest.strip_prefix("></a>")?;
            Some((number.parse().ok()?, content))
        })
        .collect()
}
