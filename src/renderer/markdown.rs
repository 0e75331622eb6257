//! Resolved HTML → Markdown.
//!
//! Walks the `scraper` tree once. Block elements become Markdown blocks
//! separated by blank lines; inline elements are flattened into their
//! block's text. The output then goes through [`super::postprocess`].

use super::postprocess::clean_markdown;
use crate::config::PageSeparator;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("th, td").unwrap());
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());

#[derive(Debug, Clone, PartialEq)]
enum MdBlock {
    Paragraph { text: String, continues: bool },
    /// Page separator; held back while a paragraph continues across it.
    Separator(String),
    Other(String),
}

/// Convert resolved HTML into cleaned Markdown.
pub fn to_markdown(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut blocks = Vec::new();
    collect_blocks(fragment.root_element(), &mut blocks);
    clean_markdown(&join_blocks(blocks))
}

/// Convert per-page resolved HTML into cleaned Markdown, with `separator`
/// between pages.
pub fn pages_to_markdown(pages: &[String], separator: &PageSeparator) -> String {
    let mut blocks = Vec::new();
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            if let Some(text) = separator.render_markdown(i + 1) {
                blocks.push(MdBlock::Separator(text));
            }
        }
        let fragment = Html::parse_fragment(page);
        collect_blocks(fragment.root_element(), &mut blocks);
    }
    clean_markdown(&join_blocks(blocks))
}

fn push_block(out: &mut String, text: &str) {
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(text);
}

fn join_blocks(blocks: Vec<MdBlock>) -> String {
    let mut out = String::new();
    let mut pending_continuation = false;
    let mut held: Vec<String> = Vec::new();
    for block in blocks {
        match block {
            MdBlock::Paragraph { text, continues } => {
                if pending_continuation {
                    let trimmed_len = out.trim_end().len();
                    out.truncate(trimmed_len);
                    if ends_with_word_hyphen(&out) {
                        out.pop();
                    } else {
                        out.push(' ');
                    }
                    out.push_str(&text);
                } else {
                    push_block(&mut out, &text);
                }
                pending_continuation = continues;
                if !continues {
                    for sep in held.drain(..) {
                        push_block(&mut out, &sep);
                    }
                }
            }
            MdBlock::Separator(text) if pending_continuation => held.push(text),
            MdBlock::Separator(text) | MdBlock::Other(text) => {
                for sep in held.drain(..) {
                    push_block(&mut out, &sep);
                }
                push_block(&mut out, &text);
                pending_continuation = false;
            }
        }
    }
    for sep in held {
        push_block(&mut out, &sep);
    }
    out
}

fn ends_with_word_hyphen(text: &str) -> bool {
    let mut chars = text.chars().rev();
    matches!(
        (chars.next(), chars.next()),
        (Some('-'), Some(c)) if c.is_alphanumeric()
    )
}

fn flush(pending: &mut String, blocks: &mut Vec<MdBlock>) {
    let text = tidy(pending);
    if !text.is_empty() {
        blocks.push(MdBlock::Paragraph { text, continues: false });
    }
    pending.clear();
}

/// Collapse runs of spaces and trim each line.
fn tidy(text: &str) -> String {
    MULTI_SPACE
        .replace_all(text, " ")
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn collect_blocks(parent: ElementRef, blocks: &mut Vec<MdBlock>) {
    let mut pending = String::new();
    for child in parent.children() {
        match child.value() {
            Node::Text(text) => pending.push_str(&collapse_ws(text)),
            Node::Comment(comment) => {
                flush(&mut pending, blocks);
                blocks.push(MdBlock::Other(format!("<!--{}-->", &**comment)));
            }
            Node::Element(_) => {
                let Some(el) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = el.value().name();
                match name {
                    "p" => {
                        flush(&mut pending, blocks);
                        let text = tidy(&inline(el, false));
                        if !text.is_empty() {
                            let continues = el
                                .value()
                                .classes()
                                .any(|c| c == "has-continuation");
                            blocks.push(MdBlock::Paragraph { text, continues });
                        }
                    }
                    "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                        flush(&mut pending, blocks);
                        let level = name[1..].parse::<usize>().unwrap_or(2);
                        let text = tidy(&inline(el, false)).replace('\n', " ");
                        if !text.is_empty() {
                            blocks.push(MdBlock::Other(format!("{} {}", "#".repeat(level), text)));
                        }
                    }
                    "ul" | "ol" => {
                        flush(&mut pending, blocks);
                        let list = render_list(el, 0);
                        if !list.is_empty() {
                            blocks.push(MdBlock::Other(list));
                        }
                    }
                    "li" => {
                        flush(&mut pending, blocks);
                        blocks.push(MdBlock::Other(format!("- {}", tidy(&inline(el, true)))));
                    }
                    "table" => {
                        flush(&mut pending, blocks);
                        blocks.push(MdBlock::Other(render_table(el)));
                    }
                    "pre" => {
                        flush(&mut pending, blocks);
                        let code: String = el.text().collect();
                        blocks.push(MdBlock::Other(format!("```\n{}\n```", code.trim_end())));
                    }
                    "blockquote" => {
                        flush(&mut pending, blocks);
                        let mut inner = Vec::new();
                        collect_blocks(el, &mut inner);
                        let body = join_blocks(inner);
                        let quoted = body
                            .lines()
                            .map(|l| if l.is_empty() { ">".to_string() } else { format!("> {l}") })
                            .collect::<Vec<_>>()
                            .join("\n");
                        if !quoted.is_empty() {
                            blocks.push(MdBlock::Other(quoted));
                        }
                    }
                    "math" if el.value().attr("display") == Some("block") => {
                        flush(&mut pending, blocks);
                        let latex: String = el.text().collect();
                        blocks.push(MdBlock::Other(format!("$$\n{}\n$$", latex.trim())));
                    }
                    "img" => {
                        flush(&mut pending, blocks);
                        blocks.push(MdBlock::Other(image(el)));
                    }
                    "hr" => {
                        flush(&mut pending, blocks);
                        blocks.push(MdBlock::Other("---".to_string()));
                    }
                    "b" | "strong" | "i" | "em" | "a" | "span" | "math" | "sup" | "sub" | "br"
                    | "code" => pending.push_str(&inline_element(el)),
                    _ => {
                        flush(&mut pending, blocks);
                        collect_blocks(el, blocks);
                    }
                }
            }
            _ => {}
        }
    }
    flush(&mut pending, blocks);
}

fn collapse_ws(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_ws = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
            }
            in_ws = true;
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}

/// Inline Markdown for an element's children. Nested lists are skipped when
/// `skip_lists` is set (their items are rendered separately).
fn inline(el: ElementRef, skip_lists: bool) -> String {
    let mut out = String::new();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&collapse_ws(text)),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    let name = child_el.value().name();
                    if skip_lists && (name == "ul" || name == "ol") {
                        continue;
                    }
                    out.push_str(&inline_element(child_el));
                }
            }
            _ => {}
        }
    }
    out
}

fn wrap_trimmed(inner: &str, marker: &str) -> String {
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        return inner.to_string();
    }
    let lead = if inner.starts_with(' ') { " " } else { "" };
    let trail = if inner.ends_with(' ') { " " } else { "" };
    format!("{lead}{marker}{trimmed}{marker}{trail}")
}

fn inline_element(el: ElementRef) -> String {
    match el.value().name() {
        "b" | "strong" => wrap_trimmed(&inline(el, false), "**"),
        "i" | "em" => wrap_trimmed(&inline(el, false), "*"),
        "code" => wrap_trimmed(&el.text().collect::<String>(), "`"),
        "math" => {
            let latex: String = el.text().collect();
            if el.value().attr("display") == Some("block") {
                format!("$${}$$", latex.trim())
            } else {
                wrap_trimmed(&latex, "$")
            }
        }
        "a" => {
            let text = inline(el, false);
            match el.value().attr("href") {
                Some(href) if !href.is_empty() => format!("[{}]({})", text.trim(), href),
                _ => text,
            }
        }
        "sup" => format!("<sup>{}</sup>", inline(el, false).trim()),
        "sub" => format!("<sub>{}</sub>", inline(el, false).trim()),
        "br" => "\n".to_string(),
        "img" => image(el),
        _ => inline(el, false),
    }
}

fn image(el: ElementRef) -> String {
    let src = el.value().attr("src").unwrap_or_default();
    let alt = el.value().attr("alt").unwrap_or_default();
    format!("![{}]({})", alt.replace(['[', ']'], ""), src)
}

fn render_list(list: ElementRef, depth: usize) -> String {
    let ordered = list.value().name() == "ol";
    let indent = "  ".repeat(depth);
    let mut lines = Vec::new();
    let mut n = 0;
    for child in list.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "li" => {
                n += 1;
                let marker = if ordered { format!("{n}.") } else { "-".to_string() };
                let text = tidy(&inline(child, true)).replace('\n', " ");
                lines.push(format!("{indent}{marker} {text}"));
                for nested in child.children().filter_map(ElementRef::wrap) {
                    if matches!(nested.value().name(), "ul" | "ol") {
                        let sub = render_list(nested, depth + 1);
                        if !sub.is_empty() {
                            lines.push(sub);
                        }
                    }
                }
            }
            "ul" | "ol" => {
                let sub = render_list(child, depth + 1);
                if !sub.is_empty() {
                    lines.push(sub);
                }
            }
            _ => {}
        }
    }
    lines.join("\n")
}

/// GFM pipe table, or the HTML itself when any cell spans.
fn render_table(table: ElementRef) -> String {
    let spans = table.select(&CELL).any(|cell| {
        ["rowspan", "colspan"].iter().any(|attr| {
            cell.value()
                .attr(attr)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .is_some_and(|n| n > 1)
        })
    });
    if spans {
        return table.html();
    }

    let rows: Vec<Vec<String>> = table
        .select(&ROW)
        .map(|row| {
            row.select(&CELL)
                .map(|cell| {
                    tidy(&inline(cell, false))
                        .replace('|', "\\|")
                        .replace('\n', "<br>")
                })
                .collect()
        })
        .collect();
    let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
    if cols == 0 {
        return String::new();
    }

    let line = |cells: &[String]| {
        let mut s = String::from("|");
        for i in 0..cols {
            s.push(' ');
            s.push_str(cells.get(i).map(String::as_str).unwrap_or(""));
            s.push_str(" |");
        }
        s
    };
    let mut out = vec![line(&rows[0])];
    out.push(format!("|{}", " --- |".repeat(cols)));
    for row in &rows[1..] {
        out.push(line(row));
    }
    out.join("\n")
}
