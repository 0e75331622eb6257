//! Two-phase HTML rendering.
//!
//! Phase 1 turns every block into a *template*: its own markup with each
//! structural child replaced by `<content-ref src='/page/0/Line/3'></content-ref>`.
//! A block whose `html` override is set uses that instead. Phase 2 resolves
//! references depth-first, so an override written by a correction task is
//! picked up without touching any ancestor.

use crate::config::{AssemblyConfig, PageSeparator};
use crate::correction::images::crop_block;
use crate::error::AssemblyError;
use crate::schema::{Block, BlockId, BlockKind, Document, SpanFormat};
use html_escape::{encode_double_quoted_attribute, encode_text};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use tracing::debug;

static CONTENT_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<content-ref src='([^']*)'></content-ref>").unwrap());

/// Fully resolved markup plus the image crops it references.
#[derive(Debug, Clone, Default)]
pub struct RenderedDocument {
    pub html: String,
    /// Resolved markup of each page, without separators.
    pub pages: Vec<String>,
    /// Keyed by the filename used in `<img src>`.
    pub images: BTreeMap<String, DynamicImage>,
}

pub struct HtmlRenderer<'a> {
    document: &'a Document,
    extract_images: bool,
    page_separator: PageSeparator,
}

struct Resolution {
    memo: HashMap<BlockId, String>,
    stack: HashSet<BlockId>,
    images: BTreeMap<String, DynamicImage>,
}

pub fn content_ref(id: &BlockId) -> String {
    format!("<content-ref src='{}'></content-ref>", id.to_path())
}

/// Filename an extracted image block is written under.
pub fn image_filename(id: &BlockId) -> String {
    format!(
        "_page_{}_{}_{}.png",
        id.page_id,
        id.block_type,
        id.block_id.unwrap_or_default()
    )
}

impl<'a> HtmlRenderer<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self {
            document,
            extract_images: true,
            page_separator: PageSeparator::None,
        }
    }

    pub fn from_config(document: &'a Document, config: &AssemblyConfig) -> Self {
        Self {
            document,
            extract_images: config.extract_images,
            page_separator: config.page_separator.clone(),
        }
    }

    pub fn extract_images(mut self, extract: bool) -> Self {
        self.extract_images = extract;
        self
    }

    pub fn page_separator(mut self, separator: PageSeparator) -> Self {
        self.page_separator = separator;
        self
    }

    /// Render every page, in order.
    pub fn render(&self) -> Result<RenderedDocument, AssemblyError> {
        let mut res = Resolution {
            memo: HashMap::new(),
            stack: HashSet::new(),
            images: BTreeMap::new(),
        };
        let mut html = String::new();
        let mut pages = Vec::with_capacity(self.document.pages.len());
        for (i, page) in self.document.pages.iter().enumerate() {
            if i > 0 {
                html.push_str(&self.page_separator.render_html(i + 1));
            }
            let markup = self.resolve(&page.id(), &mut res)?;
            html.push_str(&markup);
            pages.push(markup);
        }
        debug!(
            "Rendered {} pages, {} blocks resolved, {} images",
            self.document.pages.len(),
            res.memo.len(),
            res.images.len()
        );
        Ok(RenderedDocument {
            html,
            pages,
            images: res.images,
        })
    }

    /// Resolve a single block and everything below it.
    pub fn render_block(&self, id: &BlockId) -> Result<String, AssemblyError> {
        let mut res = Resolution {
            memo: HashMap::new(),
            stack: HashSet::new(),
            images: BTreeMap::new(),
        };
        self.resolve(id, &mut res)
    }

    /// Phase 1 for one block.
    pub fn template(&self, id: &BlockId) -> Result<String, AssemblyError> {
        if id.block_id.is_none() {
            let total = self.document.pages.len();
            let page = self
                .document
                .get_page(id.page_id)
                .ok_or(AssemblyError::PageNotFound { page: id.page_id, total })?;
            return Ok(page.structure.iter().map(content_ref).collect());
        }
        let block = self.document.block(id)?;
        if block.ignore_for_output {
            return Ok(String::new());
        }
        if let Some(ref html) = block.html {
            return Ok(html.clone());
        }
        Ok(self.assemble(block))
    }

    fn children_refs(block: &Block) -> String {
        block.children().iter().map(content_ref).collect()
    }

    fn assemble(&self, block: &Block) -> String {
        let content = Self::children_refs(block);
        match &block.kind {
            BlockKind::Span(span) => {
                let mut text = encode_text(&span.text).into_owned();
                for (format, open, close) in [
                    (SpanFormat::Math, "<math>", "</math>"),
                    (SpanFormat::Superscript, "<sup>", "</sup>"),
                    (SpanFormat::Subscript, "<sub>", "</sub>"),
                    (SpanFormat::Italic, "<i>", "</i>"),
                    (SpanFormat::Bold, "<b>", "</b>"),
                ] {
                    if span.has_format(format) && !text.trim().is_empty() {
                        text = format!("{open}{text}{close}");
                    }
                }
                if let Some(ref url) = span.url {
                    text = format!("<a href=\"{}\">{text}</a>", encode_double_quoted_attribute(url));
                }
                text
            }
            BlockKind::Line => format!("{content}\n"),
            BlockKind::Text(data) | BlockKind::TextInlineMath(data) => {
                let class = if data.has_continuation {
                    " class=\"has-continuation\""
                } else {
                    ""
                };
                let mut html = format!("<p{class}>{content}</p>");
                if data.blockquote {
                    for _ in 0..data.blockquote_level.max(1) {
                        html = format!("<blockquote>{html}</blockquote>");
                    }
                }
                html
            }
            BlockKind::SectionHeader { heading_level } => {
                let level = heading_level.unwrap_or(2).clamp(1, 6);
                format!("<h{level}>{content}</h{level}>")
            }
            BlockKind::Table | BlockKind::Form => self.table_template(block, &content),
            BlockKind::TableCell(cell) => {
                let tag = if cell.is_header { "th" } else { "td" };
                let mut attrs = String::new();
                if cell.rowspan > 1 {
                    attrs.push_str(&format!(" rowspan=\"{}\"", cell.rowspan));
                }
                if cell.colspan > 1 {
                    attrs.push_str(&format!(" colspan=\"{}\"", cell.colspan));
                }
                let text = if cell.text_lines.is_empty() {
                    content
                } else {
                    cell.text_lines.join("<br>")
                };
                format!("<{tag}{attrs}>{text}</{tag}>")
            }
            BlockKind::Equation { latex } => match latex {
                Some(latex) => format!("<math display=\"block\">{}</math>", encode_text(latex)),
                None => format!("<p>{content}</p>"),
            },
            BlockKind::Code { code } => match code {
                Some(code) => format!("<pre>{}</pre>", encode_text(code)),
                None => format!("<pre>{content}</pre>"),
            },
            BlockKind::Picture { description } | BlockKind::Figure { description } => {
                self.image_template(block, description.as_deref())
            }
            BlockKind::ListItem { .. } => format!("<li>{content}</li>"),
            BlockKind::ListGroup => self.list_template(block),
            BlockKind::Reference { anchor } => match anchor {
                Some(anchor) => format!(
                    "<span id=\"{}\"></span>{content}",
                    encode_double_quoted_attribute(anchor)
                ),
                None => content,
            },
            BlockKind::Caption
            | BlockKind::Footnote
            | BlockKind::PageHeader
            | BlockKind::PageFooter => format!("<p>{content}</p>"),
            BlockKind::FigureGroup | BlockKind::TableGroup | BlockKind::PictureGroup => content,
        }
    }

    /// Cells in row-major order, one `<tr>` per row id. A table with no cells
    /// falls back to its text.
    fn table_template(&self, block: &Block, content: &str) -> String {
        let mut rows: BTreeMap<u32, Vec<(u32, BlockId)>> = BTreeMap::new();
        for child in block.children() {
            if let Some(cell) = self.document.get_block(child).and_then(|b| b.table_cell()) {
                rows.entry(cell.row_id).or_default().push((cell.col_id, *child));
            }
        }
        if rows.is_empty() {
            return format!("<p>{content}</p>");
        }
        let mut html = String::from("<table>");
        for (_, mut cells) in rows {
            cells.sort_by_key(|(col, _)| *col);
            html.push_str("<tr>");
            for (_, id) in cells {
                html.push_str(&content_ref(&id));
            }
            html.push_str("</tr>");
        }
        html.push_str("</table>");
        html
    }

    /// Nested `<ul>` by each item's indent level.
    fn list_template(&self, block: &Block) -> String {
        let mut html = String::from("<ul>");
        let mut depth = 0u8;
        for child in block.children() {
            let level = match self.document.get_block(child).map(|b| &b.kind) {
                Some(BlockKind::ListItem { list_indent_level }) => *list_indent_level,
                _ => depth,
            };
            while depth < level {
                html.push_str("<ul>");
                depth += 1;
            }
            while depth > level {
                html.push_str("</ul>");
                depth -= 1;
            }
            html.push_str(&content_ref(child));
        }
        for _ in 0..=depth {
            html.push_str("</ul>");
        }
        html
    }

    fn image_template(&self, block: &Block, description: Option<&str>) -> String {
        let has_raster = self
            .document
            .get_page(block.page_id())
            .is_some_and(|p| p.image.is_some());
        let mut html = String::new();
        if self.extract_images && has_raster {
            html.push_str(&format!(
                "<img src='{}' alt=\"{}\">",
                image_filename(&block.id),
                encode_double_quoted_attribute(description.unwrap_or_default())
            ));
        }
        if let Some(desc) = description {
            html.push_str(&format!("<p role=\"img\">{}</p>", encode_text(desc)));
        }
        html
    }

    /// Phase 2: substitute every content-ref, memoising resolved blocks.
    fn resolve(&self, id: &BlockId, res: &mut Resolution) -> Result<String, AssemblyError> {
        if let Some(done) = res.memo.get(id) {
            return Ok(done.clone());
        }
        if !res.stack.insert(*id) {
            return Err(AssemblyError::CycleDetected { id: id.to_path() });
        }

        let template = self.template(id)?;
        let mut error = None;
        let resolved = CONTENT_REF.replace_all(&template, |caps: &Captures| {
            if error.is_some() {
                return String::new();
            }
            let child = match BlockId::from_str(&caps[1]) {
                Ok(child) => child,
                Err(_) => {
                    error = Some(AssemblyError::DanglingReference { id: caps[1].to_string() });
                    return String::new();
                }
            };
            self.resolve(&child, res).unwrap_or_else(|e| {
                error = Some(e);
                String::new()
            })
        });
        if let Some(e) = error {
            return Err(e);
        }
        let resolved = resolved.into_owned();

        if self.extract_images && id.block_type.is_image() {
            if let Ok(block) = self.document.block(id) {
                if !block.ignore_for_output && block.html.is_none() {
                    if let Some(crop) = self
                        .document
                        .get_page(id.page_id)
                        .and_then(|page| crop_block(page, &block.polygon))
                    {
                        res.images.insert(image_filename(id), crop);
                    }
                }
            }
        }

        res.stack.remove(id);
        res.memo.insert(*id, resolved.clone());
        Ok(resolved)
    }
}

/// Resolved HTML of one table or form block.
pub fn table_html(document: &Document, table: &BlockId) -> String {
    HtmlRenderer::new(document)
        .extract_images(false)
        .render_block(table)
        .unwrap_or_default()
}

/// Resolve the whole document with the config's image and separator settings.
pub fn render_html(document: &Document, config: &AssemblyConfig) -> Result<RenderedDocument, AssemblyError> {
    HtmlRenderer::from_config(document, config).render()
}
