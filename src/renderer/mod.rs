//! Rendering: the document tree to HTML, Markdown or JSON.
//!
//! HTML is the canonical intermediate form. Markdown is derived from the
//! resolved HTML, and JSON walks the same templates.

pub mod html;
pub mod json;
pub mod markdown;
pub mod postprocess;

pub use html::{render_html, table_html, HtmlRenderer, RenderedDocument};
pub use json::{to_json, to_json_document, JsonBlock, JsonDocument};
pub use markdown::{pages_to_markdown, to_markdown};

use crate::config::{AssemblyConfig, OutputFormat};
use crate::error::AssemblyError;
use crate::schema::Document;
use image::DynamicImage;
use std::collections::BTreeMap;

/// Render in the configured output format. Returns the content and the
/// extracted image crops it references.
pub fn render(
    document: &Document,
    config: &AssemblyConfig,
) -> Result<(String, BTreeMap<String, DynamicImage>), AssemblyError> {
    let rendered = render_html(document, config)?;
    let content = match config.output_format {
        OutputFormat::Html => rendered.html,
        OutputFormat::Markdown => pages_to_markdown(&rendered.pages, &config.page_separator),
        OutputFormat::Json => to_json(document, config.extract_images, true)?,
    };
    Ok((content, rendered.images))
}
