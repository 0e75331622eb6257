//! Nested JSON export mirroring each block's `structure`.
//!
//! Lines and spans are folded into their parent's `html`; a block with any
//! other kind of child keeps its content-refs and lists the children.

use super::html::HtmlRenderer;
use crate::error::AssemblyError;
use crate::schema::{BlockId, BlockType, Document};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct JsonBlock {
    pub id: String,
    pub block_type: BlockType,
    pub polygon: [[f32; 2]; 4],
    pub bbox: [f32; 4],
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<JsonBlock>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    pub pages: Vec<JsonBlock>,
}

fn is_inline(id: &BlockId) -> bool {
    matches!(id.block_type, BlockType::Line | BlockType::Span)
}

fn export(
    renderer: &HtmlRenderer,
    document: &Document,
    id: &BlockId,
    children: &[BlockId],
    polygon: [[f32; 2]; 4],
    bbox: [f32; 4],
) -> Result<JsonBlock, AssemblyError> {
    let nested = !children.is_empty() && !children.iter().all(is_inline);
    let (html, children) = if nested {
        let kids = children
            .iter()
            .map(|child| {
                let block = document.block(child)?;
                export(
                    renderer,
                    document,
                    child,
                    block.children(),
                    block.polygon.polygon,
                    block.polygon.bbox(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        (renderer.template(id)?, Some(kids))
    } else {
        (renderer.render_block(id)?, None)
    };
    Ok(JsonBlock {
        id: id.to_path(),
        block_type: id.block_type,
        polygon,
        bbox,
        html,
        children,
    })
}

/// Build the nested export tree.
pub fn to_json_document(
    document: &Document,
    extract_images: bool,
) -> Result<JsonDocument, AssemblyError> {
    let renderer = HtmlRenderer::new(document).extract_images(extract_images);
    let pages = document
        .pages
        .iter()
        .map(|page| {
            export(
                &renderer,
                document,
                &page.id(),
                &page.structure,
                page.polygon.polygon,
                page.polygon.bbox(),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(JsonDocument {
        filepath: document.filepath.clone(),
        pages,
    })
}

/// Serialise the export tree, pretty-printed or compact.
pub fn to_json(document: &Document, extract_images: bool, pretty: bool) -> Result<String, AssemblyError> {
    let tree = to_json_document(document, extract_images)?;
    let json = if pretty {
        serde_json::to_string_pretty(&tree)?
    } else {
        serde_json::to_string(&tree)?
    };
    Ok(json)
}
