//! The polymorphic tree node.
//!
//! A [`Block`] holds the fields every node shares (geometry, children,
//! output flags, counters, override HTML) and a [`BlockKind`] carrying the
//! variant payload. Children are referenced by [`BlockId`] only; the owning
//! [`crate::schema::Page`] resolves them.

use super::{BlockId, BlockType, TextExtractionMethod};
use crate::geometry::PolygonBox;
use serde::{Deserialize, Serialize};

/// Inline formatting carried by a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanFormat {
    Plain,
    Math,
    Bold,
    Italic,
    Superscript,
    Subscript,
}

/// Leaf text run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanData {
    /// Raw, unescaped text as produced by the provider.
    pub text: String,
    #[serde(default)]
    pub font: String,
    #[serde(default)]
    pub font_size: f32,
    #[serde(default)]
    pub font_weight: f32,
    #[serde(default)]
    pub formats: Vec<SpanFormat>,
    #[serde(default)]
    pub url: Option<String>,
}

impl SpanData {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn has_format(&self, format: SpanFormat) -> bool {
        self.formats.contains(&format)
    }
}

/// Paragraph-level flags shared by `Text` and `TextInlineMath`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextData {
    /// The paragraph flows into the next reading-order block.
    #[serde(default)]
    pub has_continuation: bool,
    #[serde(default)]
    pub blockquote: bool,
    #[serde(default)]
    pub blockquote_level: u8,
}

/// A reconstructed table cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCellData {
    pub row_id: u32,
    pub col_id: u32,
    pub rowspan: u32,
    pub colspan: u32,
    pub is_header: bool,
    /// HTML-escaped lines stacked inside the cell, in assignment order.
    #[serde(default)]
    pub text_lines: Vec<String>,
}

impl TableCellData {
    pub fn new(row_id: u32, col_id: u32) -> Self {
        Self {
            row_id,
            col_id,
            rowspan: 1,
            colspan: 1,
            is_header: false,
            text_lines: Vec::new(),
        }
    }

    /// Cell text with lines joined by newlines, trimmed.
    pub fn text(&self) -> String {
        self.text_lines.join("\n").trim().to_string()
    }
}

/// Variant payloads of the closed block set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum BlockKind {
    Span(SpanData),
    Line,
    Text(TextData),
    TextInlineMath(TextData),
    SectionHeader {
        #[serde(default)]
        heading_level: Option<u8>,
    },
    Table,
    Form,
    TableCell(TableCellData),
    Equation {
        #[serde(default)]
        latex: Option<String>,
    },
    Code {
        #[serde(default)]
        code: Option<String>,
    },
    Picture {
        #[serde(default)]
        description: Option<String>,
    },
    Figure {
        #[serde(default)]
        description: Option<String>,
    },
    Footnote,
    Caption,
    Reference {
        #[serde(default)]
        anchor: Option<String>,
    },
    ListItem {
        #[serde(default)]
        list_indent_level: u8,
    },
    PageHeader,
    PageFooter,
    FigureGroup,
    TableGroup,
    ListGroup,
    PictureGroup,
}

impl BlockKind {
    pub fn block_type(&self) -> BlockType {
        match self {
            BlockKind::Span(_) => BlockType::Span,
            BlockKind::Line => BlockType::Line,
            BlockKind::Text(_) => BlockType::Text,
            BlockKind::TextInlineMath(_) => BlockType::TextInlineMath,
            BlockKind::SectionHeader { .. } => BlockType::SectionHeader,
            BlockKind::Table => BlockType::Table,
            BlockKind::Form => BlockType::Form,
            BlockKind::TableCell(_) => BlockType::TableCell,
            BlockKind::Equation { .. } => BlockType::Equation,
            BlockKind::Code { .. } => BlockType::Code,
            BlockKind::Picture { .. } => BlockType::Picture,
            BlockKind::Figure { .. } => BlockType::Figure,
            BlockKind::Footnote => BlockType::Footnote,
            BlockKind::Caption => BlockType::Caption,
            BlockKind::Reference { .. } => BlockType::Reference,
            BlockKind::ListItem { .. } => BlockType::ListItem,
            BlockKind::PageHeader => BlockType::PageHeader,
            BlockKind::PageFooter => BlockType::PageFooter,
            BlockKind::FigureGroup => BlockType::FigureGroup,
            BlockKind::TableGroup => BlockType::TableGroup,
            BlockKind::ListGroup => BlockType::ListGroup,
            BlockKind::PictureGroup => BlockType::PictureGroup,
        }
    }

    /// Empty payload for a block type, as produced by the layout detector.
    ///
    /// Returns `None` for `Page`/`Document`, which are not registry blocks.
    pub fn for_type(block_type: BlockType) -> Option<BlockKind> {
        let kind = match block_type {
            BlockType::Span => BlockKind::Span(SpanData::default()),
            BlockType::Line => BlockKind::Line,
            BlockType::Text => BlockKind::Text(TextData::default()),
            BlockType::TextInlineMath => BlockKind::TextInlineMath(TextData::default()),
            BlockType::SectionHeader => BlockKind::SectionHeader {
                heading_level: None,
            },
            BlockType::Table => BlockKind::Table,
            BlockType::Form => BlockKind::Form,
            BlockType::TableCell => BlockKind::TableCell(TableCellData::new(0, 0)),
            BlockType::Equation => BlockKind::Equation { latex: None },
            BlockType::Code => BlockKind::Code { code: None },
            BlockType::Picture => BlockKind::Picture { description: None },
            BlockType::Figure => BlockKind::Figure { description: None },
            BlockType::Footnote => BlockKind::Footnote,
            BlockType::Caption => BlockKind::Caption,
            BlockType::Reference => BlockKind::Reference { anchor: None },
            BlockType::ListItem => BlockKind::ListItem {
                list_indent_level: 0,
            },
            BlockType::PageHeader => BlockKind::PageHeader,
            BlockType::PageFooter => BlockKind::PageFooter,
            BlockType::FigureGroup => BlockKind::FigureGroup,
            BlockType::TableGroup => BlockKind::TableGroup,
            BlockType::ListGroup => BlockKind::ListGroup,
            BlockType::PictureGroup => BlockKind::PictureGroup,
            BlockType::Page | BlockType::Document => return None,
        };
        Some(kind)
    }

    pub fn text_data(&self) -> Option<&TextData> {
        match self {
            BlockKind::Text(d) | BlockKind::TextInlineMath(d) => Some(d),
            _ => None,
        }
    }

    pub fn text_data_mut(&mut self) -> Option<&mut TextData> {
        match self {
            BlockKind::Text(d) | BlockKind::TextInlineMath(d) => Some(d),
            _ => None,
        }
    }
}

/// Monotonic counters recorded by the correction layer. Never reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub llm_error_count: u32,
    pub llm_tokens_used: u64,
    pub llm_request_count: u32,
}

impl BlockMetadata {
    pub fn record_request(&mut self, tokens: u64) {
        self.llm_request_count += 1;
        self.llm_tokens_used += tokens;
    }

    pub fn record_error(&mut self) {
        self.llm_error_count += 1;
    }

    pub fn merge(&mut self, other: &BlockMetadata) {
        self.llm_error_count += other.llm_error_count;
        self.llm_tokens_used += other.llm_tokens_used;
        self.llm_request_count += other.llm_request_count;
    }
}

/// One node of the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub polygon: PolygonBox,
    /// Ordered child ids; insertion order is reading and render order.
    pub structure: Option<Vec<BlockId>>,
    pub ignore_for_output: bool,
    pub text_extraction_method: TextExtractionMethod,
    pub metadata: BlockMetadata,
    /// Rendering override. When set it replaces the computed template.
    pub html: Option<String>,
    pub kind: BlockKind,
}

impl Block {
    /// Create a block whose type tag is derived from `kind`.
    pub fn new(page_id: u32, block_id: u32, polygon: PolygonBox, kind: BlockKind) -> Self {
        let block_type = kind.block_type();
        Self {
            id: BlockId::new(page_id, block_id, block_type),
            polygon,
            structure: None,
            ignore_for_output: matches!(block_type, BlockType::PageHeader | BlockType::PageFooter),
            text_extraction_method: TextExtractionMethod::default(),
            metadata: BlockMetadata::default(),
            html: None,
            kind,
        }
    }

    pub fn block_type(&self) -> BlockType {
        self.id.block_type
    }

    pub fn page_id(&self) -> u32 {
        self.id.page_id
    }

    /// Child ids, empty when the block has no structure.
    pub fn children(&self) -> &[BlockId] {
        self.structure.as_deref().unwrap_or(&[])
    }

    pub fn add_structure(&mut self, child: BlockId) {
        self.structure.get_or_insert_with(Vec::new).push(child);
    }

    /// Replace the children wholesale.
    pub fn set_structure(&mut self, children: Vec<BlockId>) {
        self.structure = Some(children);
    }

    pub fn span(&self) -> Option<&SpanData> {
        match &self.kind {
            BlockKind::Span(s) => Some(s),
            _ => None,
        }
    }

    pub fn table_cell(&self) -> Option<&TableCellData> {
        match &self.kind {
            BlockKind::TableCell(c) => Some(c),
            _ => None,
        }
    }

    pub fn has_continuation(&self) -> bool {
        self.kind.text_data().is_some_and(|d| d.has_continuation)
    }
}
