//! Block identity: the closed set of block types and the `(page, block, type)` id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every kind of node that can appear in the document tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockType {
    Span,
    Line,
    Text,
    TextInlineMath,
    SectionHeader,
    Table,
    Form,
    TableCell,
    Equation,
    Code,
    Picture,
    Figure,
    Footnote,
    Caption,
    Reference,
    ListItem,
    PageHeader,
    PageFooter,
    FigureGroup,
    TableGroup,
    ListGroup,
    PictureGroup,
    Page,
    Document,
}

impl BlockType {
    pub const ALL: [BlockType; 24] = [
        BlockType::Span,
        BlockType::Line,
        BlockType::Text,
        BlockType::TextInlineMath,
        BlockType::SectionHeader,
        BlockType::Table,
        BlockType::Form,
        BlockType::TableCell,
        BlockType::Equation,
        BlockType::Code,
        BlockType::Picture,
        BlockType::Figure,
        BlockType::Footnote,
        BlockType::Caption,
        BlockType::Reference,
        BlockType::ListItem,
        BlockType::PageHeader,
        BlockType::PageFooter,
        BlockType::FigureGroup,
        BlockType::TableGroup,
        BlockType::ListGroup,
        BlockType::PictureGroup,
        BlockType::Page,
        BlockType::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Span => "Span",
            BlockType::Line => "Line",
            BlockType::Text => "Text",
            BlockType::TextInlineMath => "TextInlineMath",
            BlockType::SectionHeader => "SectionHeader",
            BlockType::Table => "Table",
            BlockType::Form => "Form",
            BlockType::TableCell => "TableCell",
            BlockType::Equation => "Equation",
            BlockType::Code => "Code",
            BlockType::Picture => "Picture",
            BlockType::Figure => "Figure",
            BlockType::Footnote => "Footnote",
            BlockType::Caption => "Caption",
            BlockType::Reference => "Reference",
            BlockType::ListItem => "ListItem",
            BlockType::PageHeader => "PageHeader",
            BlockType::PageFooter => "PageFooter",
            BlockType::FigureGroup => "FigureGroup",
            BlockType::TableGroup => "TableGroup",
            BlockType::ListGroup => "ListGroup",
            BlockType::PictureGroup => "PictureGroup",
            BlockType::Page => "Page",
            BlockType::Document => "Document",
        }
    }

    /// Group type synthesized around an anchor of this type, if any.
    pub fn group_type(&self) -> Option<BlockType> {
        match self {
            BlockType::Table => Some(BlockType::TableGroup),
            BlockType::Figure => Some(BlockType::FigureGroup),
            BlockType::Picture => Some(BlockType::PictureGroup),
            BlockType::ListItem => Some(BlockType::ListGroup),
            _ => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(
            self,
            BlockType::FigureGroup
                | BlockType::TableGroup
                | BlockType::ListGroup
                | BlockType::PictureGroup
        )
    }

    /// Blocks rendered as an `<img>` with a cropped raster.
    pub fn is_image(&self) -> bool {
        matches!(self, BlockType::Picture | BlockType::Figure)
    }

    /// Blocks whose content comes from lines of text.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            BlockType::Text
                | BlockType::TextInlineMath
                | BlockType::SectionHeader
                | BlockType::Caption
                | BlockType::Footnote
                | BlockType::Reference
                | BlockType::ListItem
                | BlockType::Code
                | BlockType::PageHeader
                | BlockType::PageFooter
        )
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlockType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown block type '{s}'"))
    }
}

/// Stable identity of a block: page, index in the page registry, type tag.
///
/// Pages themselves carry `block_id = None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId {
    pub page_id: u32,
    pub block_id: Option<u32>,
    pub block_type: BlockType,
}

impl BlockId {
    pub fn new(page_id: u32, block_id: u32, block_type: BlockType) -> Self {
        Self {
            page_id,
            block_id: Some(block_id),
            block_type,
        }
    }

    pub fn page(page_id: u32) -> Self {
        Self {
            page_id,
            block_id: None,
            block_type: BlockType::Page,
        }
    }

    /// `/page/{page}/{Type}/{block}`, or `/page/{page}/Page` for pages.
    pub fn to_path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block_id {
            Some(id) => write!(f, "/page/{}/{}/{}", self.page_id, self.block_type, id),
            None => write!(f, "/page/{}/{}", self.page_id, self.block_type),
        }
    }
}

impl FromStr for BlockId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim_start_matches('/').split('/').collect();
        match parts.as_slice() {
            ["page", page, ty] => Ok(BlockId {
                page_id: page.parse().map_err(|_| format!("bad page id in '{s}'"))?,
                block_id: None,
                block_type: ty.parse()?,
            }),
            ["page", page, ty, id] => Ok(BlockId {
                page_id: page.parse().map_err(|_| format!("bad page id in '{s}'"))?,
                block_id: Some(id.parse().map_err(|_| format!("bad block id in '{s}'"))?),
                block_type: ty.parse()?,
            }),
            _ => Err(format!("malformed block id '{s}'")),
        }
    }
}

/// Where a block's text came from. Stored verbatim from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextExtractionMethod {
    /// Embedded text extracted directly from the PDF.
    #[default]
    Pdftext,
    /// Text recognised from the page raster.
    Surya,
    /// Text rewritten by the structured-generation service.
    Gemini,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_path_round_trip() {
        let id = BlockId::new(3, 17, BlockType::SectionHeader);
        assert_eq!(id.to_string(), "/page/3/SectionHeader/17");
        assert_eq!(id.to_path().parse::<BlockId>().unwrap(), id);

        let page = BlockId::page(0);
        assert_eq!(page.to_string(), "/page/0/Page");
        assert_eq!("/page/0/Page".parse::<BlockId>().unwrap(), page);
    }

    #[test]
    fn block_id_rejects_garbage() {
        assert!("/page/x/Text/1".parse::<BlockId>().is_err());
        assert!("/page/1/Nope/1".parse::<BlockId>().is_err());
        assert!("page".parse::<BlockId>().is_err());
    }

    #[test]
    fn group_types() {
        assert_eq!(BlockType::Table.group_type(), Some(BlockType::TableGroup));
        assert_eq!(BlockType::Caption.group_type(), None);
        assert!(BlockType::ListGroup.is_group());
    }
}
